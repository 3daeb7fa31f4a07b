//! External sorter.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log;

use crate::merger::RunMerger;
use crate::page::{Drive, PageReader};
use crate::record::MalformedRecordError;
use crate::run::{generate_runs, Run, RunStore};
use crate::stats::SortReport;

/// Default number of records in a page buffer (b).
pub const DEFAULT_PAGE_RECORDS: usize = 250;
/// Default number of page buffers (n).
pub const DEFAULT_BUFFERS: usize = 20;
/// Default page capacity in bytes, large enough to never bind.
pub const DEFAULT_PAGE_BYTES: usize = i32::MAX as usize;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Input file can not be opened.
    InputUnavailable { path: PathBuf, source: io::Error },
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
    /// Input line is not a valid record.
    MalformedRecord(MalformedRecordError),
    /// A single line does not fit into a page.
    PageOverflow { line_bytes: usize, page_bytes: usize },
    /// Sorter parameters are out of range.
    InvalidConfig(String),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InputUnavailable { source, .. } => Some(source),
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::MalformedRecord(err) => Some(err),
            SortError::PageOverflow { .. } => None,
            SortError::InvalidConfig(_) => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InputUnavailable { path, source } => {
                write!(f, "input file {} unavailable: {}", path.display(), source)
            }
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::MalformedRecord(err) => write!(f, "input data error: {}", err),
            SortError::PageOverflow { line_bytes, page_bytes } => write!(
                f,
                "line of {} bytes does not fit into a page of {} bytes",
                line_bytes, page_bytes
            ),
            SortError::InvalidConfig(msg) => write!(f, "invalid sorter configuration: {}", msg),
        }
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder {
    /// Number of records in a page buffer.
    page_records: usize,
    /// Number of page buffers.
    buffers: usize,
    /// Page capacity in bytes.
    page_bytes: usize,
    /// Number of threads to be used to sort blocks.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        ExternalSorter::new(
            self.page_records,
            self.buffers,
            self.page_bytes,
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.rw_buf_size,
        )
    }

    /// Sets number of records in a page buffer (b).
    pub fn with_page_records(mut self, page_records: usize) -> ExternalSorterBuilder {
        self.page_records = page_records;
        return self;
    }

    /// Sets number of page buffers (n).
    pub fn with_buffers(mut self, buffers: usize) -> ExternalSorterBuilder {
        self.buffers = buffers;
        return self;
    }

    /// Sets page capacity in bytes.
    pub fn with_page_bytes(mut self, page_bytes: usize) -> ExternalSorterBuilder {
        self.page_bytes = page_bytes;
        return self;
    }

    /// Sets number of threads to be used to sort blocks in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets run file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

impl Default for ExternalSorterBuilder {
    fn default() -> Self {
        ExternalSorterBuilder {
            page_records: DEFAULT_PAGE_RECORDS,
            buffers: DEFAULT_BUFFERS,
            page_bytes: DEFAULT_PAGE_BYTES,
            threads_number: Some(1),
            tmp_dir: None,
            rw_buf_size: None,
        }
    }
}

/// External sorter.
///
/// Sorts record files with a balanced k-way merge sort: the input is split into sorted runs of
/// `page_records * buffers` records, then the oldest `buffers - 1` runs are repeatedly merged into a new
/// run until a single run is left.
pub struct ExternalSorter {
    /// Number of records in a page buffer.
    page_records: usize,
    /// Number of page buffers.
    buffers: usize,
    /// Page capacity in bytes.
    page_bytes: usize,
    /// Block sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<PathBuf>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
}

impl ExternalSorter {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `page_records` - Number of records in a page buffer (b).
    /// * `buffers` - Number of page buffers (n). A merge step merges up to `buffers - 1` runs.
    /// * `page_bytes` - Page capacity in bytes.
    /// * `threads_number` - Number of threads to be used to sort blocks. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Run files read/write buffer size.
    pub fn new(
        page_records: usize,
        buffers: usize,
        page_bytes: usize,
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        Self::validate(page_records, buffers, page_bytes)?;

        return Ok(ExternalSorter {
            page_records,
            buffers,
            page_bytes,
            rw_buf_size,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: tmp_path.map(Path::to_path_buf),
        });
    }

    fn validate(page_records: usize, buffers: usize, page_bytes: usize) -> Result<(), SortError> {
        if page_records == 0 {
            return Err(SortError::InvalidConfig("page records must be positive".into()));
        }
        if buffers < 3 {
            return Err(SortError::InvalidConfig(format!(
                "at least 3 buffers required to merge runs, got {}",
                buffers
            )));
        }
        if page_bytes == 0 {
            return Err(SortError::InvalidConfig("page bytes must be positive".into()));
        }
        if page_records.checked_mul(buffers).is_none() {
            return Err(SortError::InvalidConfig("block size overflow".into()));
        }

        Ok(())
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Number of records sorted in memory at once (`b * n`).
    pub fn block_size(&self) -> usize {
        self.page_records * self.buffers
    }

    /// Sorts records of the `input` file into the `output` file.
    /// Returns the drive operation report of the invocation.
    ///
    /// # Arguments
    /// * `input` - File to be sorted
    /// * `output` - Result file, created or truncated
    pub fn sort(&self, input: &Path, output: &Path) -> Result<SortReport, SortError> {
        let mut input_reader =
            PageReader::open(input, self.rw_buf_size).map_err(|err| SortError::InputUnavailable {
                path: input.to_path_buf(),
                source: err,
            })?;

        let mut store = RunStore::new(self.tmp_dir.as_deref(), self.rw_buf_size)?;
        let mut drive = Drive::new(self.page_bytes);

        log::info!(
            "sorting {} (b: {}, n: {}, block: {})",
            input.display(),
            self.page_records,
            self.buffers,
            self.block_size()
        );

        let runs = generate_runs(
            &mut drive,
            &mut store,
            &self.thread_pool,
            &mut input_reader,
            self.block_size(),
        )?;
        drop(input_reader);

        let records = runs.iter().map(Run::records).sum();
        log::debug!("{} runs generated ({} records)", runs.len(), records);

        match self.merge_runs(&mut drive, &mut store, runs)? {
            Some(run) => store.persist(run, output)?,
            None => {
                fs::File::create(output).map_err(SortError::IO)?;
            }
        }

        let report = SortReport::new(records, self.page_records, self.buffers, drive.stats());
        log::info!("sorting done, {}", report);

        return Ok(report);
    }

    /// Merges the oldest `buffers - 1` pending runs into a new run until a single run is left.
    /// Returns the last run, [`None`] if there are no runs.
    pub fn merge_runs(
        &self,
        drive: &mut Drive,
        store: &mut RunStore,
        runs: Vec<Run>,
    ) -> Result<Option<Run>, SortError> {
        let merger = RunMerger::new(self.page_records);
        let fan_in = self.buffers - 1;
        let mut pending: BinaryHeap<Reverse<Run>> = runs.into_iter().map(Reverse).collect();

        while pending.len() > 1 {
            let batch_size = fan_in.min(pending.len());
            let batch: Vec<Run> = (0..batch_size)
                .filter_map(|_| pending.pop().map(|Reverse(run)| run))
                .collect();

            let merged = merger.merge(drive, store, batch)?;
            pending.push(Reverse(merged));
        }

        return Ok(pending.pop().map(|Reverse(run)| run));
    }
}
