//! Sorted runs and initial run generation.

use std::cmp::Ordering;
use std::fs;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use log;
use rayon;
use rayon::slice::ParallelSliceMut;
use tempfile;

use crate::buffer::{read_block, write_block};
use crate::page::{Drive, PageReader, PageWriter};
use crate::sort::SortError;

/// Sorted run stored in a file.
///
/// Runs are ordered by level: a run created earlier has a lower level.
#[derive(Debug)]
pub struct Run {
    path: PathBuf,
    level: usize,
    records: u64,
}

impl Run {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Number of records in the run.
    pub fn records(&self) -> u64 {
        self.records
    }
}

impl Eq for Run {}

impl PartialEq<Self> for Run {
    fn eq(&self, other: &Self) -> bool {
        self.level.eq(&other.level)
    }
}

impl PartialOrd<Self> for Run {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Run {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level.cmp(&other.level)
    }
}

/// Temporary run file storage of a single sort invocation.
///
/// Run files are numbered sequentially by level. The directory and everything left in it is removed when
/// the store is dropped.
pub struct RunStore {
    dir: tempfile::TempDir,
    next_level: usize,
    rw_buf_size: Option<usize>,
}

impl RunStore {
    /// Creates a store in a new temporary directory under `tmp_path`, or under the OS temporary directory.
    pub fn new(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> Result<Self, SortError> {
        let dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(SortError::TempDir)?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(RunStore {
            dir,
            next_level: 0,
            rw_buf_size,
        });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Creates the file of a new run with the next level.
    pub fn create(&mut self) -> Result<RunWriter, SortError> {
        let level = self.next_level;
        let path = self.dir.path().join(format!("run-{}.txt", level));
        let writer = PageWriter::create(&path, self.rw_buf_size).map_err(SortError::TempDir)?;
        self.next_level += 1;

        return Ok(RunWriter {
            path,
            level,
            records: 0,
            writer,
        });
    }

    /// Opens a run for page reads.
    pub fn open(&self, run: &Run) -> Result<PageReader, SortError> {
        PageReader::open(run.path(), self.rw_buf_size).map_err(SortError::IO)
    }

    /// Deletes a consumed run.
    pub fn discard(&self, run: Run) -> Result<(), SortError> {
        fs::remove_file(run.path()).map_err(SortError::IO)
    }

    /// Moves the run file to `output`.
    pub fn persist(&self, run: Run, output: &Path) -> Result<(), SortError> {
        if let Err(err) = fs::rename(run.path(), output) {
            log::warn!(
                "renaming {} to {} failed ({}), copying",
                run.path().display(),
                output.display(),
                err
            );
            fs::copy(run.path(), output).map_err(SortError::IO)?;
            self.discard(run)?;
        }

        Ok(())
    }
}

/// Run file being written.
pub struct RunWriter {
    path: PathBuf,
    level: usize,
    records: u64,
    writer: PageWriter,
}

impl RunWriter {
    pub fn page_writer(&mut self) -> &mut PageWriter {
        &mut self.writer
    }

    /// Accounts records written through the page writer.
    pub fn add_records(&mut self, records: usize) {
        self.records += records as u64;
    }

    /// Flushes the file and turns it into a readable run.
    pub fn finish(self) -> Result<Run, SortError> {
        self.writer.finish().map_err(SortError::IO)?;

        return Ok(Run {
            path: self.path,
            level: self.level,
            records: self.records,
        });
    }
}

/// Splits the input into blocks of `block_capacity` records, sorts every block and saves it as a run.
///
/// Blocks are sorted in descending order and drained from their end, so run files are ascending.
pub fn generate_runs<R: Read + Seek>(
    drive: &mut Drive,
    store: &mut RunStore,
    thread_pool: &rayon::ThreadPool,
    input: &mut PageReader<R>,
    block_capacity: usize,
) -> Result<Vec<Run>, SortError> {
    let mut runs = Vec::new();

    while !input.is_eof() {
        let mut block = read_block(drive, input, block_capacity)?;
        if block.is_empty() {
            break;
        }

        log::debug!("sorting block of {} records ...", block.len());
        thread_pool.install(|| {
            block.par_sort_by(|a, b| b.compare(a));
        });
        drive.count_sorting_phase();

        let mut run_writer = store.create()?;
        let mut records = block.into_inner();
        run_writer.add_records(records.len());
        write_block(drive, run_writer.page_writer(), &mut records)?;

        let run = run_writer.finish()?;
        log::debug!("run {} saved ({} records)", run.level(), run.records());
        runs.push(run);
    }

    return Ok(runs);
}
