//! `page-merge-sort` is a balanced k-way external merge sort of numeric record files that accounts for every
//! drive access.
//!
//! External sorting is required when the data being sorted does not fit into main memory and must reside on a
//! slower external storage. The input is read in blocks of `b * n` records, where `b` is the number of records
//! in a page buffer and `n` the number of page buffers. Every block is sorted in memory and saved as a run.
//! Runs are then merged, the oldest `n - 1` at a time, until a single sorted run is left.
//!
//! All drive transfers go through pages bounded by a record count and a byte capacity. Every page read, page
//! write and merge pass is counted, so the measured number of drive operations can be compared with the
//! analytical estimate `2 * (N / (b * log2(n))) * log2(N / b)`.
//!
//! # Records
//!
//! A record is a line of digits at even character positions separated by any character, for example
//! `3 1 4 1 5`. Records are ordered by their digits sorted in descending order, see [`Record::compare`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use page_merge_sort::ExternalSorterBuilder;
//!
//! fn main() {
//!     let sorter = ExternalSorterBuilder::new()
//!         .with_page_records(250)
//!         .with_buffers(20)
//!         .with_tmp_dir(Path::new("./"))
//!         .build()
//!         .unwrap();
//!
//!     let report = sorter.sort(Path::new("input.txt"), Path::new("output.txt")).unwrap();
//!
//!     println!(
//!         "drive operations: {} (expected: {:.0})",
//!         report.drive_operations(),
//!         report.expected_drive_operations
//!     );
//! }
//! ```

pub mod buffer;
pub mod merger;
pub mod page;
pub mod record;
pub mod run;
pub mod sort;
pub mod stats;

pub use buffer::{read_block, read_block_queue, write_block, BlockBuffer};
pub use merger::RunMerger;
pub use page::{Drive, PageReader, PageWriter};
pub use record::{MalformedRecordError, Record};
pub use run::{generate_runs, Run, RunStore};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError};
pub use stats::{expected_drive_operations, DriveStats, SortReport};
