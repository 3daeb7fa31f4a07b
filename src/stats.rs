//! Drive operation accounting.

use std::fmt;
use std::fmt::Display;

/// Physical operation counters of one sort invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveStats {
    /// In-memory block sorts, i.e. initial runs generated.
    pub sorting_phases: u64,
    /// Page reads.
    pub reads: u64,
    /// Page writes.
    pub writes: u64,
    /// Merge passes.
    pub merges: u64,
}

impl DriveStats {
    /// Total number of drive accesses.
    pub fn drive_operations(&self) -> u64 {
        self.reads + self.writes
    }
}

/// Result of a sort invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SortReport {
    /// Number of sorted records (N).
    pub records: u64,
    /// Records per page buffer (b).
    pub page_records: usize,
    /// Number of page buffers (n).
    pub buffers: usize,
    /// Operation counters.
    pub stats: DriveStats,
    /// Analytically expected number of drive operations.
    pub expected_drive_operations: f64,
}

impl SortReport {
    pub(crate) fn new(records: u64, page_records: usize, buffers: usize, stats: DriveStats) -> Self {
        SortReport {
            records,
            page_records,
            buffers,
            stats,
            expected_drive_operations: expected_drive_operations(records, page_records, buffers),
        }
    }

    pub fn drive_operations(&self) -> u64 {
        self.stats.drive_operations()
    }
}

impl Display for SortReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "N={} n={} b={}: sorting phases: {}, reads: {}, writes: {}, merges: {}, drive operations: {} (expected: {:.0})",
            self.records,
            self.buffers,
            self.page_records,
            self.stats.sorting_phases,
            self.stats.reads,
            self.stats.writes,
            self.stats.merges,
            self.drive_operations(),
            self.expected_drive_operations,
        )
    }
}

/// Closed-form estimate of drive operations of a balanced merge sort:
/// `2 * (N / (b * log2(n))) * log2(N / b)`.
///
/// Returns `0.0` where the formula is undefined or negative, that is for `N <= b` or `n < 2`.
pub fn expected_drive_operations(records: u64, page_records: usize, buffers: usize) -> f64 {
    if records == 0 || page_records == 0 || buffers < 2 {
        return 0.0;
    }

    let records = records as f64;
    let page_records = page_records as f64;
    let log_n = (buffers as f64).log2();
    let log_runs = (records / page_records).log2();

    let result = 2.0 * (records / (page_records * log_n)) * log_runs;
    return result.max(0.0);
}
