//! K-way run merger.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

use log;

use crate::buffer::{read_block_queue, write_block};
use crate::page::{Drive, PageReader};
use crate::record::Record;
use crate::run::{Run, RunStore, RunWriter};
use crate::sort::SortError;

/// Head record of a merged run.
struct HeadRecord {
    record: Record,
    input: usize,
}

impl Eq for HeadRecord {}

impl PartialEq<Self> for HeadRecord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd<Self> for HeadRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeadRecord {
    // equal records are taken from the run listed first
    fn cmp(&self, other: &Self) -> Ordering {
        self.record
            .compare(&other.record)
            .then_with(|| self.input.cmp(&other.input))
    }
}

/// Run being merged together with its lookahead buffer.
struct MergeInput {
    reader: PageReader,
    lookahead: VecDeque<Record>,
}

impl MergeInput {
    /// Takes the next record, refilling the lookahead from the drive when it runs empty.
    fn next(&mut self, drive: &mut Drive, page_records: usize) -> Result<Option<Record>, SortError> {
        if self.lookahead.is_empty() && !self.reader.is_eof() {
            self.lookahead = read_block_queue(drive, &mut self.reader, page_records)?;
        }

        Ok(self.lookahead.pop_front())
    }
}

/// Binary heap merger of sorted runs.
///
/// Every run is read through a lookahead buffer of `page_records` records and the merged output is written
/// through an output buffer of the same size. Time complexity is *m* \* log(*k*) where *m* is the number of
/// records and *k* is the number of merged runs.
pub struct RunMerger {
    page_records: usize,
}

impl RunMerger {
    pub fn new(page_records: usize) -> Self {
        RunMerger { page_records }
    }

    /// Merges `runs` into a single new run of the store.
    ///
    /// The input runs are deleted once merged. Counts exactly one merge operation.
    pub fn merge(&self, drive: &mut Drive, store: &mut RunStore, runs: Vec<Run>) -> Result<Run, SortError> {
        let mut inputs = Vec::with_capacity(runs.len());
        let mut heads = BinaryHeap::with_capacity(runs.len());

        for run in &runs {
            let mut input = MergeInput {
                reader: store.open(run)?,
                lookahead: VecDeque::new(),
            };
            if let Some(record) = input.next(drive, self.page_records)? {
                heads.push(Reverse(HeadRecord {
                    record,
                    input: inputs.len(),
                }));
            }
            inputs.push(input);
        }

        let mut run_writer = store.create()?;
        let mut output = Vec::with_capacity(self.page_records);

        while let Some(Reverse(head)) = heads.pop() {
            output.push(head.record);

            if output.len() >= self.page_records {
                self.flush(drive, &mut run_writer, &mut output)?;
            }

            if let Some(record) = inputs[head.input].next(drive, self.page_records)? {
                heads.push(Reverse(HeadRecord {
                    record,
                    input: head.input,
                }));
            }
        }

        self.flush(drive, &mut run_writer, &mut output)?;
        drop(inputs);

        let merged = run_writer.finish()?;
        drive.count_merge();

        log::debug!(
            "runs {:?} merged into run {} ({} records)",
            runs.iter().map(Run::level).collect::<Vec<_>>(),
            merged.level(),
            merged.records()
        );

        for run in runs {
            store.discard(run)?;
        }

        return Ok(merged);
    }

    fn flush(
        &self,
        drive: &mut Drive,
        run_writer: &mut RunWriter,
        output: &mut Vec<Record>,
    ) -> Result<(), SortError> {
        if output.is_empty() {
            return Ok(());
        }

        // write_block drains from the end
        output.reverse();
        run_writer.add_records(output.len());
        write_block(drive, run_writer.page_writer(), output)
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rand::Rng;
    use rstest::*;

    use super::RunMerger;
    use crate::page::Drive;
    use crate::record::Record;
    use crate::run::{Run, RunStore};

    #[fixture]
    fn store() -> RunStore {
        RunStore::new(None, None).unwrap()
    }

    fn save_run(store: &mut RunStore, lines: &[&str]) -> Run {
        let records: Vec<Record> = lines.iter().map(|line| Record::parse(line).unwrap()).collect();
        let mut run_writer = store.create().unwrap();
        Drive::new(usize::MAX)
            .write_page(run_writer.page_writer(), &records)
            .unwrap();
        run_writer.add_records(records.len());
        run_writer.finish().unwrap()
    }

    fn read_lines(run: &Run) -> Vec<String> {
        fs::read_to_string(run.path())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[rstest]
    fn test_merge_ties(mut store: RunStore) {
        let run_a = save_run(&mut store, &["2 1", "9 5"]);
        let run_b = save_run(&mut store, &["8 8", "5 9"]);
        let mut drive = Drive::new(usize::MAX);

        let merged = RunMerger::new(250).merge(&mut drive, &mut store, vec![run_a, run_b]).unwrap();

        assert_eq!(read_lines(&merged), vec!["2 1 ", "8 8 ", "9 5 ", "5 9 "]);
        assert_eq!(merged.records(), 4);
        assert_eq!(drive.stats().merges, 1);
    }

    #[rstest]
    fn test_merge_deletes_inputs(mut store: RunStore) {
        let run_a = save_run(&mut store, &["1 1"]);
        let run_b = save_run(&mut store, &[]);
        let paths = vec![run_a.path().to_path_buf(), run_b.path().to_path_buf()];
        let mut drive = Drive::new(usize::MAX);

        let merged = RunMerger::new(4).merge(&mut drive, &mut store, vec![run_a, run_b]).unwrap();

        assert_eq!(merged.level(), 2);
        assert_eq!(read_lines(&merged), vec!["1 1 "]);
        assert!(paths.iter().all(|path| !path.exists()));
    }

    #[rstest]
    // a lookahead holds the whole run: a single read per run hits the end
    #[case(10, 2, 1)]
    // 2 record pages: 2 reads per run, output flushed in 3 pages
    #[case(2, 4, 3)]
    fn test_merge_counters(
        mut store: RunStore,
        #[case] page_records: usize,
        #[case] reads: u64,
        #[case] writes: u64,
    ) {
        let run_a = save_run(&mut store, &["1 1", "3 3", "5 5"]);
        let run_b = save_run(&mut store, &["2 2", "4 4", "6 6"]);
        let mut drive = Drive::new(usize::MAX);

        let merged = RunMerger::new(page_records)
            .merge(&mut drive, &mut store, vec![run_a, run_b])
            .unwrap();

        assert_eq!(read_lines(&merged), vec!["1 1 ", "2 2 ", "3 3 ", "4 4 ", "5 5 ", "6 6 "]);
        assert_eq!(drive.stats().reads, reads);
        assert_eq!(drive.stats().writes, writes);
        assert_eq!(drive.stats().merges, 1);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(64)]
    fn test_merge_equals_in_memory_sort(mut store: RunStore, #[case] page_records: usize) {
        let mut rng = rand::thread_rng();
        let mut all = Vec::new();
        let mut runs = Vec::new();

        for _ in 0..5 {
            let size = rng.gen_range(0..40);
            let mut records: Vec<Record> = (0..size)
                .map(|_| {
                    let digits = rng.gen_range(1..4);
                    let line: Vec<String> = (0..digits).map(|_| rng.gen_range(0..10).to_string()).collect();
                    Record::parse(&line.join(" ")).unwrap()
                })
                .collect();
            records.sort_by(Record::compare);

            let lines: Vec<String> = records.iter().map(Record::to_string).collect();
            let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
            runs.push(save_run(&mut store, &lines));
            all.extend(lines.iter().map(|line| Record::parse(line).unwrap()));
        }

        all.sort_by(Record::compare);
        let expected: Vec<String> = all.iter().map(Record::to_string).collect();

        let mut drive = Drive::new(usize::MAX);
        let merged = RunMerger::new(page_records).merge(&mut drive, &mut store, runs).unwrap();

        assert_eq!(read_lines(&merged), expected);
    }
}
