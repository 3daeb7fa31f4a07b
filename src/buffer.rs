//! In-memory blocks and block-level drive access.
//!
//! A block is assembled from, and flushed as, a sequence of pages.

use std::collections::VecDeque;
use std::io::prelude::*;

use rayon;

use crate::page::{Drive, PageReader, PageWriter};
use crate::record::Record;
use crate::sort::SortError;

/// Block of records limited by record count.
pub struct BlockBuffer {
    limit: usize,
    inner: Vec<Record>,
}

impl BlockBuffer {
    pub fn with_capacity(limit: usize) -> Self {
        BlockBuffer {
            limit,
            inner: Vec::with_capacity(limit),
        }
    }

    /// Adds a new record to the block.
    pub fn push(&mut self, record: Record) {
        self.inner.push(record);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if the block reached the limit.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }

    /// Number of records the block may still take.
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.inner.len())
    }

    pub fn into_inner(self) -> Vec<Record> {
        self.inner
    }
}

impl rayon::slice::ParallelSliceMut<Record> for BlockBuffer {
    fn as_parallel_slice_mut(&mut self) -> &mut [Record] {
        self.inner.as_mut_slice()
    }
}

/// Reads up to `capacity` records page by page, stopping early at the end of the stream.
pub fn read_block<R: Read + Seek>(
    drive: &mut Drive,
    reader: &mut PageReader<R>,
    capacity: usize,
) -> Result<BlockBuffer, SortError> {
    let mut block = BlockBuffer::with_capacity(capacity);

    while !block.is_full() {
        let page = drive.read_page(reader, block.remaining())?;
        for line in page {
            block.push(parse_line(drive, &line)?);
        }

        if reader.is_eof() {
            break;
        }
    }

    return Ok(block);
}

/// Same as [`read_block`] but returns records as a FIFO queue for sequential consumption.
pub fn read_block_queue<R: Read + Seek>(
    drive: &mut Drive,
    reader: &mut PageReader<R>,
    capacity: usize,
) -> Result<VecDeque<Record>, SortError> {
    let mut queue = VecDeque::with_capacity(capacity);

    while queue.len() < capacity {
        let page = drive.read_page(reader, capacity - queue.len())?;
        for line in page {
            queue.push_back(parse_line(drive, &line)?);
        }

        if reader.is_eof() {
            break;
        }
    }

    return Ok(queue);
}

/// Parses a line read from the drive.
///
/// The record must also fit into a page in its run file form, otherwise it could not be read back
/// while merging.
fn parse_line(drive: &Drive, line: &str) -> Result<Record, SortError> {
    let record = Record::parse(line).map_err(SortError::MalformedRecord)?;
    if record.run_len() > drive.page_bytes() {
        return Err(SortError::PageOverflow {
            line_bytes: record.run_len(),
            page_bytes: drive.page_bytes(),
        });
    }

    Ok(record)
}

/// Drains `records` from the end into consecutive pages.
///
/// A page takes records while its accumulated size, accounted as twice the record length, is below the
/// drive page capacity, so every page carries at least one record.
pub fn write_block<W: Write>(
    drive: &mut Drive,
    writer: &mut PageWriter<W>,
    records: &mut Vec<Record>,
) -> Result<(), SortError> {
    while !records.is_empty() {
        let mut page = Vec::new();
        let mut page_size = 0usize;

        while page_size < drive.page_bytes() {
            let record = match records.pop() {
                Some(record) => record,
                None => break,
            };
            page_size = page_size.saturating_add(record.len() * 2);
            page.push(record);
        }

        drive.write_page(writer, &page)?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::io;

    use rayon::slice::ParallelSliceMut;
    use rstest::*;

    use super::{read_block, read_block_queue, write_block, BlockBuffer};
    use crate::page::{Drive, PageReader, PageWriter};
    use crate::record::Record;
    use crate::sort::SortError;

    fn reader(data: &str) -> PageReader<io::Cursor<Vec<u8>>> {
        PageReader::new(io::BufReader::new(io::Cursor::new(data.as_bytes().to_vec())))
    }

    fn records(lines: &[&str]) -> Vec<Record> {
        lines.iter().map(|line| Record::parse(line).unwrap()).collect()
    }

    #[test]
    fn test_block_buffer() {
        let mut buffer = BlockBuffer::with_capacity(2);

        buffer.push(Record::parse("1").unwrap());
        assert_eq!(buffer.is_full(), false);
        assert_eq!(buffer.remaining(), 1);
        buffer.push(Record::parse("9").unwrap());
        assert_eq!(buffer.is_full(), true);
        assert_eq!(buffer.remaining(), 0);

        buffer.par_sort_by(|a, b| b.compare(a));
        assert_eq!(buffer.into_inner(), records(&["9", "1"]));
    }

    #[rstest]
    // the whole input fits into a single page
    #[case(usize::MAX, 3, 1)]
    // one line per page, the run form "1 1 " still fits
    #[case(4, 3, 3)]
    // 2 lines per page
    #[case(6, 3, 2)]
    fn test_read_block_pages(#[case] page_bytes: usize, #[case] capacity: usize, #[case] reads: u64) {
        let mut drive = Drive::new(page_bytes);
        let mut reader = reader("1 1\n2 2\n3 3\n4 4\n5 5\n");

        let block = read_block(&mut drive, &mut reader, capacity).unwrap();

        assert_eq!(block.into_inner(), records(&["1 1", "2 2", "3 3"]));
        assert_eq!(drive.stats().reads, reads);
        assert!(!reader.is_eof());
    }

    #[test]
    fn test_read_block_stops_at_eof() {
        let mut drive = Drive::new(usize::MAX);
        let mut reader = reader("1 1\n2 2\n");

        let first = read_block(&mut drive, &mut reader, 5).unwrap();
        assert_eq!(first.len(), 2);
        assert!(reader.is_eof());

        let second = read_block(&mut drive, &mut reader, 5).unwrap();
        assert!(second.is_empty());
        assert_eq!(drive.stats().reads, 2);
    }

    #[test]
    fn test_read_block_queue() {
        let mut drive = Drive::new(usize::MAX);
        let mut reader = reader("3 0\n1 0\n2 0\n");

        let mut queue = read_block_queue(&mut drive, &mut reader, 2).unwrap();
        assert_eq!(queue.pop_front(), Some(Record::parse("3 0").unwrap()));
        assert_eq!(queue.pop_front(), Some(Record::parse("1 0").unwrap()));
        assert_eq!(queue.pop_front(), None);

        let rest = read_block_queue(&mut drive, &mut reader, 2).unwrap();
        assert_eq!(Vec::from(rest), records(&["2 0"]));
    }

    #[test]
    fn test_read_block_malformed() {
        let mut drive = Drive::new(usize::MAX);
        let mut reader = reader("1 2\nx 2\n");

        match read_block(&mut drive, &mut reader, 10) {
            Err(SortError::MalformedRecord(err)) => assert_eq!(err.position(), 0),
            _ => panic!("malformed record expected"),
        }
    }

    #[test]
    fn test_read_block_run_form_overflow() {
        // "1 2" takes 3 bytes in the input but is written back as "1 2 "
        let mut drive = Drive::new(3);
        let mut reader = reader("1 2\n");

        match read_block(&mut drive, &mut reader, 10) {
            Err(SortError::PageOverflow { line_bytes, page_bytes }) => {
                assert_eq!(line_bytes, 4);
                assert_eq!(page_bytes, 3);
            }
            _ => panic!("page overflow expected"),
        }
    }

    #[test]
    fn test_read_block_queue_run_form_overflow() {
        let mut drive = Drive::new(3);
        let mut reader = reader("1\n2 3\n");

        assert!(matches!(
            read_block_queue(&mut drive, &mut reader, 10),
            Err(SortError::PageOverflow { line_bytes: 4, page_bytes: 3 })
        ));
    }

    #[rstest]
    // unlimited pages: everything in one write
    #[case(usize::MAX, 1)]
    // every record is 3 chars long, accounted as 6 bytes: 2 records per 12 byte page
    #[case(12, 2)]
    #[case(1, 3)]
    fn test_write_block(#[case] page_bytes: usize, #[case] writes: u64) {
        let mut drive = Drive::new(page_bytes);
        let mut writer = PageWriter::new(io::BufWriter::new(Vec::new()));
        let mut block = records(&["3 3", "2 2", "1 1"]);

        write_block(&mut drive, &mut writer, &mut block).unwrap();

        assert!(block.is_empty());
        let written = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(written, "1 1 \n2 2 \n3 3 \n");
        assert_eq!(drive.stats().writes, writes);
    }

    #[test]
    fn test_write_empty_block() {
        let mut drive = Drive::new(usize::MAX);
        let mut writer = PageWriter::new(io::BufWriter::new(Vec::new()));

        write_block(&mut drive, &mut writer, &mut Vec::new()).unwrap();

        assert_eq!(drive.stats().writes, 0);
    }
}
