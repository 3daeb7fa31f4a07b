//! Page-bounded drive access.
//!
//! Every call of [`Drive::read_page`] or [`Drive::write_page`] models one physical drive operation and is
//! counted in the drive's [`DriveStats`] regardless of the amount of data transferred.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use log;

use crate::record::{MalformedRecordError, Record};
use crate::sort::SortError;
use crate::stats::DriveStats;

/// Line reader of a run or input file that can give back the last read line.
pub struct PageReader<R: Read + Seek = fs::File> {
    reader: io::BufReader<R>,
    eof: bool,
}

impl PageReader<fs::File> {
    /// Opens a file for page reads.
    pub fn open(path: &Path, buf_size: Option<usize>) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        return Ok(match buf_size {
            Some(buf_size) => PageReader::new(io::BufReader::with_capacity(buf_size, file)),
            None => PageReader::new(io::BufReader::new(file)),
        });
    }
}

impl<R: Read + Seek> PageReader<R> {
    pub fn new(reader: io::BufReader<R>) -> Self {
        PageReader { reader, eof: false }
    }

    /// Returns `true` once a read hit the end of the stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

/// Line writer of a run or output file.
pub struct PageWriter<W: Write = fs::File> {
    writer: io::BufWriter<W>,
}

impl PageWriter<fs::File> {
    /// Creates (or truncates) a file for page writes.
    pub fn create(path: &Path, buf_size: Option<usize>) -> io::Result<Self> {
        let file = fs::File::create(path)?;
        return Ok(match buf_size {
            Some(buf_size) => PageWriter::new(io::BufWriter::with_capacity(buf_size, file)),
            None => PageWriter::new(io::BufWriter::new(file)),
        });
    }
}

impl<W: Write> PageWriter<W> {
    pub fn new(writer: io::BufWriter<W>) -> Self {
        PageWriter { writer }
    }

    /// Flushes buffered pages and returns the underlying writer.
    pub fn finish(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|err| err.into_error())
    }
}

/// Simulated drive with a bounded page size.
///
/// Owns the operation counters of a single sort invocation.
#[derive(Debug)]
pub struct Drive {
    /// Page capacity in bytes.
    page_bytes: usize,
    stats: DriveStats,
}

impl Drive {
    pub fn new(page_bytes: usize) -> Self {
        Drive {
            page_bytes,
            stats: DriveStats::default(),
        }
    }

    pub fn page_bytes(&self) -> usize {
        self.page_bytes
    }

    pub fn stats(&self) -> DriveStats {
        self.stats
    }

    pub(crate) fn count_sorting_phase(&mut self) {
        self.stats.sorting_phases += 1;
    }

    pub(crate) fn count_merge(&mut self) {
        self.stats.merges += 1;
    }

    /// Reads one page of raw lines.
    ///
    /// Lines are accepted while their total length stays within the page capacity and their count within
    /// `max_records`. The first line that does not fit is pushed back to the stream. End of stream yields a
    /// partial (possibly empty) page and marks the reader as exhausted.
    pub fn read_page<R: Read + Seek>(
        &mut self,
        page_reader: &mut PageReader<R>,
        max_records: usize,
    ) -> Result<Vec<String>, SortError> {
        self.stats.reads += 1;

        let mut page = Vec::new();
        let mut page_size = 0;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = page_reader
                .reader
                .read_until(b'\n', &mut buf)
                .map_err(SortError::IO)?;
            if read == 0 {
                page_reader.eof = true;
                break;
            }

            let line = trim_line_end(&buf);
            let line_bytes = line.len();

            if page_size + line_bytes > self.page_bytes || page.len() >= max_records {
                if page.is_empty() && line_bytes > self.page_bytes {
                    return Err(SortError::PageOverflow {
                        line_bytes,
                        page_bytes: self.page_bytes,
                    });
                }
                page_reader
                    .reader
                    .seek_relative(-(read as i64))
                    .map_err(SortError::IO)?;
                break;
            }

            let line = String::from_utf8(line.to_vec()).map_err(|err| {
                let valid_up_to = err.utf8_error().valid_up_to();
                SortError::MalformedRecord(MalformedRecordError::invalid_utf8(err.as_bytes(), valid_up_to))
            })?;
            page_size += line_bytes;
            page.push(line);
        }

        log::trace!("page read: {} lines, {} bytes", page.len(), page_size);

        return Ok(page);
    }

    /// Writes one page, a record per line.
    pub fn write_page<W: Write>(
        &mut self,
        page_writer: &mut PageWriter<W>,
        records: &[Record],
    ) -> Result<(), SortError> {
        for record in records {
            writeln!(page_writer.writer, "{}", record).map_err(SortError::IO)?;
        }
        self.stats.writes += 1;

        log::trace!("page write: {} records", records.len());

        return Ok(());
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{Drive, PageReader, PageWriter};
    use crate::record::Record;
    use crate::sort::SortError;

    fn reader(data: &str) -> PageReader<io::Cursor<Vec<u8>>> {
        PageReader::new(io::BufReader::new(io::Cursor::new(data.as_bytes().to_vec())))
    }

    #[rstest]
    // bounded by record count
    #[case(usize::MAX, 2, vec![vec!["1 2", "3 4"], vec!["5 6", "7 8"], vec!["9"]])]
    // bounded by page bytes: 3 + 3 + 3 > 8
    #[case(8, 10, vec![vec!["1 2", "3 4"], vec!["5 6", "7 8", "9"]])]
    // both bounds, record count binds first
    #[case(9, 1, vec![vec!["1 2"], vec!["3 4"], vec!["5 6"], vec!["7 8"], vec!["9"]])]
    fn test_read_pages(
        #[case] page_bytes: usize,
        #[case] max_records: usize,
        #[case] expected: Vec<Vec<&str>>,
    ) {
        let mut drive = Drive::new(page_bytes);
        let mut reader = reader("1 2\n3 4\n5 6\n7 8\n9\n");

        let mut pages = Vec::new();
        while !reader.is_eof() {
            pages.push(drive.read_page(&mut reader, max_records).unwrap());
        }

        assert_eq!(pages, expected);
        assert_eq!(drive.stats().reads, expected.len() as u64);
        assert_eq!(drive.stats().writes, 0);
    }

    #[test]
    fn test_read_page_counts_empty_reads() {
        let mut drive = Drive::new(usize::MAX);
        let mut reader = reader("");

        assert!(drive.read_page(&mut reader, 10).unwrap().is_empty());
        assert!(reader.is_eof());
        assert!(drive.read_page(&mut reader, 10).unwrap().is_empty());
        assert_eq!(drive.stats().reads, 2);
    }

    #[test]
    fn test_read_page_exact_fit_is_not_eof() {
        let mut drive = Drive::new(usize::MAX);
        let mut reader = reader("1\n2\n3\n");

        assert_eq!(drive.read_page(&mut reader, 2).unwrap(), vec!["1", "2"]);
        assert!(!reader.is_eof());
        assert_eq!(drive.read_page(&mut reader, 2).unwrap(), vec!["3"]);
        assert!(reader.is_eof());
    }

    #[test]
    fn test_read_page_strips_crlf_and_last_newline() {
        let mut drive = Drive::new(usize::MAX);
        let mut reader = reader("1 2\r\n3 4");

        assert_eq!(drive.read_page(&mut reader, 10).unwrap(), vec!["1 2", "3 4"]);
        assert!(reader.is_eof());
    }

    #[test]
    fn test_read_page_overflow() {
        let mut drive = Drive::new(4);
        let mut reader = reader("1 2 3\n");

        match drive.read_page(&mut reader, 10) {
            Err(SortError::PageOverflow { line_bytes, page_bytes }) => {
                assert_eq!(line_bytes, 5);
                assert_eq!(page_bytes, 4);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_read_page_invalid_utf8() {
        let mut drive = Drive::new(usize::MAX);
        let mut reader = PageReader::new(io::BufReader::new(io::Cursor::new(b"1 2\n3 \xff\n".to_vec())));

        match drive.read_page(&mut reader, 10) {
            Err(SortError::MalformedRecord(err)) => assert_eq!(err.position(), 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_read_page_counts_bytes() {
        // "1\u{b7}2" is 4 bytes long
        let mut drive = Drive::new(7);
        let mut reader = reader("1\u{b7}2\n3\u{b7}4\n");

        let page = drive.read_page(&mut reader, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(Record::parse(&page[0]).unwrap().len(), 4);
        assert!(!reader.is_eof());
    }

    #[test]
    fn test_write_page() {
        let mut drive = Drive::new(usize::MAX);
        let mut writer = PageWriter::new(io::BufWriter::new(Vec::new()));
        let records = vec![Record::parse("1 2").unwrap(), Record::parse("3-4-").unwrap()];

        drive.write_page(&mut writer, &records).unwrap();
        drive.write_page(&mut writer, &[]).unwrap();

        let written = writer.finish().unwrap();
        assert_eq!(String::from_utf8(written).unwrap(), "1 2 \n3 4 \n");
        assert_eq!(drive.stats().writes, 2);
        assert_eq!(drive.stats().reads, 0);
    }
}
