//! Fixed-format numeric records.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// Record parsing error.
///
/// Raised when a character at a digit position is not an ASCII digit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecordError {
    line: String,
    position: usize,
}

impl MalformedRecordError {
    /// Error for a line that is not valid UTF-8, pointing at the first character that could not be decoded.
    pub(crate) fn invalid_utf8(bytes: &[u8], valid_up_to: usize) -> Self {
        MalformedRecordError {
            line: String::from_utf8_lossy(bytes).into_owned(),
            position: String::from_utf8_lossy(&bytes[..valid_up_to]).chars().count(),
        }
    }

    /// Returns the offending line.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Returns the character position of the invalid digit.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl Error for MalformedRecordError {}

impl Display for MalformedRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed record {:?}: no digit at position {}",
            self.line, self.position
        )
    }
}

/// A record made of single digit values.
///
/// Records are compared by their sort key, the digits sorted in descending order.
/// See [`Record::compare`] for the exact order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    digits: Vec<u8>,
    length: usize,
    sort_key: Vec<u8>,
}

impl Record {
    /// Parses a record from a line.
    ///
    /// Characters at even positions are digit values, odd positions are separators and are ignored.
    /// The line must not contain the line terminator.
    pub fn parse(line: &str) -> Result<Self, MalformedRecordError> {
        let mut digits = Vec::with_capacity(line.len() / 2 + 1);

        for (position, ch) in line.chars().enumerate() {
            if position % 2 != 0 {
                continue;
            }
            match ch.to_digit(10) {
                Some(digit) => digits.push(digit as u8),
                None => {
                    return Err(MalformedRecordError {
                        line: line.to_owned(),
                        position,
                    })
                }
            }
        }

        let mut sort_key = digits.clone();
        sort_key.sort_unstable_by(|a, b| b.cmp(a));

        return Ok(Record {
            digits,
            length: line.len(),
            sort_key,
        });
    }

    /// Digit values in their original order.
    pub fn digits(&self) -> &[u8] {
        &self.digits
    }

    /// Source line length in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Length in bytes of the record's run file line, without the line terminator.
    pub fn run_len(&self) -> usize {
        self.digits.len() * 2
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    /// Digits sorted in descending order.
    pub fn sort_key(&self) -> &[u8] {
        &self.sort_key
    }

    /// Total order used by the sorter.
    ///
    /// If both sort keys are of the same length, the first differing key digit decides and the record
    /// with the larger digit is [`Ordering::Greater`]. Otherwise, or if the keys are identical, the record
    /// with the longer source line is greater. Sorted output is non-decreasing under this order.
    pub fn compare(&self, other: &Record) -> Ordering {
        if self.sort_key.len() == other.sort_key.len() {
            let first_diff = self
                .sort_key
                .iter()
                .zip(other.sort_key.iter())
                .find(|(a, b)| a != b);

            if let Some((a, b)) = first_diff {
                return a.cmp(b);
            }
        }

        self.length.cmp(&other.length)
    }
}

/// Run file form: every digit followed by a single space.
impl Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for digit in &self.digits {
            write!(f, "{} ", digit)?;
        }
        Ok(())
    }
}
