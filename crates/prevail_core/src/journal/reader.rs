//! Streaming journal line reader.
//!
//! Journal files are read one line at a time so that replay memory stays
//! bounded by the chunk size, not by the size of the journal.

use crate::error::{CoreError, CoreResult};
use crate::journal::JournalEntry;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Read buffer size for journal files.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// One physical line of a journal file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based line number within the file.
    pub number: u64,
    /// Byte offset of the start of the line.
    pub offset: u64,
    /// Length of the line in bytes, without the terminating newline.
    pub len: u64,
    /// Line text without the terminating newline. An unterminated line is
    /// decoded lossily since a crash may have cut a character in half.
    pub text: String,
    /// Whether the line ended with `\n`. Only the final line of a file
    /// interrupted mid-write can be unterminated.
    pub terminated: bool,
}

impl RawLine {
    /// Parses the line into a journal entry.
    ///
    /// # Errors
    ///
    /// Returns a recovery error naming the file and line number.
    pub fn parse(&self, path: &Path) -> CoreResult<JournalEntry> {
        JournalEntry::parse(&self.text).map_err(|e| {
            CoreError::recovery(path, format!("line {}: {e}", self.number))
        })
    }
}

/// Iterator over the lines of one journal file.
///
/// # Example
///
/// ```ignore
/// for line in JournalLines::open(&path)? {
///     let line = line?;
///     let entry = line.parse(&path)?;
/// }
/// ```
pub struct JournalLines {
    reader: BufReader<File>,
    path: PathBuf,
    line_number: u64,
    offset: u64,
    finished: bool,
}

impl JournalLines {
    /// Opens a journal file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, file),
            path: path.to_path_buf(),
            line_number: 0,
            offset: 0,
            finished: false,
        })
    }

    fn read_next(&mut self) -> CoreResult<Option<RawLine>> {
        let mut buf = Vec::new();
        let read = self.reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(None);
        }

        let offset = self.offset;
        self.offset += read as u64;
        self.line_number += 1;

        let terminated = buf.last() == Some(&b'\n');
        if terminated {
            buf.pop();
        }

        let len = buf.len() as u64;
        let text = if terminated {
            String::from_utf8(buf).map_err(|_| {
                CoreError::recovery(
                    &self.path,
                    format!("line {}: not valid UTF-8", self.line_number),
                )
            })?
        } else {
            String::from_utf8_lossy(&buf).into_owned()
        };

        Ok(Some(RawLine {
            number: self.line_number,
            offset,
            len,
            text,
            terminated,
        }))
    }
}

impl Iterator for JournalLines {
    type Item = CoreResult<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Cuts a journal file back to `len` bytes and syncs it.
///
/// Used to drop the fragment of a write interrupted by a crash.
pub(crate) fn truncate_file(path: &Path, len: u64) -> CoreResult<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reads_terminated_lines_with_offsets() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("1.journal");
        fs::write(&path, "(credit 10) ;1\n(debit 3) ;2\n").unwrap();

        let lines: Vec<RawLine> = JournalLines::open(&path)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "(credit 10) ;1");
        assert_eq!(lines[0].offset, 0);
        assert_eq!(lines[1].number, 2);
        assert_eq!(lines[1].offset, 15);
        assert!(lines.iter().all(|l| l.terminated));
    }

    #[test]
    fn detects_unterminated_tail() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("1.journal");
        fs::write(&path, "(credit 10) ;1\n(debit 3) ;").unwrap();

        let lines: Vec<RawLine> = JournalLines::open(&path)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();

        assert_eq!(lines.len(), 2);
        assert!(!lines[1].terminated);
        assert_eq!(lines[1].text, "(debit 3) ;");
    }

    #[test]
    fn unterminated_tail_may_cut_a_character() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("1.journal");
        fs::write(&path, b"(credit 10) ;1\n(note \"caf\xC3").unwrap();

        let lines: Vec<RawLine> = JournalLines::open(&path)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();

        assert_eq!(lines.len(), 2);
        assert!(!lines[1].terminated);
        assert_eq!(lines[1].len, 11);
        assert_eq!(lines[1].text, "(note \"caf\u{fffd}");
    }

    #[test]
    fn invalid_utf8_in_terminated_line_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("1.journal");
        fs::write(&path, b"(note \"caf\xC3\") ;1\n").unwrap();

        let err = JournalLines::open(&path).unwrap().next().unwrap().unwrap_err();
        assert!(err.to_string().contains("line 1: not valid UTF-8"), "{err}");
    }

    #[test]
    fn empty_file_has_no_lines() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("1.journal");
        fs::write(&path, "").unwrap();

        assert_eq!(JournalLines::open(&path).unwrap().count(), 0);
    }

    #[test]
    fn parse_reports_line_number() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("1.journal");
        fs::write(&path, "(credit 10) ;1\ngarbage\n").unwrap();

        let lines: Vec<RawLine> = JournalLines::open(&path)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();

        assert!(lines[0].parse(&path).is_ok());
        let err = lines[1].parse(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn truncate_drops_tail() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("1.journal");
        fs::write(&path, "(credit 10) ;1\n(deb").unwrap();

        truncate_file(&path, 15).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "(credit 10) ;1\n");
    }
}
