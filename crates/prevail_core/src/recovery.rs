//! Startup replay of the journal.
//!
//! Recovery walks the journal files in ascending order of their first id,
//! parses every line and feeds the entries to the caller in chunks. The
//! checks it applies along the way:
//!
//! | Condition                                   | Outcome                     |
//! |---------------------------------------------|-----------------------------|
//! | Malformed line                              | fatal                       |
//! | Id not greater than the previous id         | fatal                       |
//! | First id of a file differs from its name    | fatal                       |
//! | Unterminated final line of the last file    | truncated, warning          |
//! | Unterminated line anywhere else             | fatal                       |
//! | Id greater than previous + 1                | gap recorded, warning       |
//! | Empty file                                  | accepted                    |
//!
//! The counter is restored to the highest id seen, not to the number of
//! entries, so a gap never causes an id to be reused.

use crate::dir::JournalFile;
use crate::error::{CoreError, CoreResult};
use crate::journal::{truncate_file, JournalEntry, JournalLines};
use crate::types::TransactionId;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// A hole in the id sequence found during recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdGap {
    /// Id that should have come next.
    pub expected: TransactionId,
    /// Id that was found instead.
    pub found: TransactionId,
    /// File containing the entry with the `found` id.
    pub path: PathBuf,
}

impl IdGap {
    /// Number of ids missing.
    #[must_use]
    pub fn missing(&self) -> u64 {
        self.found.as_u64() - self.expected.as_u64()
    }
}

/// An interrupted write discarded from the end of the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornTail {
    /// File that was truncated.
    pub path: PathBuf,
    /// Length the file was truncated to.
    pub truncated_to: u64,
    /// Number of bytes discarded.
    pub discarded_bytes: u64,
}

/// What recovery found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of journal files read.
    pub files: usize,
    /// Number of entries replayed.
    pub transactions: u64,
    /// Highest id replayed, if any.
    pub last_id: Option<TransactionId>,
    /// Holes in the id sequence.
    pub gaps: Vec<IdGap>,
    /// Interrupted write removed from the last file, if any.
    pub torn_tail: Option<TornTail>,
}

impl RecoveryReport {
    /// Returns true if recovery saw no gaps and no torn tail.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.gaps.is_empty() && self.torn_tail.is_none()
    }
}

/// Replays `files` (sorted ascending by first id) into `apply`.
///
/// Entries are grouped per file into chunks of at most `chunk_size`.
/// Errors from `apply` are reported as recovery failures of the file being
/// replayed.
///
/// # Errors
///
/// Returns [`CoreError::Recovery`] on any fatal condition listed in the
/// module documentation.
pub fn replay_directory(
    files: &[JournalFile],
    chunk_size: usize,
    apply: &mut dyn FnMut(&[JournalEntry]) -> CoreResult<()>,
) -> CoreResult<RecoveryReport> {
    let chunk_size = chunk_size.max(1);
    let mut report = RecoveryReport::default();
    let mut chunk = Vec::with_capacity(chunk_size);

    for (index, file) in files.iter().enumerate() {
        let is_last_file = index + 1 == files.len();
        debug!(path = %file.path.display(), "replaying journal file");
        report.files += 1;

        let mut first_in_file = true;
        for line in JournalLines::open(&file.path)? {
            let line = line?;

            if !line.terminated {
                if !is_last_file {
                    return Err(CoreError::recovery(
                        &file.path,
                        format!("line {}: unterminated line before the last file", line.number),
                    ));
                }
                let discarded = line.len;
                warn!(
                    path = %file.path.display(),
                    offset = line.offset,
                    bytes = discarded,
                    "discarding interrupted write at end of journal"
                );
                truncate_file(&file.path, line.offset)?;
                report.torn_tail = Some(TornTail {
                    path: file.path.clone(),
                    truncated_to: line.offset,
                    discarded_bytes: discarded,
                });
                break;
            }

            let entry = line.parse(&file.path)?;

            if first_in_file && entry.id != file.first_id {
                return Err(CoreError::recovery(
                    &file.path,
                    format!(
                        "line {}: first entry has id {} but the file is named for id {}",
                        line.number,
                        entry.id.as_u64(),
                        file.first_id.as_u64()
                    ),
                ));
            }
            first_in_file = false;

            let expected = report.last_id.map_or(TransactionId::new(1), TransactionId::next);
            if let Some(previous) = report.last_id {
                if entry.id <= previous {
                    return Err(CoreError::recovery(
                        &file.path,
                        format!(
                            "line {}: id {} does not follow id {}",
                            line.number,
                            entry.id.as_u64(),
                            previous.as_u64()
                        ),
                    ));
                }
            }
            if entry.id > expected {
                warn!(
                    path = %file.path.display(),
                    expected = expected.as_u64(),
                    found = entry.id.as_u64(),
                    "gap in transaction ids"
                );
                report.gaps.push(IdGap {
                    expected,
                    found: entry.id,
                    path: file.path.clone(),
                });
            }

            report.last_id = Some(entry.id);
            report.transactions += 1;
            chunk.push(entry);

            if chunk.len() == chunk_size {
                apply_chunk(&file.path, &mut chunk, apply)?;
            }
        }

        if !chunk.is_empty() {
            apply_chunk(&file.path, &mut chunk, apply)?;
        }
    }

    info!(
        files = report.files,
        transactions = report.transactions,
        last_id = report.last_id.map_or(0, TransactionId::as_u64),
        gaps = report.gaps.len(),
        "recovery complete"
    );
    Ok(report)
}

fn apply_chunk(
    path: &std::path::Path,
    chunk: &mut Vec<JournalEntry>,
    apply: &mut dyn FnMut(&[JournalEntry]) -> CoreResult<()>,
) -> CoreResult<()> {
    let result = apply(chunk);
    let first = chunk.first().map_or(0, |e| e.id.as_u64());
    let last = chunk.last().map_or(0, |e| e.id.as_u64());
    chunk.clear();
    result.map_err(|e| match e {
        CoreError::Recovery { .. } => e,
        other => CoreError::recovery(path, format!("replaying ids {first}..={last}: {other}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::list_journal_files;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn replay(dir: &Path, chunk_size: usize) -> CoreResult<(RecoveryReport, Vec<Vec<u64>>)> {
        let mut chunks = Vec::new();
        let report = replay_directory(&list_journal_files(dir)?, chunk_size, &mut |chunk| {
            chunks.push(chunk.iter().map(|e| e.id.as_u64()).collect());
            Ok(())
        })?;
        Ok((report, chunks))
    }

    #[test]
    fn empty_directory() {
        let temp = tempdir().unwrap();
        let (report, chunks) = replay(temp.path(), 10).unwrap();
        assert_eq!(report, RecoveryReport::default());
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunks_do_not_span_files() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join("1.journal"),
            "(credit 1) ;1\n(credit 1) ;2\n(credit 1) ;3\n",
        )
        .unwrap();
        fs::write(temp.path().join("4.journal"), "(debit 1) ;4\n").unwrap();

        let (report, chunks) = replay(temp.path(), 2).unwrap();
        assert_eq!(chunks, vec![vec![1, 2], vec![3], vec![4]]);
        assert_eq!(report.files, 2);
        assert_eq!(report.transactions, 4);
        assert_eq!(report.last_id, Some(TransactionId::new(4)));
        assert!(report.is_clean());
    }

    #[test]
    fn gap_is_recorded_and_counter_uses_max_id() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("1.journal"), "(credit 1) ;1\n(credit 1) ;2\n").unwrap();
        fs::write(temp.path().join("5.journal"), "(credit 1) ;5\n").unwrap();

        let (report, _) = replay(temp.path(), 10).unwrap();
        assert_eq!(report.transactions, 3);
        assert_eq!(report.last_id, Some(TransactionId::new(5)));
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].expected, TransactionId::new(3));
        assert_eq!(report.gaps[0].missing(), 2);
    }

    #[test]
    fn non_increasing_id_is_fatal() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("1.journal"), "(credit 1) ;1\n(credit 1) ;1\n").unwrap();

        let err = replay(temp.path(), 10).unwrap_err();
        assert!(matches!(err, CoreError::Recovery { .. }), "{err}");
    }

    #[test]
    fn file_name_mismatch_is_fatal() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("1.journal"), "(credit 1) ;2\n").unwrap();

        let err = replay(temp.path(), 10).unwrap_err();
        assert!(err.to_string().contains("named for id 1"), "{err}");
    }

    #[test]
    fn malformed_line_is_fatal() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("1.journal"), "(credit 1) ;1\n(credit ;2\n").unwrap();

        let err = replay(temp.path(), 10).unwrap_err();
        match err {
            CoreError::Recovery { path, message } => {
                assert_eq!(path, temp.path().join("1.journal"));
                assert!(message.starts_with("line 2"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn torn_tail_of_last_file_is_truncated() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("1.journal");
        fs::write(&path, "(credit 1) ;1\n(credit 1) ;2\n(cre").unwrap();

        let (report, chunks) = replay(temp.path(), 10).unwrap();
        assert_eq!(chunks, vec![vec![1, 2]]);
        let torn = report.torn_tail.unwrap();
        assert_eq!(torn.truncated_to, 28);
        assert_eq!(torn.discarded_bytes, 4);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "(credit 1) ;1\n(credit 1) ;2\n"
        );
    }

    #[test]
    fn torn_line_in_earlier_file_is_fatal() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("1.journal"), "(credit 1) ;1\n(cre").unwrap();
        fs::write(temp.path().join("2.journal"), "(credit 1) ;2\n").unwrap();

        assert!(matches!(
            replay(temp.path(), 10),
            Err(CoreError::Recovery { .. })
        ));
    }

    #[test]
    fn empty_files_are_accepted() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("1.journal"), "(credit 1) ;1\n").unwrap();
        fs::write(temp.path().join("2.journal"), "").unwrap();

        let (report, _) = replay(temp.path(), 10).unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.last_id, Some(TransactionId::new(1)));
    }

    #[test]
    fn apply_error_names_file_and_ids() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("1.journal"), "(credit 1) ;1\n").unwrap();

        let files = list_journal_files(temp.path()).unwrap();
        let err = replay_directory(&files, 10, &mut |_| {
            Err(CoreError::UnknownOperation {
                name: "credit".to_string(),
            })
        })
        .unwrap_err();
        assert!(err.to_string().contains("ids 1..=1"), "{err}");
    }
}
