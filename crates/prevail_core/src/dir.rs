//! Journal directory management.
//!
//! This module handles the file system layout for Prevail:
//!
//! ```text
//! <data_directory>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ 1.journal         # Transactions 1..k
//! ├─ 812.journal       # Transactions 812..m (after a rotation)
//! └─ ...
//! ```
//!
//! Each journal file is named by the id of the first transaction it holds.
//! The `<id>.snapshot` name is reserved and never produced or read.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File names within the data directory.
const LOCK_FILE: &str = "LOCK";
/// Extension of journal files.
pub const JOURNAL_EXTENSION: &str = "journal";
/// Extension reserved for state snapshots.
pub const SNAPSHOT_EXTENSION: &str = "snapshot";

/// A journal file found in the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalFile {
    /// Id of the first transaction recorded in the file.
    pub first_id: TransactionId,
    /// Full path of the file.
    pub path: PathBuf,
}

/// Manages the data directory and its lock.
///
/// # Thread Safety
///
/// The `JournalDir` holds an exclusive lock on the directory. Only one
/// `JournalDir` instance can exist per directory at a time, across
/// processes.
#[derive(Debug)]
pub struct JournalDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl JournalDir {
    /// Opens or creates a data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path exists but is not a directory
    /// - Another engine holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::config(format!(
                    "data directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::config(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the journal file starting at `first_id`.
    #[must_use]
    pub fn journal_path(&self, first_id: TransactionId) -> PathBuf {
        journal_path(&self.path, first_id)
    }

    /// Lists the journal files in ascending order of their first id.
    pub fn journals(&self) -> CoreResult<Vec<JournalFile>> {
        list_journal_files(&self.path)
    }
}

/// Returns the path of the journal file starting at `first_id` in `dir`.
#[must_use]
pub fn journal_path(dir: &Path, first_id: TransactionId) -> PathBuf {
    dir.join(format!("{}.{JOURNAL_EXTENSION}", first_id.as_u64()))
}

/// Parses the starting id from a journal file name such as `812.journal`.
///
/// Returns `None` for anything that is not `<decimal id>.journal`.
#[must_use]
pub fn parse_journal_name(file_name: &str) -> Option<TransactionId> {
    let stem = file_name.strip_suffix(JOURNAL_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok().map(TransactionId::new)
}

/// Lists journal files in `dir` sorted ascending by their first id.
///
/// This does not take the directory lock, so tools can inspect a journal
/// while an engine is running.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_journal_files(dir: &Path) -> CoreResult<Vec<JournalFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        match parse_journal_name(name) {
            Some(first_id) => files.push(JournalFile {
                first_id,
                path: entry.path(),
            }),
            None if name.ends_with(SNAPSHOT_EXTENSION) => {
                debug!(file = name, "ignoring snapshot file");
            }
            None => {}
        }
    }

    files.sort_by_key(|f| f.first_id);
    Ok(files)
}

/// Syncs a directory so that file creations in it are durable.
///
/// On Windows, directory fsync is not supported in the same way as Unix.
/// NTFS journaling covers metadata durability, so the sync is skipped.
#[cfg(unix)]
pub(crate) fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}
