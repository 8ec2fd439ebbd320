//! The transaction journal.
//!
//! Every successful transaction is recorded as one text line of the form
//! `(<operation> <args>...) ;<id>` in an append-only journal file. Replaying
//! the lines in order rebuilds the state.
//!
//! ## Pipeline
//!
//! ```text
//! coordinator ──buffered──▶ buffering stage ──blocks──▶ writer stage ──▶ <id>.journal
//!             ──blocking─────────────────────────────▶
//! ```
//!
//! The buffering stage coalesces lines that arrive while the writer is busy
//! into a single block, so a burst of transactions costs one fsync. Blocking
//! callers bypass the buffer and wait for the writer's acknowledgment.
//!
//! ## Invariants
//!
//! - Lines are written in transaction id order
//! - A transaction is never written twice and never split across files
//! - Once a blocking write is acknowledged, it survives a crash
//! - After a write fails, nothing further is written

mod buffer;
mod reader;
mod writer;

pub use reader::{JournalLines, RawLine};

pub(crate) use reader::truncate_file;

use crate::config::Config;
use crate::dir::JournalDir;
use crate::error::{CoreError, CoreResult};
use crate::recovery::{self, RecoveryReport};
use crate::types::TransactionId;
use buffer::BufferHandle;
use prevail_codec::{decode_line, encode_line, CodecResult, Value};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use writer::{wait_for_ack, WriterHandle, WriterState};

/// One recorded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// The transaction's id.
    pub id: TransactionId,
    /// Canonical name of the operation.
    pub operation: String,
    /// Arguments the operation was invoked with.
    pub args: Vec<Value>,
}

impl JournalEntry {
    /// Creates a journal entry.
    pub fn new(id: TransactionId, operation: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            operation: operation.into(),
            args,
        }
    }

    /// Encodes the entry as one journal line, without the terminator.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the operation name is not a valid symbol
    /// or the id is zero.
    pub fn to_line(&self) -> CoreResult<String> {
        Ok(encode_line(self.id.as_u64(), &self.operation, &self.args)?)
    }

    /// Parses one journal line.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the line is malformed.
    pub fn parse(line: &str) -> CodecResult<Self> {
        let invocation = decode_line(line)?;
        Ok(Self {
            id: TransactionId::new(invocation.id),
            operation: invocation.operation,
            args: invocation.args,
        })
    }
}

/// Acknowledgment of a durable write.
///
/// Returned by [`TransactionLog::record_durable`]. Waiting is separate from
/// recording so that the caller can release its locks first.
#[derive(Debug)]
pub enum WriteAck {
    /// The entry is already durable.
    Done,
    /// The entry is durable once the receiver yields `Ok`.
    Pending(Receiver<CoreResult<()>>),
}

impl WriteAck {
    /// Blocks until the entry is durable.
    ///
    /// # Errors
    ///
    /// Returns the write's error, or [`CoreError::JournalFailed`] if the
    /// log stopped before acknowledging.
    pub fn wait(self) -> CoreResult<()> {
        match self {
            Self::Done => Ok(()),
            Self::Pending(done) => wait_for_ack(&done),
        }
    }
}

/// Where transactions are recorded and replayed from.
///
/// The file journal is the built-in implementation. Other stores (for
/// example an external database) plug in through
/// [`Engine::open_with_log`](crate::Engine::open_with_log).
///
/// `record` and `record_durable` are called under the engine's apply lock,
/// in strictly increasing id order.
pub trait TransactionLog: Send + Sync {
    /// Feeds every recorded entry, in id order, to `apply` in chunks of at
    /// most `chunk_size` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorded history cannot be read, or if
    /// `apply` fails.
    fn replay(
        &self,
        chunk_size: usize,
        apply: &mut dyn FnMut(&[JournalEntry]) -> CoreResult<()>,
    ) -> CoreResult<RecoveryReport>;

    /// Records an entry without waiting for it to be durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be handed off.
    fn record(&self, entry: &JournalEntry) -> CoreResult<()>;

    /// Records an entry and returns an acknowledgment that completes once
    /// it is durable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BlockingUnsupported`] unless overridden.
    fn record_durable(&self, entry: &JournalEntry) -> CoreResult<WriteAck> {
        let _ = entry;
        Err(CoreError::BlockingUnsupported)
    }

    /// Whether [`record_durable`](Self::record_durable) is available.
    fn supports_blocking(&self) -> bool {
        false
    }

    /// Fails if the log can no longer accept entries.
    ///
    /// # Errors
    ///
    /// Returns the log's recorded fault.
    fn check_health(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Writes out everything recorded so far and releases resources.
    ///
    /// Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if pending entries could not be written.
    fn shutdown(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// The file-backed transaction log.
///
/// Owns the data directory lock, the writer stage and the buffering stage.
#[derive(Debug)]
pub struct FileJournal {
    dir: JournalDir,
    writer: Arc<WriterHandle>,
    buffer: BufferHandle,
}

impl FileJournal {
    /// Opens the journal in `config.data_directory` and starts its stages.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseLocked`] if another engine holds the
    /// directory, or an I/O error.
    pub fn open(config: &Config) -> CoreResult<Self> {
        let dir = JournalDir::open(&config.data_directory, config.create_if_missing)?;

        let (buffer_sender, buffer_receiver) = mpsc::channel();
        let writer = Arc::new(WriterHandle::spawn(
            WriterState::new(dir.path(), config.rotation_interval),
            Some(buffer_sender.clone()),
        )?);
        let buffer = match BufferHandle::spawn(buffer_sender, buffer_receiver, Arc::clone(&writer))
        {
            Ok(buffer) => buffer,
            Err(e) => {
                let _ = writer.shutdown();
                return Err(e);
            }
        };

        Ok(Self {
            dir,
            writer,
            buffer,
        })
    }

    /// Returns the data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl TransactionLog for FileJournal {
    fn replay(
        &self,
        chunk_size: usize,
        apply: &mut dyn FnMut(&[JournalEntry]) -> CoreResult<()>,
    ) -> CoreResult<RecoveryReport> {
        recovery::replay_directory(&self.dir.journals()?, chunk_size, apply)
    }

    fn record(&self, entry: &JournalEntry) -> CoreResult<()> {
        self.buffer.append(entry.to_line()?, entry.id)
    }

    fn record_durable(&self, entry: &JournalEntry) -> CoreResult<WriteAck> {
        let done = self.writer.submit_with_ack(entry.to_line()?, entry.id)?;
        Ok(WriteAck::Pending(done))
    }

    fn supports_blocking(&self) -> bool {
        true
    }

    fn check_health(&self) -> CoreResult<()> {
        match self.writer.fault() {
            Some(message) => Err(CoreError::journal_failed(message)),
            None => Ok(()),
        }
    }

    fn shutdown(&self) -> CoreResult<()> {
        // Buffer first: its final flush goes to the writer
        let buffered = self.buffer.shutdown();
        let written = self.writer.shutdown();
        buffered.and(written)
    }
}

impl Drop for FileJournal {
    fn drop(&mut self) {
        if let Err(e) = TransactionLog::shutdown(self) {
            tracing::error!(error = %e, "journal shutdown failed");
        }
    }
}
