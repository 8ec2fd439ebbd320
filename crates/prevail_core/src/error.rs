//! Error types for Prevail core.

use crate::types::WriteMode;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error returned by an operation function.
///
/// Operations report failure by returning this type. The engine passes it
/// back to the caller of `apply` untouched, wrapped in
/// [`CoreError::Transaction`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct OperationError {
    message: String,
}

impl OperationError {
    /// Creates an operation error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Creates an error for an argument of the wrong type or a missing one.
    pub fn invalid_argument(index: usize, expected: &str, found: &str) -> Self {
        Self::new(format!(
            "argument {index}: expected {expected}, found {found}"
        ))
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors that can occur in Prevail core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Journal text codec error.
    #[error("codec error: {0}")]
    Codec(#[from] prevail_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration or unusable data directory.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// Another engine holds the data directory.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The operation function failed; state is unchanged and no id was used.
    #[error("transaction `{operation}` failed: {source}")]
    Transaction {
        /// Name of the operation that failed.
        operation: String,
        /// The error returned by the operation.
        #[source]
        source: OperationError,
    },

    /// No operation is registered under this name.
    #[error("unknown operation: {name}")]
    UnknownOperation {
        /// The requested name.
        name: String,
    },

    /// An operation or alias with this name is already registered.
    #[error("operation already registered: {name}")]
    DuplicateOperation {
        /// The conflicting name.
        name: String,
    },

    /// The journal could not be replayed; the engine refuses to start.
    #[error("recovery failed in {}: {message}", path.display())]
    Recovery {
        /// Journal file being replayed.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A journal write failed. No further transactions are accepted.
    #[error("journal write failed: {message}")]
    JournalFailed {
        /// Description of the underlying fault.
        message: String,
    },

    /// The engine has been closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Blocking mode was requested on a log that cannot honor it.
    #[error("blocking mode is not supported by the active transaction log")]
    BlockingUnsupported,

    /// Buffered and blocking mode were mixed on one engine.
    #[error("engine is running in {active} mode; {requested} mode was requested")]
    ModeConflict {
        /// The mode the engine latched on its first transaction.
        active: WriteMode,
        /// The mode of the rejected call.
        requested: WriteMode,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a recovery error for a journal file.
    pub fn recovery(path: &Path, message: impl Into<String>) -> Self {
        Self::Recovery {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates a journal failure error.
    pub fn journal_failed(message: impl Into<String>) -> Self {
        Self::JournalFailed {
            message: message.into(),
        }
    }

    /// Returns the operation's own error if this is a transaction fault.
    #[must_use]
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            Self::Transaction { source, .. } => Some(source),
            _ => None,
        }
    }
}
