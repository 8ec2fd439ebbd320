//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding journal text.
///
/// Every [`Value`](crate::Value) has a text form, but a journal line is
/// only written when it would decode back to the same invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input does not follow the journal grammar.
    #[error("invalid syntax at byte {position}: {message}")]
    InvalidSyntax {
        /// Byte offset in the input where the problem was detected.
        position: usize,
        /// Description of the syntax error.
        message: String,
    },

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Integer literal does not fit in an i64 (or u64 for transaction ids).
    #[error("integer overflow")]
    IntegerOverflow,

    /// The input is well-formed but not in canonical form.
    #[error("non-canonical encoding: {message}")]
    NonCanonical {
        /// Description of what is not canonical.
        message: String,
    },

    /// Lists or maps are nested deeper than the decoder allows.
    #[error("nesting exceeds maximum depth of {max_depth}")]
    NestingTooDeep {
        /// The configured maximum depth.
        max_depth: usize,
    },

    /// An operation name is not a valid symbol.
    #[error("invalid operation symbol: {symbol:?}")]
    InvalidSymbol {
        /// The rejected symbol text.
        symbol: String,
    },

    /// Transaction ids start at 1.
    #[error("transaction id must be positive")]
    ZeroTransactionId,
}

impl CodecError {
    /// Create an invalid syntax error.
    pub fn invalid_syntax(position: usize, message: impl Into<String>) -> Self {
        Self::InvalidSyntax {
            position,
            message: message.into(),
        }
    }

    /// Create a non-canonical encoding error.
    pub fn non_canonical(message: impl Into<String>) -> Self {
        Self::NonCanonical {
            message: message.into(),
        }
    }

    /// Create an invalid symbol error.
    pub fn invalid_symbol(symbol: impl Into<String>) -> Self {
        Self::InvalidSymbol {
            symbol: symbol.into(),
        }
    }
}
