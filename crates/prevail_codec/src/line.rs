//! Journal line format.
//!
//! One line records one transaction:
//!
//! ```text
//! (<operation> <arg1> <arg2> ... <argN>) ;<id>
//! ```
//!
//! The operation is a bare symbol naming a registered function, the
//! arguments are canonical [`Value`] encodings and `<id>` is the decimal
//! transaction id. Lines never contain a newline, so a journal file can be
//! split on `\n` without further framing.

use crate::decoder::TextDecoder;
use crate::encoder::{check_encodable, TextEncoder};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// A decoded transaction invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Transaction id (starts at 1).
    pub id: u64,
    /// Name of the operation to invoke.
    pub operation: String,
    /// Arguments in call order.
    pub args: Vec<Value>,
}

impl Invocation {
    /// Creates a new invocation.
    pub fn new(id: u64, operation: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            operation: operation.into(),
            args,
        }
    }

    /// Encodes this invocation as a single journal line (without the
    /// trailing newline).
    ///
    /// # Errors
    ///
    /// Returns an error if the operation is not a valid symbol or the id is
    /// zero.
    pub fn encode(&self) -> CodecResult<String> {
        encode_line(self.id, &self.operation, &self.args)
    }

    /// Parses a journal line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line does not match the journal grammar.
    pub fn decode(line: &str) -> CodecResult<Self> {
        decode_line(line)
    }
}

/// Returns true if `symbol` can name an operation.
///
/// Symbols start with an ASCII letter or `_` and continue with ASCII
/// alphanumerics or one of `_ . : / -`. The words `nil`, `true` and `false`
/// are reserved.
pub fn is_valid_symbol(symbol: &str) -> bool {
    let mut chars = symbol.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    if matches!(symbol, "nil" | "true" | "false") {
        return false;
    }
    chars.all(is_symbol_char)
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '/' | '-')
}

/// Encodes one transaction as a journal line.
///
/// # Errors
///
/// Returns [`CodecError::InvalidSymbol`] for an unusable operation name,
/// [`CodecError::ZeroTransactionId`] for id 0, and the errors of
/// [`check_encodable`] for an argument that would not decode.
pub fn encode_line(id: u64, operation: &str, args: &[Value]) -> CodecResult<String> {
    if !is_valid_symbol(operation) {
        return Err(CodecError::invalid_symbol(operation));
    }
    if id == 0 {
        return Err(CodecError::ZeroTransactionId);
    }
    args.iter().try_for_each(check_encodable)?;

    let mut encoder = TextEncoder::with_capacity(operation.len() + 16 + args.len() * 8);
    encoder.push_raw("(");
    encoder.push_raw(operation);
    for arg in args {
        encoder.push_raw(" ");
        encoder.encode(arg);
    }
    encoder.push_raw(") ;");
    encoder.push_raw(&id.to_string());
    Ok(encoder.into_string())
}

/// Decodes one journal line.
///
/// A trailing `\r` is tolerated so journals copied through Windows tooling
/// still replay.
///
/// # Errors
///
/// Returns an error if the line is not a well-formed invocation.
pub fn decode_line(line: &str) -> CodecResult<Invocation> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut decoder = TextDecoder::new(line);

    decoder.expect('(')?;
    let op_start = decoder.position();
    let operation = decoder.take_while(is_symbol_char);
    if !is_valid_symbol(operation) {
        return Err(CodecError::invalid_syntax(
            op_start,
            format!("expected operation symbol, found {operation:?}"),
        ));
    }

    let mut args = Vec::new();
    loop {
        match decoder.peek() {
            Some(')') => {
                decoder.expect(')')?;
                break;
            }
            Some(' ' | '\t') => {
                decoder.skip_whitespace();
                if decoder.peek() == Some(')') {
                    continue;
                }
                args.push(decoder.decode()?);
            }
            Some(c) => return Err(decoder.error(format!("expected ' ' or ')', found {c:?}"))),
            None => return Err(CodecError::UnexpectedEof),
        }
    }

    decoder.skip_whitespace();
    decoder.expect(';')?;
    let id = decoder.decode_unsigned()?;
    decoder.skip_whitespace();
    if !decoder.is_empty() {
        return Err(decoder.error("trailing characters after transaction id"));
    }
    if id == 0 {
        return Err(CodecError::ZeroTransactionId);
    }

    Ok(Invocation {
        id,
        operation: operation.to_string(),
        args,
    })
}
