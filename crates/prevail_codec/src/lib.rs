//! # Prevail Codec
//!
//! Canonical text encoding for Prevail journal lines.
//!
//! This crate turns a transaction invocation (id, operation name, arguments)
//! into exactly one line of UTF-8 text and back. The encoding ensures:
//! - Identical inputs produce identical text
//! - Encoded values never contain a newline
//! - Lists are tagged (`#list[...]`) so they cannot be mistaken for an
//!   invocation
//!
//! ## Canonical Rules
//!
//! - Map keys are sorted by their encoded form (length-first, then bytewise)
//! - Duplicate map keys are rejected on decode, and journal lines holding
//!   them are refused on encode
//! - Nesting is limited to [`MAX_NESTING_DEPTH`] levels both ways
//! - Integers are plain decimal i64
//! - No floats
//! - Bytes are lowercase hex inside `#bytes"..."`
//!
//! ## Usage
//!
//! ```
//! use prevail_codec::{decode_line, encode_line, Value};
//!
//! let line = encode_line(1, "credit", &[Value::Integer(10)]).unwrap();
//! assert_eq!(line, "(credit 10) ;1");
//!
//! let invocation = decode_line(&line).unwrap();
//! assert_eq!(invocation.operation, "credit");
//! assert_eq!(invocation.args, vec![Value::Integer(10)]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod line;
#[cfg(feature = "serde")]
mod serde_impl;
mod value;

pub use decoder::{from_text, TextDecoder, MAX_NESTING_DEPTH};
pub use encoder::{check_encodable, to_text, TextEncoder};
pub use error::{CodecError, CodecResult};
pub use line::{decode_line, encode_line, is_valid_symbol, Invocation};
pub use value::Value;
