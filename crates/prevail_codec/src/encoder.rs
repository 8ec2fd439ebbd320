//! Canonical text encoder.

use crate::decoder::MAX_NESTING_DEPTH;
use crate::error::{CodecError, CodecResult};
use crate::value::{cmp_encoded, Value};
use std::fmt::Write;

/// Encode a value to its canonical text form.
///
/// The output is deterministic:
/// - Map keys are sorted by their encoded form (length-first, then bytewise)
/// - Strings use a fixed escape set, everything else is written verbatim
/// - Bytes are lowercase hex
/// - Exactly one space separates elements
pub fn to_text(value: &Value) -> String {
    let mut encoder = TextEncoder::new();
    encoder.encode(value);
    encoder.into_string()
}

/// Checks that `value` can be journaled and decoded back.
///
/// [`to_text`] writes any value, but the decoder refuses maps with
/// duplicate keys and nesting deeper than [`MAX_NESTING_DEPTH`].
///
/// # Errors
///
/// Returns [`CodecError::NestingTooDeep`] or [`CodecError::NonCanonical`]
/// for a value the decoder would reject.
pub fn check_encodable(value: &Value) -> CodecResult<()> {
    check_nested(value, 0)
}

fn check_nested(value: &Value, depth: usize) -> CodecResult<()> {
    match value {
        Value::List(items) => {
            let depth = enter(depth)?;
            items.iter().try_for_each(|item| check_nested(item, depth))
        }
        Value::Map(pairs) => {
            let depth = enter(depth)?;
            for (key, value) in pairs {
                check_nested(key, depth)?;
                check_nested(value, depth)?;
            }
            let mut keys: Vec<String> = pairs.iter().map(|(key, _)| to_text(key)).collect();
            keys.sort_by(|a, b| cmp_encoded(a, b));
            match keys.windows(2).find(|pair| pair[0] == pair[1]) {
                Some(pair) => Err(CodecError::non_canonical(format!(
                    "duplicate map key {}",
                    pair[0]
                ))),
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

fn enter(depth: usize) -> CodecResult<usize> {
    let depth = depth + 1;
    if depth > MAX_NESTING_DEPTH {
        return Err(CodecError::NestingTooDeep {
            max_depth: MAX_NESTING_DEPTH,
        });
    }
    Ok(depth)
}

/// A canonical text encoder.
///
/// Values are appended to an internal buffer so a whole journal line can be
/// built without intermediate allocations per argument.
pub struct TextEncoder {
    buffer: String,
}

impl TextEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: String::with_capacity(capacity),
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) {
        match value {
            Value::Null => self.buffer.push_str("nil"),
            Value::Bool(b) => self.buffer.push_str(if *b { "true" } else { "false" }),
            Value::Integer(n) => {
                // Writing into a String cannot fail
                let _ = write!(self.buffer, "{n}");
            }
            Value::Bytes(b) => self.encode_bytes(b),
            Value::Text(s) => self.encode_text(s),
            Value::List(items) => self.encode_list(items),
            Value::Map(pairs) => self.encode_map(pairs),
        }
    }

    /// Append raw text that is already in canonical form.
    pub(crate) fn push_raw(&mut self, raw: &str) {
        self.buffer.push_str(raw);
    }

    /// Consume this encoder and return the encoded text.
    pub fn into_string(self) -> String {
        self.buffer
    }

    fn encode_text(&mut self, text: &str) {
        self.buffer.push('"');
        for c in text.chars() {
            match c {
                '"' => self.buffer.push_str("\\\""),
                '\\' => self.buffer.push_str("\\\\"),
                '\n' => self.buffer.push_str("\\n"),
                '\r' => self.buffer.push_str("\\r"),
                '\t' => self.buffer.push_str("\\t"),
                c if c.is_control() => {
                    let _ = write!(self.buffer, "\\u{{{:x}}}", u32::from(c));
                }
                c => self.buffer.push(c),
            }
        }
        self.buffer.push('"');
    }

    fn encode_bytes(&mut self, bytes: &[u8]) {
        self.buffer.push_str("#bytes\"");
        for b in bytes {
            let _ = write!(self.buffer, "{b:02x}");
        }
        self.buffer.push('"');
    }

    fn encode_list(&mut self, items: &[Value]) {
        self.buffer.push_str("#list[");
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.buffer.push(' ');
            }
            self.encode(item);
        }
        self.buffer.push(']');
    }

    fn encode_map(&mut self, pairs: &[(Value, Value)]) {
        // Encode keys first so they can be ordered by their canonical text
        let mut encoded: Vec<(String, &Value)> = pairs
            .iter()
            .map(|(key, value)| (to_text(key), value))
            .collect();
        encoded.sort_by(|a, b| cmp_encoded(&a.0, &b.0));

        self.buffer.push('{');
        for (i, (key, value)) in encoded.iter().enumerate() {
            if i > 0 {
                self.buffer.push(' ');
            }
            self.buffer.push_str(key);
            self.buffer.push(' ');
            self.encode(value);
        }
        self.buffer.push('}');
    }
}

impl Default for TextEncoder {
    fn default() -> Self {
        Self::new()
    }
}
