//! Canonical text decoder.

use crate::encoder::to_text;
use crate::error::{CodecError, CodecResult};
use crate::value::{cmp_encoded, Value};
use std::cmp::Ordering;

/// Decode a single value from text.
///
/// Surrounding whitespace is ignored; anything else after the value is an
/// error.
///
/// # Errors
///
/// Returns an error if the text is not a valid encoding or contains
/// non-canonical constructs (unsorted or duplicate map keys).
pub fn from_text(text: &str) -> CodecResult<Value> {
    let mut decoder = TextDecoder::new(text);
    decoder.skip_whitespace();
    let value = decoder.decode()?;
    decoder.skip_whitespace();
    if !decoder.is_empty() {
        return Err(decoder.error("trailing characters after value"));
    }
    Ok(value)
}

/// Maximum nesting depth for lists and maps.
/// Journal lines come from disk, so recursion must stay bounded.
pub const MAX_NESTING_DEPTH: usize = 128;

/// A canonical text decoder.
///
/// The decoder works on a borrowed string and tracks a byte position, so
/// error messages can point at the offending column of a journal line.
pub struct TextDecoder<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> TextDecoder<'a> {
    /// Create a new decoder for the given text.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> CodecResult<Value> {
        match self.peek() {
            None => Err(CodecError::UnexpectedEof),
            Some('"') => self.decode_text().map(Value::Text),
            Some('#') => self.decode_tagged(),
            Some('{') => self.decode_map(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.decode_integer().map(Value::Integer),
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.pos;
                let word = self.take_while(|c| c.is_ascii_alphanumeric());
                match word {
                    "nil" => Ok(Value::Null),
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    other => Err(CodecError::invalid_syntax(
                        start,
                        format!("unexpected symbol `{other}` in value position"),
                    )),
                }
            }
            Some('(') => Err(self.error("invocation syntax is not a value; lists must be tagged")),
            Some(c) => Err(self.error(format!("unexpected character {c:?}"))),
        }
    }

    /// Check if all input has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Returns the current byte position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the unconsumed input.
    pub fn remaining(&self) -> &'a str {
        let input = self.input;
        &input[self.pos..]
    }

    /// Skip spaces and tabs.
    pub fn skip_whitespace(&mut self) {
        self.take_while(|c| c == ' ' || c == '\t');
    }

    /// Peek at the next character without consuming it.
    pub fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    /// Consume the expected character or fail.
    pub fn expect(&mut self, expected: char) -> CodecResult<()> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected {expected:?}, found {c:?}"))),
            None => Err(CodecError::UnexpectedEof),
        }
    }

    /// Consume characters while the predicate holds and return them.
    pub fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let input = self.input;
        let start = self.pos;
        let rest = &input[start..];
        let len = rest
            .char_indices()
            .find(|&(_, c)| !predicate(c))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += len;
        &input[start..self.pos]
    }

    /// Build a syntax error at the current position.
    pub fn error(&self, message: impl Into<String>) -> CodecError {
        CodecError::invalid_syntax(self.pos, message)
    }

    /// Decode an unsigned decimal integer (used for transaction ids).
    pub fn decode_unsigned(&mut self) -> CodecResult<u64> {
        let digits = self.take_while(|c| c.is_ascii_digit());
        if digits.is_empty() {
            return Err(self.error("expected digits"));
        }
        digits.parse().map_err(|_| CodecError::IntegerOverflow)
    }

    fn decode_integer(&mut self) -> CodecResult<i64> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        let digits = self.take_while(|c| c.is_ascii_digit());
        if digits.is_empty() {
            return Err(self.error("expected digits after '-'"));
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|_| CodecError::IntegerOverflow)
    }

    fn decode_text(&mut self) -> CodecResult<String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(CodecError::UnexpectedEof);
            };
            self.pos += c.len_utf8();
            match c {
                '"' => return Ok(out),
                '\\' => out.push(self.decode_escape()?),
                '\n' => return Err(self.error("raw newline inside string")),
                c => out.push(c),
            }
        }
    }

    fn decode_escape(&mut self) -> CodecResult<char> {
        let Some(c) = self.peek() else {
            return Err(CodecError::UnexpectedEof);
        };
        self.pos += c.len_utf8();
        match c {
            '"' => Ok('"'),
            '\\' => Ok('\\'),
            'n' => Ok('\n'),
            'r' => Ok('\r'),
            't' => Ok('\t'),
            'u' => {
                self.expect('{')?;
                let hex = self.take_while(|c| c.is_ascii_hexdigit());
                let code = u32::from_str_radix(hex, 16)
                    .map_err(|_| self.error("invalid unicode escape"))?;
                self.expect('}')?;
                char::from_u32(code).ok_or_else(|| self.error("escape is not a valid scalar value"))
            }
            other => Err(self.error(format!("unknown escape \\{other}"))),
        }
    }

    fn decode_tagged(&mut self) -> CodecResult<Value> {
        self.expect('#')?;
        let start = self.pos;
        let tag = self.take_while(|c| c.is_ascii_alphabetic());
        match tag {
            "bytes" => {
                let hex = self.decode_text()?;
                decode_hex(&hex)
                    .map(Value::Bytes)
                    .ok_or_else(|| CodecError::invalid_syntax(start, "invalid hex in #bytes"))
            }
            "list" => self.decode_list(),
            other => Err(CodecError::invalid_syntax(
                start,
                format!("unknown tag #{other}"),
            )),
        }
    }

    fn decode_list(&mut self) -> CodecResult<Value> {
        self.expect('[')?;
        self.enter()?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(']') {
                self.pos += 1;
                break;
            }
            items.push(self.decode()?);
        }
        self.depth -= 1;
        Ok(Value::List(items))
    }

    fn decode_map(&mut self) -> CodecResult<Value> {
        self.expect('{')?;
        self.enter()?;
        let mut pairs: Vec<(Value, Value)> = Vec::new();
        let mut previous_key: Option<String> = None;
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.pos += 1;
                break;
            }
            let key = self.decode()?;
            self.skip_whitespace();
            let value = self.decode()?;

            let encoded_key = to_text(&key);
            if let Some(prev) = &previous_key {
                match cmp_encoded(prev, &encoded_key) {
                    Ordering::Less => {}
                    Ordering::Equal => {
                        return Err(CodecError::non_canonical(format!(
                            "duplicate map key {encoded_key}"
                        )))
                    }
                    Ordering::Greater => {
                        return Err(CodecError::non_canonical(format!(
                            "map key {encoded_key} is out of order"
                        )))
                    }
                }
            }
            previous_key = Some(encoded_key);
            pairs.push((key, value));
        }
        self.depth -= 1;
        Ok(Value::Map(pairs))
    }

    fn enter(&mut self) -> CodecResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(CodecError::NestingTooDeep {
                max_depth: MAX_NESTING_DEPTH,
            });
        }
        Ok(())
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}
