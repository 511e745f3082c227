//! Order-preserving key encoding
//!
//! A key is stored as a string whose byte order equals key order. Each path
//! element is written as
//!
//! ```text
//! escape(kind) 0x00 ( 0x02 HEX16(id ^ 2^63) | 0x03 escape(name) 0x00 )
//! ```
//!
//! `escape` rewrites `0x00` as `0x01 0x01` and `0x01` as `0x01 0x02`, so the
//! `0x00` terminators are unambiguous and compare below every kind or name
//! byte. Ids are written as 16 upper-case hex digits after flipping the sign
//! bit, so ids order numerically and `0x02` puts every id before every name.
//!
//! Element encodings are prefix-free, which gives two properties the query
//! planner depends on:
//!
//! - comparing encodings compares keys
//! - `encode(ancestor)` is a string prefix of `encode(k)` exactly when
//!   `k.has_ancestor(ancestor)`

use crate::error::{Error, Result};
use mantle_core::{IdOrName, Key, PathElement};

const TERMINATOR: char = '\0';
const ESCAPE: char = '\u{1}';
const ID_MARKER: char = '\u{2}';
const NAME_MARKER: char = '\u{3}';
const SIGN_BIT: u64 = 1 << 63;

/// Key encoder/decoder
pub struct KeyCodec;

impl KeyCodec {
    /// Encode a key
    pub fn encode(key: &Key) -> String {
        let mut out = String::with_capacity(32 * key.path().len());
        for element in key.path() {
            encode_element(element, &mut out);
        }
        out
    }

    /// Decode a key produced by [`KeyCodec::encode`]
    ///
    /// # Errors
    ///
    /// `Error::Decode` on any malformed input.
    pub fn decode(encoded: &str) -> Result<Key> {
        let mut path = Vec::new();
        let mut rest = encoded;
        while !rest.is_empty() {
            let (element, tail) = decode_element(rest)?;
            path.push(element);
            rest = tail;
        }
        Key::from_path(path).map_err(|_| Error::decode("empty encoded key"))
    }

    /// Allocator counter id for `(kind, parent)`
    ///
    /// Distinct `(kind, parent)` pairs never share an id.
    pub fn counter_id(kind: &str, parent: Option<&Key>) -> String {
        let mut out = parent.map(Self::encode).unwrap_or_default();
        escape_into(kind, &mut out);
        out
    }
}

fn encode_element(element: &PathElement, out: &mut String) {
    escape_into(&element.kind, out);
    out.push(TERMINATOR);
    match &element.id {
        IdOrName::Id(id) => {
            out.push(ID_MARKER);
            out.push_str(&format!("{:016X}", (*id as u64) ^ SIGN_BIT));
        }
        IdOrName::Name(name) => {
            out.push(NAME_MARKER);
            escape_into(name, out);
            out.push(TERMINATOR);
        }
    }
}

fn escape_into(raw: &str, out: &mut String) {
    for c in raw.chars() {
        match c {
            TERMINATOR => {
                out.push(ESCAPE);
                out.push('\u{1}');
            }
            ESCAPE => {
                out.push(ESCAPE);
                out.push('\u{2}');
            }
            other => out.push(other),
        }
    }
}

// Reads an escaped string up to its terminator; returns (value, remainder).
fn unescape_until_terminator(input: &str) -> Result<(String, &str)> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            TERMINATOR => return Ok((value, &input[i + 1..])),
            ESCAPE => match chars.next() {
                Some((_, '\u{1}')) => value.push(TERMINATOR),
                Some((_, '\u{2}')) => value.push(ESCAPE),
                _ => return Err(Error::decode("bad escape sequence in key")),
            },
            other => value.push(other),
        }
    }
    Err(Error::decode("unterminated key segment"))
}

fn decode_element(input: &str) -> Result<(PathElement, &str)> {
    let (kind, rest) = unescape_until_terminator(input)?;
    if kind.is_empty() {
        return Err(Error::decode("empty kind in key"));
    }
    match rest.chars().next() {
        Some(ID_MARKER) => {
            let digits = rest
                .get(1..17)
                .ok_or_else(|| Error::decode("truncated key id"))?;
            if !digits.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b)) {
                return Err(Error::decode("bad key id digits"));
            }
            let raw = u64::from_str_radix(digits, 16)
                .map_err(|e| Error::decode(format!("bad key id: {}", e)))?;
            let id = (raw ^ SIGN_BIT) as i64;
            Ok((PathElement::new(kind, IdOrName::Id(id)), &rest[17..]))
        }
        Some(NAME_MARKER) => {
            let (name, tail) = unescape_until_terminator(&rest[1..])?;
            Ok((PathElement::new(kind, IdOrName::Name(name)), tail))
        }
        _ => Err(Error::decode("missing id/name marker in key")),
    }
}
