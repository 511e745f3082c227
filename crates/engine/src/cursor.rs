//! Opaque, self-contained query cursors
//!
//! A cursor captures the position right after one result: the result's
//! comparison tuple (sort values, then projected values), its key, and the
//! key tie-break direction. It also carries a fingerprint of the query
//! shape, so replaying it against a different query is rejected rather than
//! silently resuming at a meaningless position.
//!
//! Tokens are MessagePack, base64url-encoded without padding.

use crate::error::{Error, Result};
use crate::query::Direction;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mantle_core::{Key, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque cursor token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a token received from a caller
    pub fn from_token(token: impl Into<String>) -> Self {
        Cursor(token.into())
    }

    /// Token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded cursor content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Fingerprint of the query shape the cursor was produced by
    pub shape: u64,
    /// Comparison tuple of the last result
    pub tuple: Vec<Value>,
    /// Key of the last result
    pub key: Key,
    /// Key tie-break direction
    pub direction: Direction,
}

/// Cursor encoder/decoder
pub struct CursorCodec;

impl CursorCodec {
    /// Encode a position into a token
    pub fn encode(position: &CursorPosition) -> Result<Cursor> {
        let bytes = rmp_serde::to_vec(position)
            .map_err(|e| Error::encode(format!("cursor serialization failed: {}", e)))?;
        Ok(Cursor(URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Decode a token
    ///
    /// # Errors
    ///
    /// `Error::Decode` if the token is not one this codec produced.
    pub fn decode(cursor: &Cursor) -> Result<CursorPosition> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor.as_str())
            .map_err(|e| Error::decode(format!("malformed cursor: {}", e)))?;
        rmp_serde::from_slice(&bytes).map_err(|e| Error::decode(format!("malformed cursor: {}", e)))
    }

    /// Decode a token and check it belongs to a query of this shape
    ///
    /// # Errors
    ///
    /// `Error::Decode` for malformed tokens, `Error::InvalidCursor` when the
    /// shape, tuple arity or direction differ.
    pub fn decode_for(
        cursor: &Cursor,
        shape: u64,
        arity: usize,
        direction: Direction,
    ) -> Result<CursorPosition> {
        let position = Self::decode(cursor)?;
        if position.tuple.len() != arity {
            return Err(Error::invalid_cursor(format!(
                "cursor holds {} sort values, query has {}",
                position.tuple.len(),
                arity
            )));
        }
        if position.shape != shape || position.direction != direction {
            return Err(Error::invalid_cursor("cursor was produced by a different query"));
        }
        Ok(position)
    }
}
