//! Record codecs
//!
//! - `KeyCodec`: keys to order-preserving `_id` strings
//! - `EntityCodec`: entities to tagged document records

pub mod entity;
pub mod key;

pub use entity::{encode_native, EntityCodec, SEQ_FIELD, UNINDEXED_FIELD};
pub use key::KeyCodec;
