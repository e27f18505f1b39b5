//! Keys, the document value type, and key-path extraction.
//!
//! `Value` models the opaque blob of §3 as a small self-describing
//! document sum type instead of a raw byte string, because key-path
//! extraction (§4.2) and multi-entry expansion need structural
//! navigation rather than a dynamic property walk.

use std::collections::BTreeMap;
use std::convert::TryInto;

use serde::{Deserialize, Serialize};

use crate::error::{err_at, Result};

/// A totally-ordered primary or secondary key.
///
/// Order is the derived field order below: `Int < Str < Bytes`, then
/// numeric/lexicographic within a variant — this matches the tag
/// ordering of the generic encoding in §6 (tags 0, 1, 3; tag 2 only
/// ever appears on encoded [`Value`]s, never bare keys).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Key {
    pub fn int(v: i64) -> Key {
        Key::Int(v)
    }

    pub fn str(v: impl Into<String>) -> Key {
        Key::Str(v.into())
    }

    pub fn bytes(v: impl Into<Vec<u8>>) -> Key {
        Key::Bytes(v.into())
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Key {
        Key::Str(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Key {
        Key::Str(v)
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Key {
        Key::Int(v)
    }
}

/// The generic-encoding tag byte, per §6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Tag {
    Int = 0,
    Str = 1,
    Json = 2,
    Buffer = 3,
}

/// Encode a [`Key`] using the one-byte-tag-plus-payload layout of §6.
///
/// Tag ordering (int < string < json < buffer) combined with
/// byte-lexicographic comparison of the whole encoding reproduces the
/// [`Key`] ordering above, so a backend that only understands bytes
/// can still answer range queries correctly by comparing encodings.
pub fn encode_generic_key(key: &Key) -> Vec<u8> {
    match key {
        Key::Int(v) => {
            let mut out = vec![Tag::Int as u8];
            // Flip the sign bit so two's-complement order becomes
            // unsigned, byte-lexicographic order.
            let bits = (*v as u64) ^ 0x8000_0000_0000_0000;
            out.extend_from_slice(&((bits >> 32) as u32).to_be_bytes());
            out.extend_from_slice(&(bits as u32).to_be_bytes());
            out
        }
        Key::Str(s) => {
            let mut out = vec![Tag::Str as u8];
            out.extend_from_slice(s.as_bytes());
            out
        }
        Key::Bytes(b) => {
            let mut out = vec![Tag::Buffer as u8];
            out.extend_from_slice(b);
            out
        }
    }
}

/// Inverse of [`encode_generic_key`].
pub fn decode_generic_key(bytes: &[u8]) -> Result<Key> {
    let (tag, payload) = split_tag(bytes)?;
    match tag {
        x if x == Tag::Int as u8 => {
            if payload.len() != 8 {
                return err_at!(FailConvert, msg: "bad int key length {}", payload.len());
            }
            let hi = u32::from_be_bytes(payload[0..4].try_into().unwrap()) as u64;
            let lo = u32::from_be_bytes(payload[4..8].try_into().unwrap()) as u64;
            let bits = ((hi << 32) | lo) ^ 0x8000_0000_0000_0000;
            Ok(Key::Int(bits as i64))
        }
        x if x == Tag::Str as u8 => {
            let s = err_at!(FailConvert, String::from_utf8(payload.to_vec()))?;
            Ok(Key::Str(s))
        }
        x if x == Tag::Buffer as u8 => Ok(Key::Bytes(payload.to_vec())),
        x => err_at!(FailConvert, msg: "unexpected key tag {}", x),
    }
}

fn split_tag(bytes: &[u8]) -> Result<(u8, &[u8])> {
    match bytes.split_first() {
        Some((tag, rest)) => Ok((*tag, rest)),
        None => err_at!(FailConvert, msg: "empty generic encoding"),
    }
}

/// Document value stored against a primary key.
///
/// `Map` uses a `BTreeMap` (rather than an insertion-ordered map) so
/// key-path traversal and serialization are deterministic without
/// carrying a separate ordering vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_key(&self) -> Option<Key> {
        match self {
            Value::Int(v) => Some(Key::Int(*v)),
            Value::Str(v) => Some(Key::Str(v.clone())),
            Value::Bytes(v) => Some(Key::Bytes(v.clone())),
            _ => None,
        }
    }
}

/// Encode a [`Value`] using the §6 generic encoding. Values that are
/// not directly one of the key-shaped primitives fall back to the
/// JSON tag.
pub fn encode_generic_value(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Int(_) | Value::Str(_) | Value::Bytes(_) => {
            Ok(encode_generic_key(&value.as_key().unwrap()))
        }
        other => {
            let mut out = vec![Tag::Json as u8];
            let text = err_at!(FailConvert, serde_json::to_vec(other))?;
            out.extend_from_slice(&text);
            Ok(out)
        }
    }
}

/// Inverse of [`encode_generic_value`].
pub fn decode_generic_value(bytes: &[u8]) -> Result<Value> {
    let (tag, payload) = split_tag(bytes)?;
    match tag {
        x if x == Tag::Json as u8 => {
            err_at!(FailConvert, serde_json::from_slice(payload))
        }
        _ => {
            let key = decode_generic_key(bytes)?;
            Ok(match key {
                Key::Int(v) => Value::Int(v),
                Key::Str(v) => Value::Str(v),
                Key::Bytes(v) => Value::Bytes(v),
            })
        }
    }
}

/// A name, or ordered list of names, describing nested traversal
/// inside a [`Value::Map`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn single(name: impl Into<String>) -> KeyPath {
        KeyPath(vec![name.into()])
    }

    pub fn nested<I, S>(names: I) -> KeyPath
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath(names.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Walk `value` following each segment; returns `None` (absent)
    /// as soon as a segment is missing or the traversal hits a
    /// non-map node before the path is exhausted.
    pub fn extract<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut cur = value;
        for seg in &self.0 {
            match cur {
                Value::Map(m) => cur = m.get(seg)?,
                _ => return None,
            }
        }
        Some(cur)
    }
}

impl From<&str> for KeyPath {
    fn from(name: &str) -> KeyPath {
        KeyPath::single(name)
    }
}

/// The secondary keys an index entry extracts from a value: either a
/// single key, or — for multi-entry indices over a [`Value::Seq`] — one
/// key per element.
pub fn extract_secondary_keys(path: &KeyPath, value: &Value, multi_entry: bool) -> Vec<Key> {
    match path.extract(value) {
        None => vec![],
        Some(Value::Seq(items)) if multi_entry => {
            items.iter().filter_map(Value::as_key).collect()
        }
        Some(v) => v.as_key().into_iter().collect(),
    }
}

#[cfg(test)]
#[path = "key_test.rs"]
mod key_test;
