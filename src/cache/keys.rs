//! Content fingerprints used as cache keys.
//!
//! Two kinds of input are addressed:
//!
//! - raw byte sequences (uploaded model files), digested directly;
//! - structured records (`serde_json::Value` trees), digested through a
//!   canonical serialization so that key insertion order never matters.
//!
//! The canonical form is JSON-shaped: mapping keys are sorted by their UTF-8
//! bytes at every level, sequences keep their order, strings are escaped with a
//! fixed rule set and numbers use `serde_json`'s formatting (integers without a
//! fraction, floats in shortest round-trip form). Values with no JSON form are
//! expected to enter the tree as their display string (see [`display_value`]);
//! two such values that print identically therefore share a fingerprint.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length in bytes of a [`Fingerprint`].
pub const FINGERPRINT_LEN: usize = 32;

const SHORT_LEN: usize = 8;

/// SHA-256 digest identifying a piece of content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn from_digest(digest: &[u8]) -> Option<Self> {
        let bytes: [u8; FINGERPRINT_LEN] = digest.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Parse a 64-character hex rendering.
    pub fn from_hex(value: &str) -> Option<Self> {
        let decoded = hex::decode(value).ok()?;
        Self::from_digest(&decoded)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated form used in log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(SHORT_LEN);
        hex
    }

    fn of(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}..)", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Fingerprint a raw byte sequence. Total, including for empty input.
pub fn hash_bytes(content: &[u8]) -> Fingerprint {
    Fingerprint::of(content)
}

/// Fingerprint a structured record through its canonical serialization.
pub fn hash_record(record: &Value) -> Fingerprint {
    Fingerprint::of(&canonical_bytes(record))
}

/// Fingerprint any serializable value by first lowering it to a JSON tree.
///
/// Non-finite floats become `null` during lowering. A value whose `Serialize`
/// implementation refuses to produce a tree is hashed through the display of
/// the serialization error, tagged so it cannot alias a plain string record.
pub fn hash_serializable<T: Serialize + ?Sized>(value: &T) -> Fingerprint {
    match serde_json::to_value(value) {
        Ok(tree) => hash_record(&tree),
        Err(err) => {
            let mut fallback = serde_json::Map::new();
            fallback.insert("$unserializable".to_string(), Value::String(err.to_string()));
            hash_record(&Value::Object(fallback))
        }
    }
}

/// Coerce a value with no JSON form into the string leaf used for hashing.
pub fn display_value(value: &impl fmt::Display) -> Value {
    Value::String(value.to_string())
}

/// Canonical serialization of a record as a UTF-8 string.
pub fn canonical_json(record: &Value) -> String {
    // The encoder only emits UTF-8 fragments and whole `str` values.
    String::from_utf8_lossy(&canonical_bytes(record)).into_owned()
}

enum Frame<'a> {
    Value(&'a Value),
    Key(&'a str),
    Raw(&'static [u8]),
}

/// Iterative encoder; depth is bounded by heap, not by the call stack.
fn canonical_bytes(record: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    let mut stack = vec![Frame::Value(record)];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Raw(bytes) => out.extend_from_slice(bytes),
            Frame::Key(key) => write_string(&mut out, key),
            Frame::Value(Value::Null) => out.extend_from_slice(b"null"),
            Frame::Value(Value::Bool(true)) => out.extend_from_slice(b"true"),
            Frame::Value(Value::Bool(false)) => out.extend_from_slice(b"false"),
            Frame::Value(Value::Number(number)) => {
                out.extend_from_slice(number.to_string().as_bytes())
            }
            Frame::Value(Value::String(text)) => write_string(&mut out, text),
            Frame::Value(Value::Array(items)) => {
                stack.push(Frame::Raw(b"]"));
                for (index, item) in items.iter().enumerate().rev() {
                    stack.push(Frame::Value(item));
                    if index > 0 {
                        stack.push(Frame::Raw(b","));
                    }
                }
                stack.push(Frame::Raw(b"["));
            }
            Frame::Value(Value::Object(map)) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_unstable_by(|left, right| left.0.as_bytes().cmp(right.0.as_bytes()));

                stack.push(Frame::Raw(b"}"));
                for (index, (key, value)) in entries.into_iter().enumerate().rev() {
                    stack.push(Frame::Value(value));
                    stack.push(Frame::Raw(b":"));
                    stack.push(Frame::Key(key));
                    if index > 0 {
                        stack.push(Frame::Raw(b","));
                    }
                }
                stack.push(Frame::Raw(b"{"));
            }
        }
    }

    out
}

fn write_string(out: &mut Vec<u8>, text: &str) {
    out.push(b'"');
    for ch in text.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}
