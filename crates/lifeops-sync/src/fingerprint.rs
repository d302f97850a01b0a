//! Change fingerprinting.
//!
//! A fingerprint is the SHA-256 of a canonical rendering of a document:
//! keys sorted, volatile bookkeeping keys dropped at every level, tagged
//! timestamps rendered as their millisecond value. Two documents that differ
//! only in key order or volatile keys share a fingerprint.

use lifeops_store::{Document, Value};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;
use ulid::Ulid;

/// Keys excluded from fingerprints. They change on every write.
pub const VOLATILE_KEYS: &[&str] = &["updatedAt", "migratedAt"];

/// Digest of a document's meaningful content.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated display (first 8 chars).
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}...)", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_volatile(key: &str) -> bool {
    VOLATILE_KEYS.contains(&key)
}

fn push_json_string(s: &str, out: &mut String) {
    out.push_str(&serde_json::Value::from(s).to_string());
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => push_json_string(s, out),
        Value::Timestamp(ts) => out.push_str(&ts.millis().to_string()),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_canonical_map(map, out),
    }
}

fn write_canonical_map(map: &Document, out: &mut String) {
    out.push('{');
    // BTreeMap iterates in lexicographic key order.
    let entries = map.iter().filter(|(k, _)| !is_volatile(k));
    for (idx, (key, value)) in entries.enumerate() {
        if idx > 0 {
            out.push(',');
        }
        push_json_string(key, out);
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}

/// The canonical text a fingerprint is computed from.
pub fn canonical_form(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn digest(canonical: &str) -> Fingerprint {
    let hash = Sha256::digest(canonical.as_bytes());
    Fingerprint(hash.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Fingerprint a document.
pub fn fingerprint(doc: &Document) -> Fingerprint {
    let mut out = String::new();
    write_canonical_map(doc, &mut out);
    digest(&out)
}

/// Fingerprint any document value.
pub fn fingerprint_value(value: &Value) -> Fingerprint {
    digest(&canonical_form(value))
}

/// Fingerprint an arbitrary serializable value.
///
/// If the value cannot be represented as JSON, the result is unique to this
/// call, so it never matches a previously confirmed fingerprint and the
/// write goes through.
pub fn fingerprint_of<T: Serialize + ?Sized>(value: &T) -> Fingerprint {
    match serde_json::to_value(value) {
        Ok(json) => fingerprint_value(&Value::from(json)),
        Err(err) => {
            warn!(%err, "value is not serializable, forcing a fresh fingerprint");
            Fingerprint(format!("instant:{}", Ulid::new()))
        }
    }
}
