// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Content checksums used as change-detection annotations.
//!
//! Two disciplines exist and callers must not mix them for the same annotation:
//!
//! - [`sha256_hex`] hashes the literal serialized bytes of a rendered document.
//!   Rendered node, edge-proxy and cloud configs use this.
//! - [`canonical_json_checksum`] hashes a value re-encoded as JSON with sorted
//!   object keys, so structurally equal values hash equal regardless of field
//!   order. Standalone pod specs use this.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Hex-encoded SHA-256 digest of `data`.
#[must_use]
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(data.as_ref());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Writing to a String cannot fail
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Hex-encoded SHA-256 digest of `value` encoded as key-sorted JSON.
///
/// # Errors
///
/// Returns an error if `value` cannot be represented as JSON.
pub fn canonical_json_checksum<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = canonicalize(serde_json::to_value(value)?);
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(sha256_hex(bytes))
}

/// Rebuilds every object with its keys inserted in sorted order, so the
/// encoding is identical whether or not `serde_json` preserves insertion order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
#[path = "checksum_tests.rs"]
mod checksum_tests;
