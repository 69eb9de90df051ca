//! Canonical JSON encoding and SHA-256 digests.
//!
//! Every deterministic identity in RETRACE (replay trace ids, merge trace
//! ids, per-step checkpoint signatures) is derived from the SHA-256 of a
//! canonical JSON form: compact separators, object keys sorted.

use crate::error::CoreResult;
use serde::Serialize;
use sha2::{Digest as _, Sha256};

/// Serialize a value to canonical JSON.
///
/// Canonical means compact (no whitespace) with object keys in sorted
/// order. `serde_json::Value` objects are BTreeMap-backed, so routing
/// through `to_value` sorts keys at every nesting level.
///
/// # Errors
///
/// Returns error if the value cannot be represented as JSON
pub fn canonical_json<T: Serialize>(value: &T) -> CoreResult<String> {
    let value = serde_json::to_value(value)?;
    Ok(value.to_string())
}

/// A SHA-256 digest in lowercase hex form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Number of hex characters in a full digest
    pub const HEX_LEN: usize = 64;

    /// Digest of raw string data
    #[must_use]
    pub fn of_str(data: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Digest of a value's canonical JSON form
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be represented as JSON
    pub fn of_canonical<T: Serialize>(value: &T) -> CoreResult<Self> {
        Ok(Self::of_str(&canonical_json(value)?))
    }

    /// Full hex string
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// First `n` hex characters
    #[must_use]
    pub fn hex_prefix(&self, n: usize) -> &str {
        &self.0[..n.min(Self::HEX_LEN)]
    }

    /// Hex characters `[start, end)` interpreted as an unsigned integer
    ///
    /// Used to derive deterministic millisecond offsets from a digest.
    /// The range is clamped to the digest length and must not exceed
    /// 16 hex characters (64 bits).
    #[must_use]
    pub fn u64_from_hex_range(&self, start: usize, end: usize) -> u64 {
        let start = start.min(Self::HEX_LEN);
        let end = end.min(Self::HEX_LEN).max(start);
        u64::from_str_radix(&self.0[start..end], 16).unwrap_or(0)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"zeta": 1, "alpha": {"nested_z": true, "nested_a": false}});
        let encoded = canonical_json(&value).unwrap();
        assert_eq!(
            encoded,
            r#"{"alpha":{"nested_a":false,"nested_z":true},"zeta":1}"#
        );
    }

    #[test]
    fn test_canonical_json_compact() {
        let value = json!({"a": [1, 2, 3]});
        assert_eq!(canonical_json(&value).unwrap(), r#"{"a":[1,2,3]}"#);
    }

    #[test]
    fn test_digest_known_value() {
        // sha256 of the empty string
        let digest = Digest::of_str("");
        assert_eq!(
            digest.as_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_stable_across_calls() {
        let value = json!({"b": 2, "a": 1});
        let d1 = Digest::of_canonical(&value).unwrap();
        let d2 = Digest::of_canonical(&value).unwrap();
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_hex_prefix() {
        let digest = Digest::of_str("retrace");
        assert_eq!(digest.hex_prefix(24).len(), 24);
        assert!(digest.as_hex().starts_with(digest.hex_prefix(24)));
    }

    #[test]
    fn test_u64_from_hex_range() {
        let digest = Digest::of_str("");
        // hex[0..8] of the empty-string digest is "e3b0c442"
        assert_eq!(digest.u64_from_hex_range(0, 8), 0xe3b0_c442);
    }

    #[test]
    fn test_u64_from_hex_range_clamped() {
        let digest = Digest::of_str("x");
        assert_eq!(digest.u64_from_hex_range(70, 80), 0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn digest_is_stable_and_full_length(data in ".{0,64}") {
                let first = Digest::of_str(&data);
                let second = Digest::of_str(&data);
                prop_assert_eq!(&first, &second);
                prop_assert_eq!(first.as_hex().len(), Digest::HEX_LEN);
                prop_assert!(first.as_hex().starts_with(first.hex_prefix(24)));
                prop_assert!(first.as_hex().chars().all(|c| c.is_ascii_hexdigit()));
            }
        }
    }
}
