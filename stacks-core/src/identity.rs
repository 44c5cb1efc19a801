//! Identity types for library-scoped records

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::ValidationError;
use crate::record_type::{KeyFormat, RecordType};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Alphabet used for generated record keys. Excludes 0, 1 and O.
pub const KEY_ALPHABET: &[u8] = b"23456789ABCDEFGHIJKLMNPQRSTUVWXYZ";

/// Length of a generated record key.
pub const KEY_LENGTH: usize = 8;

/// Length of a content-hash key in hex characters.
pub const CONTENT_HASH_KEY_LENGTH: usize = 32;

static TOKEN_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[23456789ABCDEFGHIJKLMNPQRSTUVWXYZ]{8}$").expect("token key regex is valid")
});

static CONTENT_HASH_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{32}$").expect("content hash regex is valid"));

// ============================================================================
// NUMERIC IDENTIFIERS
// ============================================================================

macro_rules! positive_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "u64", into = "u64")]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw identifier, rejecting zero.
            pub fn new(raw: u64) -> Result<Self, ValidationError> {
                if raw == 0 {
                    return Err(ValidationError::InvalidValue {
                        field: $field.to_string(),
                        value: raw.to_string(),
                        reason: "must be a positive integer".to_string(),
                    });
                }
                Ok(Self(raw))
            }

            /// Get the raw identifier.
            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl TryFrom<u64> for $name {
            type Error = ValidationError;

            fn try_from(raw: u64) -> Result<Self, Self::Error> {
                Self::new(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

positive_id!(
    /// Tenant identifier. Never reused.
    LibraryId,
    "libraryID"
);

positive_id!(
    /// Numeric record identifier, globally unique per record type.
    RecordId,
    "id"
);

positive_id!(
    /// Acting user identifier.
    UserId,
    "userID"
);

/// Physical partition holding a library's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-library monotonic write counter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    pub const ZERO: Version = Version(0);

    /// The version that follows this one.
    pub fn next(&self) -> Version {
        Version(self.0 + 1)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RECORD KEYS
// ============================================================================

/// Opaque, case-sensitive record key. Unique per library and record type.
///
/// A `RecordKey` only guarantees that it matches one of the known key
/// formats; callers that care about a particular record type check it with
/// [`RecordType::validate_key`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordKey(String);

impl RecordKey {
    /// Parse a key for the given record type.
    pub fn parse(record_type: RecordType, raw: &str) -> Result<Self, ValidationError> {
        if !record_type.info().key_format.matches(raw) {
            return Err(ValidationError::InvalidKey {
                record_type,
                key: raw.to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Generate a fresh random token key.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let key: String = (0..KEY_LENGTH)
            .map(|_| KEY_ALPHABET[rng.random_range(0..KEY_ALPHABET.len())] as char)
            .collect();
        Self(key)
    }

    /// Content-hash key for a relation triple.
    pub fn content_hash(subject: &str, predicate: &str, object: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(subject.as_bytes());
        hasher.update(b"_");
        hasher.update(predicate.as_bytes());
        hasher.update(b"_");
        hasher.update(object.as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..CONTENT_HASH_KEY_LENGTH / 2]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Which key format this key satisfies.
    pub fn format(&self) -> KeyFormat {
        if TOKEN_KEY_RE.is_match(&self.0) {
            KeyFormat::Token
        } else {
            KeyFormat::ContentHash
        }
    }
}

impl KeyFormat {
    /// Check a raw key against a key format.
    pub fn matches(self, raw: &str) -> bool {
        match self {
            KeyFormat::Token => TOKEN_KEY_RE.is_match(raw),
            KeyFormat::ContentHash => CONTENT_HASH_KEY_RE.is_match(raw),
        }
    }
}

impl TryFrom<String> for RecordKey {
    type Error = ValidationError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        if TOKEN_KEY_RE.is_match(&raw) || CONTENT_HASH_KEY_RE.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(ValidationError::InvalidValue {
                field: "key".to_string(),
                value: raw,
                reason: "not a record key".to_string(),
            })
        }
    }
}

impl From<RecordKey> for String {
    fn from(key: RecordKey) -> Self {
        key.0
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ids_reject_zero() {
        assert!(LibraryId::new(0).is_err());
        assert!(RecordId::new(0).is_err());
        assert_eq!(LibraryId::new(7).expect("positive id").get(), 7);
    }

    #[test]
    fn test_generated_key_is_valid_token() {
        for _ in 0..100 {
            let key = RecordKey::generate();
            assert_eq!(key.as_str().len(), KEY_LENGTH);
            assert!(RecordKey::parse(RecordType::Collection, key.as_str()).is_ok());
            assert_eq!(key.format(), KeyFormat::Token);
        }
    }

    #[test]
    fn test_parse_rejects_bad_alphabet() {
        assert!(RecordKey::parse(RecordType::Item, "ABCD0FGH").is_err());
        assert!(RecordKey::parse(RecordType::Item, "abcdefgh").is_err());
        assert!(RecordKey::parse(RecordType::Item, "ABCDEFG").is_err());
        assert!(RecordKey::parse(RecordType::Item, "ABCDEFGHJ").is_err());
    }

    #[test]
    fn test_relation_keys_are_content_hashes() {
        let key = RecordKey::content_hash("http://a", "dc:relation", "http://b");
        assert_eq!(key.as_str().len(), CONTENT_HASH_KEY_LENGTH);
        assert!(RecordKey::parse(RecordType::Relation, key.as_str()).is_ok());
        assert!(RecordKey::parse(RecordType::Collection, key.as_str()).is_err());
        assert_eq!(
            key,
            RecordKey::content_hash("http://a", "dc:relation", "http://b")
        );
    }

    #[test]
    fn test_key_serde_validates() {
        let ok: Result<RecordKey, _> = serde_json::from_str("\"ABCD2345\"");
        assert!(ok.is_ok());
        let bad: Result<RecordKey, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    proptest! {
        #[test]
        fn prop_token_keys_round_trip_through_parse(s in "[23456789ABCDEFGHIJKLMNPQRSTUVWXYZ]{8}") {
            let key = RecordKey::parse(RecordType::Search, &s).expect("valid token");
            prop_assert_eq!(key.as_str(), s.as_str());
        }
    }
}
