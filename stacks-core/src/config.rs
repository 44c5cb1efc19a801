//! Configuration for the object cache and batch engine.
//!
//! Loaded from environment variables with defaults suitable for development
//! and tests.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, StacksError, StacksResult};
use crate::record_type::RecordType;

/// Bumped whenever the layout of shared-cache entries changes.
pub const DEFAULT_CACHE_FORMAT_VERSION: u32 = 3;

/// Default per-request write cap for every batch-capable type.
pub const DEFAULT_MAX_WRITE: usize = 50;

/// Predicate that records merges; relations using it survive deletes.
pub const MERGE_TRACKING_PREDICATE: &str = "dc:replaces";

// ============================================================================
// SHARED CACHE
// ============================================================================

/// Which shared cache backs the process-local caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharedCacheConfig {
    /// No shared cache; every miss goes to storage.
    Disabled,
    /// Process-local map. Useful for tests and single-node deployments.
    InMemory,
    /// Memory-mapped LMDB environment at `path`.
    Lmdb { path: PathBuf, max_size_mb: usize },
}

// ============================================================================
// WRITE LIMITS
// ============================================================================

/// Maximum number of objects accepted per batch, per record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxWriteLimits {
    pub collections: usize,
    pub searches: usize,
    pub items: usize,
}

impl Default for MaxWriteLimits {
    fn default() -> Self {
        Self {
            collections: DEFAULT_MAX_WRITE,
            searches: DEFAULT_MAX_WRITE,
            items: DEFAULT_MAX_WRITE,
        }
    }
}

impl MaxWriteLimits {
    /// Limit for a record type; `None` when the type takes no batch writes.
    pub fn for_type(&self, record_type: RecordType) -> Option<usize> {
        match record_type {
            RecordType::Collection => Some(self.collections),
            RecordType::Search => Some(self.searches),
            RecordType::Item => Some(self.items),
            RecordType::Creator | RecordType::Tag | RecordType::Relation => None,
        }
    }
}

// ============================================================================
// STACKS CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StacksConfig {
    /// Embedded in every shared-cache key.
    pub cache_format_version: u32,
    pub max_write: MaxWriteLimits,
    pub shared_cache: SharedCacheConfig,
    /// Base of canonical record URIs, without trailing slash.
    pub uri_base: String,
    /// Relations with these predicates are kept when their subject is deleted.
    pub merge_tracking_predicates: Vec<String>,
    /// Retries when a generated key collides with an existing one.
    pub key_generation_attempts: u32,
}

impl Default for StacksConfig {
    fn default() -> Self {
        Self {
            cache_format_version: DEFAULT_CACHE_FORMAT_VERSION,
            max_write: MaxWriteLimits::default(),
            shared_cache: SharedCacheConfig::InMemory,
            uri_base: "http://stacks.local".to_string(),
            merge_tracking_predicates: vec![MERGE_TRACKING_PREDICATE.to_string()],
            key_generation_attempts: 10,
        }
    }
}

impl StacksConfig {
    /// Create a StacksConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STACKS_CACHE_FORMAT_VERSION` (default: 3)
    /// - `STACKS_MAX_WRITE_COLLECTIONS`, `STACKS_MAX_WRITE_SEARCHES`,
    ///   `STACKS_MAX_WRITE_ITEMS` (default: 50)
    /// - `STACKS_SHARED_CACHE`: "memory", "lmdb" or "none" (default: memory)
    /// - `STACKS_LMDB_PATH`, `STACKS_LMDB_MAX_SIZE_MB` (default: 256)
    /// - `STACKS_URI_BASE` (default: http://stacks.local)
    /// - `STACKS_MERGE_TRACKING_PREDICATES`: comma-separated (default: dc:replaces)
    /// - `STACKS_KEY_GENERATION_ATTEMPTS` (default: 10)
    ///
    /// The result is validated before it is returned.
    pub fn from_env() -> StacksResult<Self> {
        let defaults = Self::default();

        let cache_format_version = env_parse("STACKS_CACHE_FORMAT_VERSION")
            .unwrap_or(defaults.cache_format_version);

        let max_write = MaxWriteLimits {
            collections: env_parse("STACKS_MAX_WRITE_COLLECTIONS")
                .unwrap_or(defaults.max_write.collections),
            searches: env_parse("STACKS_MAX_WRITE_SEARCHES").unwrap_or(defaults.max_write.searches),
            items: env_parse("STACKS_MAX_WRITE_ITEMS").unwrap_or(defaults.max_write.items),
        };

        let shared_cache = match std::env::var("STACKS_SHARED_CACHE")
            .ok()
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            None | Some("memory") => SharedCacheConfig::InMemory,
            Some("none") => SharedCacheConfig::Disabled,
            Some("lmdb") => SharedCacheConfig::Lmdb {
                path: std::env::var("STACKS_LMDB_PATH")
                    .map(PathBuf::from)
                    .map_err(|_| ConfigError::MissingRequired {
                        field: "STACKS_LMDB_PATH".to_string(),
                    })?,
                max_size_mb: env_parse("STACKS_LMDB_MAX_SIZE_MB").unwrap_or(256),
            },
            Some(other) => {
                return Err(StacksError::Config(ConfigError::InvalidValue {
                    field: "STACKS_SHARED_CACHE".to_string(),
                    value: other.to_string(),
                    reason: "expected memory, lmdb or none".to_string(),
                }))
            }
        };

        let uri_base = std::env::var("STACKS_URI_BASE")
            .ok()
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.uri_base);

        let merge_tracking_predicates = std::env::var("STACKS_MERGE_TRACKING_PREDICATES")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.merge_tracking_predicates);

        let key_generation_attempts = env_parse("STACKS_KEY_GENERATION_ATTEMPTS")
            .unwrap_or(defaults.key_generation_attempts);

        let config = Self {
            cache_format_version,
            max_write,
            shared_cache,
            uri_base,
            merge_tracking_predicates,
            key_generation_attempts,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StacksResult<()> {
        if self.cache_format_version == 0 {
            return Err(invalid(
                "cache_format_version",
                self.cache_format_version,
                "cache_format_version must be greater than 0",
            ));
        }

        for (field, value) in [
            ("max_write.collections", self.max_write.collections),
            ("max_write.searches", self.max_write.searches),
            ("max_write.items", self.max_write.items),
        ] {
            if value == 0 {
                return Err(invalid(field, value, "write limits must be greater than 0"));
            }
        }

        if self.uri_base.trim().is_empty() {
            return Err(StacksError::Config(ConfigError::MissingRequired {
                field: "uri_base".to_string(),
            }));
        }

        if self.key_generation_attempts == 0 {
            return Err(invalid(
                "key_generation_attempts",
                self.key_generation_attempts,
                "key_generation_attempts must be greater than 0",
            ));
        }

        if let SharedCacheConfig::Lmdb { path, max_size_mb } = &self.shared_cache {
            if path.as_os_str().is_empty() {
                return Err(StacksError::Config(ConfigError::MissingRequired {
                    field: "shared_cache.path".to_string(),
                }));
            }
            if *max_size_mb == 0 {
                return Err(invalid(
                    "shared_cache.max_size_mb",
                    max_size_mb,
                    "LMDB map size must be greater than 0",
                ));
            }
        }

        Ok(())
    }

    /// Whether relations with this predicate survive the deletion of their subject.
    pub fn is_merge_tracking(&self, predicate: &str) -> bool {
        self.merge_tracking_predicates.iter().any(|p| p == predicate)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> StacksError {
    StacksError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = StacksConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_format_version, 3);
        assert!(config.is_merge_tracking("dc:replaces"));
        assert!(!config.is_merge_tracking("dc:relation"));
    }

    #[test]
    fn test_zero_write_limit_rejected() {
        let mut config = StacksConfig::default();
        config.max_write.searches = 0;
        assert!(matches!(
            config.validate(),
            Err(StacksError::Config(ConfigError::InvalidValue { field, .. })) if field == "max_write.searches"
        ));
    }

    #[test]
    fn test_lmdb_requires_size() {
        let config = StacksConfig {
            shared_cache: SharedCacheConfig::Lmdb {
                path: PathBuf::from("/tmp/stacks"),
                max_size_mb: 0,
            },
            ..StacksConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_write_limits_by_type() {
        let limits = MaxWriteLimits::default();
        assert_eq!(limits.for_type(RecordType::Collection), Some(50));
        assert_eq!(limits.for_type(RecordType::Tag), None);
    }
}
