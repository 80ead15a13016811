//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use bugetar_cache::CacheConfig;

/// Tunables for an [`AggregationEngine`](crate::AggregationEngine).
///
/// Every field has a default, so an empty JSON object is a valid
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of cached results.
    pub max_items: usize,
    /// Maximum summed size of cached results, in serialized bytes.
    pub max_bytes: usize,
    /// Lifetime of a cached result in seconds.
    pub ttl_secs: u64,
    /// Deadline for the rows and count queries of one aggregation.
    pub storage_timeout_ms: u64,
    /// Fail euro conversions for years without a known rate instead of
    /// using a rate of 1.
    pub strict_exchange_rates: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_bytes: 64 * 1024 * 1024,
            ttl_secs: 3600,
            storage_timeout_ms: 30_000,
            strict_exchange_rates: false,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed JSON or unknown fields.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The cache limits.
    pub const fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_items: self.max_items,
            max_bytes: self.max_bytes,
            ttl: Duration::from_secs(self.ttl_secs),
        }
    }

    /// The storage deadline.
    pub const fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_json(r#"{"ttl_secs": 60, "strict_exchange_rates": true}"#)
            .unwrap();
        assert_eq!(config.cache_config().ttl, Duration::from_secs(60));
        assert_eq!(config.max_items, 1000);
        assert!(config.strict_exchange_rates);
        assert_eq!(config.storage_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(EngineConfig::from_json(r#"{"ttl": 60}"#).is_err());
    }
}
