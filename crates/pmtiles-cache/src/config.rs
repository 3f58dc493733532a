//! Cache configuration

use serde::{Deserialize, Serialize};

use pmtiles_formats::HEADER_SIZE;

/// Settings shared by both cache strategies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry count above which the least recently used entries are pruned
    pub max_entries: usize,

    /// Decode the root directory from the header read when it fits
    pub prefetch: bool,

    /// Bytes requested when reading the header
    pub header_fetch_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            prefetch: true,
            header_fetch_size: 16_384,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Reads `PMTILES_CACHE_MAX_ENTRIES`, `PMTILES_CACHE_PREFETCH` and
    /// `PMTILES_HEADER_FETCH_SIZE`; unset or unparsable values keep their
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: std::env::var("PMTILES_CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_entries),
            prefetch: std::env::var("PMTILES_CACHE_PREFETCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.prefetch),
            header_fetch_size: std::env::var("PMTILES_HEADER_FETCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.header_fetch_size),
        }
    }

    /// Set the maximum entry count
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Enable or disable root directory prefetch
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Set the header read size
    pub fn with_header_fetch_size(mut self, size: u64) -> Self {
        self.header_fetch_size = size;
        self
    }

    /// Number of entries kept after a prune
    pub(crate) fn prune_target(&self) -> usize {
        self.max_entries - self.max_entries / 10
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }
        if self.header_fetch_size < HEADER_SIZE as u64 {
            return Err(format!(
                "header_fetch_size must be at least {HEADER_SIZE} bytes"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 100);
        assert!(config.prefetch);
        assert_eq!(config.header_fetch_size, 16_384);
        assert!(config.validate().is_ok());
        assert_eq!(config.prune_target(), 90);
    }

    #[test]
    fn test_validate() {
        assert!(CacheConfig::new().with_max_entries(0).validate().is_err());
        assert!(CacheConfig::new().with_header_fetch_size(100).validate().is_err());
        assert!(CacheConfig::new().with_header_fetch_size(127).validate().is_ok());
    }

    #[test]
    fn test_small_caches_keep_all_but_one_tenth() {
        assert_eq!(CacheConfig::new().with_max_entries(5).prune_target(), 5);
        assert_eq!(CacheConfig::new().with_max_entries(10).prune_target(), 9);
    }
}
