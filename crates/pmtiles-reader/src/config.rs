//! Reader configuration

use std::fmt;
use std::str::FromStr;

use pmtiles_cache::CacheConfig;
use pmtiles_protocol::HttpConfig;
use serde::{Deserialize, Serialize};

/// Which cache implementation an [`Archive`](crate::Archive) builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Share in-flight fetches between concurrent callers
    #[default]
    SharedPromise,
    /// Store only resolved values
    ResolvedValue,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedPromise => write!(f, "shared-promise"),
            Self::ResolvedValue => write!(f, "resolved-value"),
        }
    }
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shared" | "shared-promise" | "shared_promise" => Ok(Self::SharedPromise),
            "resolved" | "resolved-value" | "resolved_value" => Ok(Self::ResolvedValue),
            other => Err(format!("unknown cache strategy: {other}")),
        }
    }
}

/// Settings for an [`Archive`](crate::Archive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Cache limits and prefetch behaviour
    pub cache: CacheConfig,

    /// Cache implementation
    pub strategy: CacheStrategy,

    /// Directories visited per lookup, root included
    pub max_directory_depth: u8,

    /// Settings used when opening `http(s)://` locations
    pub http: HttpConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            strategy: CacheStrategy::default(),
            max_directory_depth: 4,
            http: HttpConfig::default(),
        }
    }
}

impl ReaderConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Reads `PMTILES_CACHE_STRATEGY` and `PMTILES_MAX_DIRECTORY_DEPTH`, plus
    /// the variables read by [`CacheConfig::from_env`] and
    /// [`HttpConfig::from_env`].
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache: CacheConfig::from_env(),
            strategy: std::env::var("PMTILES_CACHE_STRATEGY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.strategy),
            max_directory_depth: std::env::var("PMTILES_MAX_DIRECTORY_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_directory_depth),
            http: HttpConfig::from_env(),
        }
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_directory_depth(mut self, depth: u8) -> Self {
        self.max_directory_depth = depth;
        self
    }

    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_directory_depth == 0 {
            return Err("max_directory_depth must be at least 1".to_string());
        }
        self.cache.validate()?;
        self.http.validate()
    }
}
