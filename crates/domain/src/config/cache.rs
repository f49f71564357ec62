use serde::{Deserialize, Serialize};

/// In-memory response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached responses (0 = unbounded by count)
    #[serde(default = "default_cache_size")]
    pub size: usize,

    /// Background sweep cadence in seconds (0 = lazy expiry only)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Upper bound on how long a response stays cached, in seconds
    #[serde(default = "default_max_ttl")]
    pub max_ttl_secs: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            size: default_cache_size(),
            cleanup_interval_secs: default_cleanup_interval(),
            max_ttl_secs: default_max_ttl(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> usize {
    4096
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_max_ttl() -> u32 {
    3600
}
