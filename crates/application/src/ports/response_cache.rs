use bytes::Bytes;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Packed wire-format answer
    pub value: Bytes,
    pub stored_at: Instant,
}

/// Keyed store of packed answers with per-entry expiry.
///
/// Implementations must be safe to share across every concurrent query.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedResponse>;

    fn store(&self, key: &str, value: Bytes, stored_at: Instant, expires_at: Instant);
}
