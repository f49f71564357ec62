use crate::message::{age_ttls, min_ttl};
use crate::ports::{QueryPipeline, ResponseCache};
use async_trait::async_trait;
use bytes::Bytes;
use ferrous_gate_domain::{DomainError, RequestMeta};
use hickory_proto::op::{Message, ResponseCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fingerprint of a query used as the cache key.
///
/// Returns `None` for messages without a question, which are never cached.
pub fn cache_key(query: &Message) -> Option<String> {
    let question = query.queries().first()?;
    Some(format!(
        "{}|{}|{}|{}",
        question.query_class(),
        question.query_type(),
        question.name().to_lowercase(),
        u8::from(query.checking_disabled())
    ))
}

/// Serves repeated questions from a `ResponseCache` in front of another
/// entry.
///
/// Only NOERROR and NXDOMAIN responses that are not truncated and carry at
/// least one record with a non-zero TTL are stored. Cached TTLs are aged by
/// the time spent in the cache.
pub struct CachedPipeline {
    inner: Arc<dyn QueryPipeline>,
    cache: Arc<dyn ResponseCache>,
    max_ttl: u32,
}

impl CachedPipeline {
    pub fn new(inner: Arc<dyn QueryPipeline>, cache: Arc<dyn ResponseCache>, max_ttl: u32) -> Self {
        Self {
            inner,
            cache,
            max_ttl,
        }
    }

    fn lookup(&self, key: &str, query: &Message) -> Option<Message> {
        let hit = self.cache.get(key)?;

        let mut response = match Message::from_vec(&hit.value) {
            Ok(response) => response,
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable cached response");
                return None;
            }
        };

        let elapsed = hit.stored_at.elapsed().as_secs().min(u64::from(u32::MAX)) as u32;
        response.set_id(query.id());
        age_ttls(&mut response, elapsed);

        debug!(key = %key, elapsed_secs = elapsed, "Cache hit");
        Some(response)
    }

    fn try_store(&self, key: &str, response: &Message) {
        if !matches!(
            response.response_code(),
            ResponseCode::NoError | ResponseCode::NXDomain
        ) || response.truncated()
        {
            return;
        }

        let ttl = match min_ttl(response) {
            Some(ttl) => ttl.min(self.max_ttl),
            None => return,
        };
        if ttl == 0 {
            return;
        }

        match response.to_vec() {
            Ok(packed) => {
                let now = Instant::now();
                self.cache.store(
                    key,
                    Bytes::from(packed),
                    now,
                    now + Duration::from_secs(u64::from(ttl)),
                );
                debug!(key = %key, ttl = ttl, "Cached response");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to pack response for cache");
            }
        }
    }
}

#[async_trait]
impl QueryPipeline for CachedPipeline {
    async fn exec(
        &self,
        query: &Message,
        meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError> {
        let Some(key) = cache_key(query) else {
            return self.inner.exec(query, meta).await;
        };

        if let Some(response) = self.lookup(&key, query) {
            return Ok(Some(response));
        }

        let response = self.inner.exec(query, meta).await?;
        if let Some(ref response) = response {
            self.try_store(&key, response);
        }

        Ok(response)
    }
}
