use bytes::Bytes;
use ferrous_gate_application::ports::{CachedResponse, ResponseCache};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Entry {
    value: Bytes,
    stored_at: Instant,
    expires_at: Instant,
}

type Store = Mutex<LruCache<String, Entry>>;

/// Bounded, TTL-aware LRU store of packed answers.
///
/// Reads promote entries. Expired entries are dropped lazily on lookup and,
/// when a cleanup interval is configured, by a background sweep. A capacity
/// of 0 leaves the store unbounded by count.
pub struct MemCache {
    store: Arc<Store>,
    shutdown: CancellationToken,
}

impl MemCache {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A non-zero `cleanup_interval` starts a background sweep on the current
    /// tokio runtime, or on a dedicated thread when called outside one;
    /// `Duration::ZERO` disables it. The thread notices `close` at its next
    /// tick.
    pub fn new(capacity: usize, cleanup_interval: Duration) -> Self {
        let lru = match NonZeroUsize::new(capacity) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        let cache = Self {
            store: Arc::new(Mutex::new(lru)),
            shutdown: CancellationToken::new(),
        };

        if !cleanup_interval.is_zero() {
            cache.start_sweeper(cleanup_interval);
        }

        cache
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        lock_store(&self.store)
    }

    fn start_sweeper(&self, interval: Duration) {
        let store: Weak<Store> = Arc::downgrade(&self.store);
        let shutdown = self.shutdown.clone();

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(sweep_task(store, shutdown, interval));
            }
            Err(_) => spawn_sweep_thread(store, shutdown, interval),
        }
    }

    /// Insert or replace the entry for `key`, evicting the least recently
    /// used entry when at capacity.
    pub fn store(&self, key: &str, value: Bytes, stored_at: Instant, expires_at: Instant) {
        self.lock().put(
            key.to_owned(),
            Entry {
                value,
                stored_at,
                expires_at,
            },
        );
    }

    /// Look up `key`. An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<(Bytes, Instant)> {
        let now = Instant::now();
        let mut lru = self.lock();

        match lru.get(key) {
            None => return None,
            Some(entry) if now < entry.expires_at => {
                return Some((entry.value.clone(), entry.stored_at));
            }
            Some(_) => {}
        }

        lru.pop(key);
        None
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub fn clean(&self) -> usize {
        sweep(&self.store, Instant::now())
    }

    /// Stop the background sweep. Safe to call more than once.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MemCache {
    fn drop(&mut self) {
        self.close();
    }
}

impl ResponseCache for MemCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        MemCache::get(self, key).map(|(value, stored_at)| CachedResponse { value, stored_at })
    }

    fn store(&self, key: &str, value: Bytes, stored_at: Instant, expires_at: Instant) {
        MemCache::store(self, key, value, stored_at, expires_at);
    }
}

fn lock_store(store: &Store) -> MutexGuard<'_, LruCache<String, Entry>> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn sweep_task(store: Weak<Store>, shutdown: CancellationToken, interval: Duration) {
    info!(interval_ms = interval.as_millis() as u64, "Memory cache sweep started");

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Memory cache sweep stopped");
                break;
            }
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = sweep(&store, Instant::now());
                if removed > 0 {
                    debug!(removed, "Removed expired cache entries");
                }
            }
        }
    }
}

fn spawn_sweep_thread(store: Weak<Store>, shutdown: CancellationToken, interval: Duration) {
    let spawned = std::thread::Builder::new()
        .name("mem-cache-sweep".to_string())
        .spawn(move || {
            info!(interval_ms = interval.as_millis() as u64, "Memory cache sweep thread started");
            loop {
                std::thread::sleep(interval);
                if shutdown.is_cancelled() {
                    debug!("Memory cache sweep stopped");
                    break;
                }
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = sweep(&store, Instant::now());
                if removed > 0 {
                    debug!(removed, "Removed expired cache entries");
                }
            }
        });

    if let Err(e) = spawned {
        warn!(error = %e, "Failed to start memory cache sweep thread");
    }
}

fn sweep(store: &Store, now: Instant) -> usize {
    let mut lru = lock_store(store);
    let expired: Vec<String> = lru
        .iter()
        .filter(|(_, entry)| entry.expires_at <= now)
        .map(|(key, _)| key.clone())
        .collect();

    for key in &expired {
        lru.pop(key);
    }
    expired.len()
}
