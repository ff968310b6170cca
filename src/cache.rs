//! In-memory TTL cache sitting in front of the rate store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::debug;
use tokio::time::Instant;

use crate::currency_code::CurrencyCode;
use crate::exchange_rate::ExchangeRate;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    Rate(ExchangeRate),
    History(Vec<ExchangeRate>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Result of [`RateCache::lookup`]: the live value, if any, and the
/// generation to hand back to [`RateCache::fill`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub value: Option<CachedValue>,
    pub generation: u64,
}

/// Cache keys: `rate:{CODE}` and `hist:{CODE}:{from}:{to}`. Timestamps keep
/// their sub-second part so distinct windows never share a key.
pub struct CacheKey;

impl CacheKey {
    pub fn rate(code: &CurrencyCode) -> String {
        format!("rate:{}", code)
    }

    pub fn history(code: &CurrencyCode, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
        format!(
            "hist:{}:{}:{}",
            code,
            from.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            to.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

/// Writes between two sweeps of expired entries.
const SWEEP_EVERY: u64 = 1024;

/// Shared between request handlers and the refresh scheduler. Never fails;
/// anything missing or expired is a miss.
///
/// `generation` counts invalidations across the whole cache. It is bumped
/// while the invalidated key's shard is locked and [`RateCache::fill`]
/// checks it under the same lock, so a fill that raced an invalidation of
/// its key is always dropped.
#[derive(Default)]
pub struct RateCache {
    entries: DashMap<String, CacheEntry>,
    generation: AtomicU64,
    writes: AtomicU64,
}

impl RateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<CachedValue> {
        self.lookup(key).value
    }

    pub fn lookup(&self, key: &str) -> Lookup {
        let generation = self.generation.load(Ordering::SeqCst);
        let found = self
            .entries
            .get(key)
            .map(|entry| entry.is_live().then(|| entry.value.clone()));

        let value = match found {
            Some(Some(value)) => {
                debug!("cache hit: {}", key);
                Some(value)
            }
            Some(None) => {
                debug!("cache entry expired: {}", key);
                self.entries.remove_if(key, |_, entry| !entry.is_live());
                None
            }
            None => {
                debug!("cache miss: {}", key);
                None
            }
        };

        Lookup { value, generation }
    }

    /// Unconditional overwrite.
    pub fn set(&self, key: impl Into<String>, value: CachedValue, ttl: Duration) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        self.note_write();
    }

    /// Populates `key` only if nothing was invalidated since the lookup that
    /// returned `generation`. Returns whether the value was stored.
    pub fn fill(&self, key: &str, value: CachedValue, ttl: Duration, generation: u64) -> bool {
        let stored = match self.entries.entry(key.to_string()) {
            _ if self.generation.load(Ordering::SeqCst) != generation => false,
            Entry::Occupied(mut occupied) => {
                occupied.insert(CacheEntry {
                    value,
                    expires_at: Instant::now() + ttl,
                });
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    value,
                    expires_at: Instant::now() + ttl,
                });
                true
            }
        };

        if stored {
            self.note_write();
        } else {
            debug!("cache fill skipped, invalidated since lookup: {}", key);
        }
        stored
    }

    pub fn invalidate(&self, key: &str) {
        let entry = self.entries.entry(key.to_string());
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Entry::Occupied(occupied) = entry {
            occupied.remove();
            debug!("cache invalidated: {}", key);
        }
    }

    /// Drops every entry. Only for process startup and shutdown.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    /// Removes every expired entry.
    pub fn purge_expired(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live());
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!("cache purged {} expired entries", purged);
        }
    }

    fn note_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            self.purge_expired();
        }
    }

    /// Number of keys holding a live value.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
