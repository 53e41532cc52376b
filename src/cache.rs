//! Short-lived result cache
//!
//! Scan and decode results are handed back to callers by token so a
//! multi-step workflow (scan, then decode or replay, then export) never has
//! to resubmit the bulk data. Entries live for a fixed TTL and the cache is
//! capacity-bounded; nothing is persisted.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Random bytes per token (256 bits)
const TOKEN_BYTES: usize = 32;

#[derive(Debug)]
pub struct CacheEntry<T> {
    /// URL-safe opaque token
    pub token: String,
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Insertion order, breaks `created_at` ties
    seq: u64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

struct Inner<T> {
    items: HashMap<String, Arc<CacheEntry<T>>>,
    next_seq: u64,
}

/// Time-boxed, capacity-bounded token → value store
pub struct EphemeralCache<T> {
    ttl: Duration,
    max_items: usize,
    inner: Mutex<Inner<T>>,
}

impl<T> EphemeralCache<T> {
    /// `max_items` must be at least 1; a zero TTL is allowed and makes every
    /// entry expire on creation.
    pub fn new(ttl: std::time::Duration, max_items: usize) -> anyhow::Result<Self> {
        if max_items == 0 {
            anyhow::bail!("cache max_items must be at least 1");
        }
        let ttl = Duration::from_std(ttl).map_err(|e| anyhow::anyhow!("cache ttl out of range: {}", e))?;
        if Utc::now().checked_add_signed(ttl).is_none() {
            anyhow::bail!("cache ttl out of range: {}s", ttl.num_seconds());
        }
        Ok(Self {
            ttl,
            max_items,
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                next_seq: 0,
            }),
        })
    }

    /// Store `value` and return its entry (token + expiry).
    ///
    /// Expired entries are pruned first; if the cache is then over capacity
    /// the oldest entries by creation time are evicted.
    pub fn create(&self, value: T) -> anyhow::Result<Arc<CacheEntry<T>>> {
        let token = new_token()?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| anyhow::anyhow!("cache ttl overflows the expiry time"))?;

        let mut inner = self.lock();
        inner.items.retain(|_, entry| !entry.is_expired(now));

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = Arc::new(CacheEntry {
            token: token.clone(),
            value,
            created_at: now,
            expires_at,
            seq,
        });
        inner.items.insert(token, entry.clone());

        while inner.items.len() > self.max_items {
            let oldest = inner
                .items
                .values()
                .min_by_key(|entry| (entry.created_at, entry.seq))
                .map(|entry| entry.token.clone());
            match oldest {
                Some(token) => {
                    debug!("Evicting cache entry created at {}", inner.items[&token].created_at);
                    inner.items.remove(&token);
                }
                None => break,
            }
        }

        Ok(entry)
    }

    /// Look up a token; an expired entry is removed and reported absent
    pub fn get(&self, token: &str) -> Option<Arc<CacheEntry<T>>> {
        let mut inner = self.lock();
        let entry = inner.items.get(token)?.clone();
        if entry.is_expired(Utc::now()) {
            inner.items.remove(token);
            return None;
        }
        Some(entry)
    }

    /// Entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn new_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow::anyhow!("Failed to generate token: {}", e))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn cache(ttl_secs: u64, max_items: usize) -> EphemeralCache<u32> {
        EphemeralCache::new(StdDuration::from_secs(ttl_secs), max_items).unwrap()
    }

    #[test]
    fn test_create_then_get() {
        let cache = cache(60, 4);
        let entry = cache.create(7).unwrap();

        assert_eq!(entry.expires_at - entry.created_at, Duration::seconds(60));
        let found = cache.get(&entry.token).expect("entry should be present");
        assert_eq!(found.value, 7);
        assert!(cache.get("no-such-token").is_none());
    }

    #[test]
    fn test_zero_ttl_is_immediately_absent() {
        let cache = cache(0, 4);
        let entry = cache.create(1).unwrap();

        assert!(cache.get(&entry.token).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = cache(60, 3);
        let tokens: Vec<String> = (0..4).map(|i| cache.create(i).unwrap().token.clone()).collect();

        assert_eq!(cache.len(), 3);
        assert!(cache.get(&tokens[0]).is_none());
        for (value, token) in tokens.iter().enumerate().skip(1) {
            assert_eq!(cache.get(token).unwrap().value, value as u32);
        }
    }

    #[test]
    fn test_expired_entries_pruned_on_create() {
        let cache = cache(0, 8);
        cache.create(1).unwrap();
        cache.create(2).unwrap();
        // Each create prunes everything before it
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_tokens_are_distinct_and_url_safe() {
        let cache = cache(60, 8);
        let a = cache.create(1).unwrap();
        let b = cache.create(2).unwrap();

        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 43);
        assert!(a
            .token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(EphemeralCache::<u32>::new(StdDuration::from_secs(60), 0).is_err());
    }

    #[test]
    fn test_unrepresentable_ttl_rejected() {
        let ten_million_years = StdDuration::from_secs(10_000_000_000_000);
        assert!(EphemeralCache::<u32>::new(ten_million_years, 4).is_err());
        assert!(EphemeralCache::<u32>::new(StdDuration::from_secs(u64::MAX), 4).is_err());
    }
}
