// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Bounded, time-expiring in-process cache.
//!
//! Every operation runs under a single exclusive lock. Expiry is lazy and
//! global: `get`, `has` and `set` first sweep out every expired entry, not
//! only the requested key. When an insert pushes the cache past `max_size`
//! the entry with the oldest access time is evicted until the bound holds.

use crate::clock::{SharedClock, SystemClock};
use crate::config::CacheConfig;
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Counters reported by [`Cache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub sets: u64,
    pub current_size: usize,
    pub max_size: usize,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
    /// Tie-breaker for entries touched within the same clock reading
    access_seq: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    sets: u64,
}

impl<V> Inner<V> {
    fn sweep(&mut self, now: DateTime<Utc>) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let expired = before - self.entries.len();
        if expired > 0 {
            debug!(expired, "Swept expired cache entries");
        }
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn evict_to(&mut self, max_size: usize, now: DateTime<Utc>) {
        while self.entries.len() > max_size {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.accessed_at, entry.access_seq))
                .map(|(key, _)| key.clone());

            let Some(key) = victim else { break };
            if let Some(entry) = self.entries.remove(&key) {
                self.evictions += 1;
                debug!(
                    key = %key,
                    age_secs = (now - entry.created_at).num_seconds(),
                    "Evicted least recently used cache entry"
                );
            }
        }
    }
}

/// Thread-safe bounded TTL cache keyed by strings.
pub struct Cache<V> {
    max_size: usize,
    default_ttl: Option<Duration>,
    clock: SharedClock,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> Cache<V> {
    /// Create a cache using the system clock.
    pub fn new(config: &CacheConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache reading time from `clock`.
    pub fn with_clock(config: &CacheConfig, clock: SharedClock) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            max_size: config.max_size,
            default_ttl: config.default_ttl(),
            clock,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_seq: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                sets: 0,
            }),
        })
    }

    /// Fetch a live value, refreshing its access time.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.sweep(now);

        let seq = inner.bump_seq();
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.accessed_at = now;
                entry.access_seq = seq;
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite a value.
    ///
    /// `ttl` overrides the configured default; with neither, the entry never
    /// expires and leaves only through eviction, `delete` or `clear`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let now = self.clock.now();
        let expires_at = ttl.or(self.default_ttl).and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
        });

        let mut inner = self.inner.lock();
        inner.sweep(now);

        let seq = inner.bump_seq();
        inner.entries.insert(
            key.into(),
            CacheEntry {
                value,
                created_at: now,
                accessed_at: now,
                access_seq: seq,
                expires_at,
            },
        );
        inner.sets += 1;
        inner.evict_to(self.max_size, now);
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Whether a live entry exists for `key`. Does not count as a hit or miss.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.sweep(now);
        inner.entries.contains_key(key)
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            sets: inner.sets,
            current_size: inner.entries.len(),
            max_size: self.max_size,
        }
    }

    /// Return the cached value, or compute, store and return it.
    ///
    /// The lock is not held while `compute` runs, so concurrent callers may
    /// compute the same value; the last writer wins.
    pub async fn get_or_insert_with<F, Fut>(&self, key: &str, ttl: Option<Duration>, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute().await;
        self.set(key, value.clone(), ttl);
        value
    }
}
