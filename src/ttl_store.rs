//! Keyed counters with TTL windows
//!
//! Fixed-window rate limiting per key (e.g. per owner). Each key's window
//! starts at its first hit and expires `ttl` later; an expired window counts
//! as empty. Entries live in a DashMap so concurrent dispatch tasks update
//! counters without a global lock.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at: Instant,
    count: u32,
}

pub struct TtlCounterStore<K> {
    store: DashMap<K, Window>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone> TtlCounterStore<K> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            store: DashMap::new(),
            ttl,
        }
    }

    /// Take one slot for `key` if fewer than `limit` were taken in the current window.
    ///
    /// Check and increment happen under the entry's shard lock.
    pub fn try_acquire(&self, key: &K, limit: u32) -> bool {
        let now = Instant::now();
        let mut entry = self.store.entry(key.clone()).or_insert(Window {
            opened_at: now,
            count: 0,
        });

        if now.duration_since(entry.opened_at) >= self.ttl {
            *entry = Window {
                opened_at: now,
                count: 0,
            };
        }

        if entry.count >= limit {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Give back a slot taken by `try_acquire` that ended up unused
    pub fn release(&self, key: &K) {
        if let Some(mut entry) = self.store.get_mut(key) {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    /// Keys whose live window already holds `limit` slots
    pub fn exhausted(&self, limit: u32) -> Vec<K> {
        self.store
            .iter()
            .filter(|w| w.opened_at.elapsed() < self.ttl && w.count >= limit)
            .map(|w| w.key().clone())
            .collect()
    }

    /// Drop expired windows; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.store.len();
        let ttl = self.ttl;
        self.store.retain(|_, w| w.opened_at.elapsed() < ttl);
        before - self.store.len()
    }
}
