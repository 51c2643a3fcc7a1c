// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded in-process cache tier.
//!
//! A DashMap of serialized values plus an insertion-order queue under a
//! mutex. When an insert pushes the map past its bound, the
//! oldest-inserted entry is evicted first; not LRU, and deliberately so —
//! the shared tier is the source of truth, so the local tier only needs to
//! be cheap and bounded, not clever. Overwriting a key refreshes its
//! insertion position.
//!
//! No I/O happens under the order lock; critical sections are a queue
//! push/pop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

struct LocalEntry {
    data: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
    /// Matches this entry to its position in the order queue; an overwrite
    /// bumps the seq so the stale queue slot is skipped at eviction time.
    seq: u64,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

pub struct LocalCache {
    entries: DashMap<String, LocalEntry>,
    order: Mutex<VecDeque<(String, u64)>>,
    max_entries: usize,
    seq: AtomicU64,
}

impl LocalCache {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_entries: max_entries.max(1),
            seq: AtomicU64::new(0),
        }
    }

    /// Fetch a live entry's bytes. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.data.clone());
            }
        } else {
            return None;
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    pub fn insert(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key.to_string(),
            LocalEntry {
                data,
                inserted_at: Instant::now(),
                ttl,
                seq,
            },
        );
        {
            let mut order = self.order.lock();
            order.push_back((key.to_string(), seq));
        }
        self.evict_over_bound();
    }

    /// Returns whether the key was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every key starting with `prefix`. Returns how many went.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.order.lock().clear();
    }

    /// Pop queue slots oldest-first until the map is back under its bound.
    /// Slots whose seq no longer matches (overwritten or deleted keys) are
    /// skipped; the live overwrite has a fresher slot further back.
    fn evict_over_bound(&self) {
        let mut evicted = 0usize;
        let mut order = self.order.lock();
        while self.entries.len() > self.max_entries {
            let Some((key, seq)) = order.pop_front() else {
                break;
            };
            if self
                .entries
                .remove_if(&key, |_, entry| entry.seq == seq)
                .is_some()
            {
                evicted += 1;
            }
        }
        drop(order);

        if evicted > 0 {
            crate::metrics::record_cache_eviction(evicted);
        }
        crate::metrics::set_cache_local_entries(self.entries.len());
    }
}
