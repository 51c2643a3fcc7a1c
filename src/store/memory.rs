//! In-process counter store.
//!
//! Single-node stand-in for the shared store: every primitive the engine
//! needs, no network. Used by the test suite and by deployments that run a
//! single instance and don't want a Redis dependency.
//!
//! Expiry is lazy: an expired entry is treated as missing on access and
//! physically removed the next time it is touched or when
//! [`purge_expired`](MemoryCounterStore::purge_expired) runs.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{CounterStore, StoreError, StoredValue};

enum Slot {
    Counter(u64),
    Bytes(Vec<u8>),
    SortedSet(HashMap<String, f64>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct MemoryCounterStore {
    data: DashMap<String, Entry>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }

    /// Current live (non-expired) key count.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.data.retain(|_, entry| !entry.is_expired(now));
    }

    /// Remove everything, expired or not.
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Remove the entry if it has expired, returning whether the key is live.
    fn ensure_live(&self, key: &str) -> bool {
        let now = Instant::now();
        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired(now) {
                return true;
            }
        } else {
            return false;
        }
        self.data.remove_if(key, |_, entry| entry.is_expired(now));
        false
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Glob match supporting `*` (any run of characters). That is the only
/// metacharacter the engine's key patterns use.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with '*' (last part empty) or all parts consumed.
    parts.last().is_some_and(|p| p.is_empty()) || rest.is_empty()
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.ensure_live(key);
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Counter(0),
            expires_at: Some(Instant::now() + ttl),
        });
        match &mut entry.slot {
            Slot::Counter(v) => {
                *v += 1;
                Ok(*v)
            }
            _ => Err(StoreError::Backend(format!(
                "key '{key}' holds a non-counter value"
            ))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        if !self.ensure_live(key) {
            return Ok(None);
        }
        let now = Instant::now();
        match self.data.get(key) {
            Some(entry) => match &entry.slot {
                Slot::Bytes(data) => Ok(Some(StoredValue {
                    data: data.clone(),
                    remaining_ttl: entry.expires_at.map(|at| at.saturating_duration_since(now)),
                })),
                _ => Err(StoreError::Backend(format!(
                    "key '{key}' holds a non-bytes value"
                ))),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.data.insert(
            key.to_string(),
            Entry {
                slot: Slot::Bytes(value.to_vec()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.remove(key);
        Ok(())
    }

    async fn zadd(
        &self,
        key: &str,
        member: &str,
        score: f64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.ensure_live(key);
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::SortedSet(HashMap::new()),
            expires_at: None,
        });
        // TTL refreshed on every add, matching EXPIRE after ZADD.
        entry.expires_at = Some(Instant::now() + ttl);
        match &mut entry.slot {
            Slot::SortedSet(members) => {
                members.insert(member.to_string(), score);
                Ok(())
            }
            _ => Err(StoreError::Backend(format!(
                "key '{key}' holds a non-zset value"
            ))),
        }
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        if !self.ensure_live(key) {
            return Ok(0);
        }
        match self.data.get_mut(key).as_deref_mut() {
            Some(Entry { slot: Slot::SortedSet(members), .. }) => {
                let before = members.len();
                members.retain(|_, score| *score < min || *score > max);
                Ok((before - members.len()) as u64)
            }
            Some(_) => Err(StoreError::Backend(format!(
                "key '{key}' holds a non-zset value"
            ))),
            None => Ok(0),
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        if !self.ensure_live(key) {
            return Ok(0);
        }
        match self.data.get(key).as_deref() {
            Some(Entry { slot: Slot::SortedSet(members), .. }) => Ok(members.len() as u64),
            Some(_) => Err(StoreError::Backend(format!(
                "key '{key}' holds a non-zset value"
            ))),
            None => Ok(0),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        Ok(self
            .data
            .iter()
            .filter(|e| !e.value().is_expired(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
