//! Redis-backed counter store.
//!
//! One `ConnectionManager` shared by every component; all keys optionally
//! namespaced with a prefix so the engine can share an instance with other
//! applications. Every operation runs under a single short deadline
//! (`op_timeout`, hundreds of milliseconds) covering its internal retries,
//! so a dead store costs a bounded, predictable amount of request latency
//! before the caller's fallback policy takes over.
//!
//! In-flight commands are not cancelled on caller abandonment; they run to
//! completion so the store is never left with a half-applied update.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, AsyncCommands, Client};

use super::traits::{CounterStore, StoreError, StoredValue};
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisCounterStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g. "edge:" → "edge:rl:clientA:42")
    prefix: String,
    op_timeout: Duration,
}

impl RedisCounterStore {
    /// Connect without a key prefix and the default 250 ms operation deadline.
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        Self::with_options(connection_string, None, Duration::from_millis(250)).await
    }

    /// Connect with an optional key prefix and per-operation deadline.
    ///
    /// Connection setup uses the startup retry preset: a bad URL fails
    /// within a few seconds instead of hanging the host.
    pub async fn with_options(
        connection_string: &str,
        prefix: Option<&str>,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(connection_string)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(map_redis_err)?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            op_timeout,
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    #[inline]
    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix).unwrap_or(key)
        }
    }

    /// Get a clone of the connection manager (for host-level probes).
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Run `fut` under the per-operation deadline. Expiry maps to
    /// [`StoreError::Timeout`]; the command keeps running on the connection
    /// and is not cancelled mid-write.
    async fn with_deadline<T, F>(&self, name: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                crate::metrics::record_store_timeout(name);
                Err(StoreError::Timeout)
            }
        }
    }
}

fn map_redis_err(e: redis::RedisError) -> StoreError {
    if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);
        let ttl_secs = ttl.as_secs().max(1);

        self.with_deadline("incr", retry("redis_incr", &RetryConfig::operation(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                // EXPIRE NX arms the TTL only when the counter is created,
                // so the window does not slide on subsequent increments.
                let (count, _): (u64, i64) = pipe()
                    .cmd("INCR").arg(&key)
                    .cmd("EXPIRE").arg(&key).arg(ttl_secs).arg("NX")
                    .query_async(&mut conn)
                    .await
                    .map_err(map_redis_err)?;
                Ok(count)
            }
        }))
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        self.with_deadline("get", retry("redis_get", &RetryConfig::operation(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let (data, ttl_secs): (Option<Vec<u8>>, i64) = pipe()
                    .get(&key)
                    .ttl(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(map_redis_err)?;
                Ok(data.map(|data| StoredValue {
                    data,
                    // TTL returns -1 for "no expiry", -2 for "missing".
                    remaining_ttl: (ttl_secs >= 0).then(|| Duration::from_secs(ttl_secs as u64)),
                }))
            }
        }))
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);
        let value = value.to_vec();
        let ttl_secs = ttl.as_secs().max(1);

        self.with_deadline("set", retry("redis_set", &RetryConfig::operation(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                let _: () = conn.set_ex(&key, &value, ttl_secs).await.map_err(map_redis_err)?;
                Ok(())
            }
        }))
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        self.with_deadline("delete", retry("redis_delete", &RetryConfig::operation(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let _: () = conn.del(&key).await.map_err(map_redis_err)?;
                Ok(())
            }
        }))
        .await
    }

    /// Single multi-key DEL rather than the sequential default.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let conn = self.connection.clone();
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();

        self.with_deadline("delete_many", retry("redis_delete_many", &RetryConfig::operation(), || {
            let mut conn = conn.clone();
            let keys = prefixed.clone();
            async move {
                let removed: u64 = cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(map_redis_err)?;
                Ok(removed)
            }
        }))
        .await
    }

    async fn zadd(
        &self,
        key: &str,
        member: &str,
        score: f64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);
        let member = member.to_string();
        let ttl_secs = ttl.as_secs().max(1);

        self.with_deadline("zadd", retry("redis_zadd", &RetryConfig::operation(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            let member = member.clone();
            async move {
                // TTL refreshed on every add so an idle identity's set expires.
                let _: ((), i64) = pipe()
                    .zadd(&key, &member, score)
                    .cmd("EXPIRE").arg(&key).arg(ttl_secs)
                    .query_async(&mut conn)
                    .await
                    .map_err(map_redis_err)?;
                Ok(())
            }
        }))
        .await
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        self.with_deadline("zremrangebyscore", retry("redis_zremrangebyscore", &RetryConfig::operation(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let removed: u64 = conn
                    .zrembyscore(&key, min, max)
                    .await
                    .map_err(map_redis_err)?;
                Ok(removed)
            }
        }))
        .await
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        self.with_deadline("zcard", retry("redis_zcard", &RetryConfig::operation(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let card: u64 = conn.zcard(&key).await.map_err(map_redis_err)?;
                Ok(card)
            }
        }))
        .await
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.connection.clone();
        let pattern = self.prefixed_key(pattern);

        // SCAN walks the whole keyspace cursor by cursor; give it a looser
        // deadline than point operations.
        let scan = async move {
            let mut conn = conn;
            let mut keys = Vec::new();
            let mut iter = conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(map_redis_err)?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            Ok::<_, StoreError>(keys)
        };

        let keys = match tokio::time::timeout(self.op_timeout * 4, scan).await {
            Ok(res) => res?,
            Err(_) => {
                crate::metrics::record_store_timeout("scan_keys");
                return Err(StoreError::Timeout);
            }
        };

        Ok(keys.iter().map(|k| self.strip_prefix(k).to_string()).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.connection.clone();

        self.with_deadline("ping", async move {
            let mut conn = conn;
            let _: String = cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(map_redis_err)?;
            Ok(())
        })
        .await
    }
}
