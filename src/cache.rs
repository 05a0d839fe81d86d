//! Tiered cache for collected router data.
//!
//! Reads try the remote Redis tier first and fall through to a local
//! in-process map; writes go through to both tiers unconditionally. The
//! remote tier is strictly best-effort: it may be absent at construction
//! time, and every remote error is logged and swallowed so cache callers
//! only ever observe a hit or a miss.
//!
//! Entries carry their own creation and expiry metadata, so both tiers
//! apply the same validity rule on read: an entry is readable only while
//! `now < expires_at`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::error::CacheError;

/// Local tier size cap; exceeded inserts prune down to the watermark.
const LOCAL_CAPACITY: usize = 100;
const LOCAL_WATERMARK: usize = 50;

/// Budget for any single remote-tier operation.
const REMOTE_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// One cached payload plus its lifetime metadata. The same JSON shape is
/// stored in both tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    data: Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn new(data: Value, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        Self {
            data,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Cache usage counters exposed to status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheStats {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
    pub remote_available: bool,
    pub remote_hits: u64,
    pub local_hits: u64,
    pub local_size: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    remote_hits: AtomicU64,
    local_hits: AtomicU64,
}

/// Two-tier key/value cache with TTL expiry.
pub struct TieredCache {
    remote: RwLock<Option<ConnectionManager>>,
    redis_url: Option<String>,
    local: Mutex<HashMap<String, StoredEntry>>,
    counters: Counters,
}

impl TieredCache {
    /// Builds the cache, probing the remote tier when a URL is configured.
    /// A dead remote tier is non-fatal: the cache degrades to local-only
    /// operation and only re-probes on an explicit [`reconnect_remote`].
    ///
    /// [`reconnect_remote`]: TieredCache::reconnect_remote
    pub async fn connect(redis_url: Option<String>) -> Self {
        let remote = match redis_url.as_deref() {
            Some(url) => open_remote(url).await,
            None => None,
        };

        if remote.is_some() {
            info!("remote cache tier connected");
        } else if redis_url.is_some() {
            warn!("remote cache tier unavailable, running local-only");
        }

        Self {
            remote: RwLock::new(remote),
            redis_url,
            local: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Local-only cache, used when no remote tier is configured.
    pub fn local_only() -> Self {
        Self {
            remote: RwLock::new(None),
            redis_url: None,
            local: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Re-probes the configured remote tier. Returns whether the remote
    /// tier is usable afterwards.
    pub async fn reconnect_remote(&self) -> bool {
        let Some(url) = self.redis_url.clone() else {
            return false;
        };

        let manager = open_remote(&url).await;
        let connected = manager.is_some();
        *self.remote.write().await = manager;
        if connected {
            info!("remote cache tier reconnected");
        }
        connected
    }

    /// Reads a value, trying the remote tier first and falling through to
    /// the local tier. Expired entries count as misses.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = Utc::now();

        if let Some(manager) = self.remote_handle().await {
            match remote_get(manager, key).await {
                Ok(Some(entry)) if entry.is_valid_at(now) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    self.counters.remote_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.data);
                }
                Ok(_) => {}
                Err(err) => debug!("remote tier read failed for {key:?}: {err}"),
            }
        }

        let mut local = self.local.lock().await;
        match local.get(key) {
            Some(entry) if entry.is_valid_at(now) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            Some(_) => {
                local.remove(key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Writes a value through to both tiers. The local write always
    /// succeeds; the remote write is best-effort.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = StoredEntry::new(value, ttl);

        if let Some(manager) = self.remote_handle().await {
            if let Err(err) = remote_set(manager, key, &entry, ttl).await {
                debug!("remote tier write failed for {key:?}: {err}");
            }
        }

        let mut local = self.local.lock().await;
        local.insert(key.to_string(), entry);
        prune_local(&mut local);
    }

    /// Removes entries from both tiers. With a pattern, keys containing
    /// the substring are removed; without one, everything goes.
    pub async fn clear(&self, pattern: Option<&str>) {
        if let Some(manager) = self.remote_handle().await {
            if let Err(err) = remote_clear(manager, pattern).await {
                warn!("remote tier clear failed: {err}");
            }
        }

        let mut local = self.local.lock().await;
        match pattern {
            Some(pattern) => local.retain(|key, _| !key.contains(pattern)),
            None => local.clear(),
        }
    }

    /// Snapshot of hit/miss counters and tier state.
    pub async fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };

        CacheStats {
            total_requests: total,
            hits,
            misses,
            hit_rate_percent: hit_rate,
            remote_available: self.remote.read().await.is_some(),
            remote_hits: self.counters.remote_hits.load(Ordering::Relaxed),
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            local_size: self.local.lock().await.len(),
        }
    }

    async fn remote_handle(&self) -> Option<ConnectionManager> {
        self.remote.read().await.clone()
    }
}

/// Prunes expired entries, then enforces the size cap by dropping the
/// oldest-created entries down to the watermark. Age-based on purpose:
/// collected categories are rewritten wholesale, so recency of creation
/// is the only ordering that matters here.
fn prune_local(local: &mut HashMap<String, StoredEntry>) {
    let now = Utc::now();
    local.retain(|_, entry| entry.is_valid_at(now));

    if local.len() <= LOCAL_CAPACITY {
        return;
    }

    let mut by_age: Vec<(String, DateTime<Utc>)> = local
        .iter()
        .map(|(key, entry)| (key.clone(), entry.created_at))
        .collect();
    by_age.sort_by_key(|(_, created_at)| *created_at);

    let excess = local.len() - LOCAL_WATERMARK;
    for (key, _) in by_age.into_iter().take(excess) {
        local.remove(&key);
    }
}

async fn open_remote(url: &str) -> Option<ConnectionManager> {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(err) => {
            warn!("invalid redis url: {err}");
            return None;
        }
    };

    let manager = match tokio::time::timeout(REMOTE_OP_TIMEOUT, client.get_connection_manager())
        .await
    {
        Ok(Ok(manager)) => manager,
        Ok(Err(err)) => {
            warn!("remote cache tier connect failed: {err}");
            return None;
        }
        Err(_) => {
            warn!("remote cache tier connect timed out");
            return None;
        }
    };

    let mut probe = manager.clone();
    match tokio::time::timeout(
        REMOTE_OP_TIMEOUT,
        redis::cmd("PING").query_async::<String>(&mut probe),
    )
    .await
    {
        Ok(Ok(_)) => Some(manager),
        Ok(Err(err)) => {
            warn!("remote cache tier ping failed: {err}");
            None
        }
        Err(_) => {
            warn!("remote cache tier ping timed out");
            None
        }
    }
}

async fn remote_get(
    mut manager: ConnectionManager,
    key: &str,
) -> Result<Option<StoredEntry>, CacheError> {
    let raw: Option<String> = tokio::time::timeout(REMOTE_OP_TIMEOUT, manager.get(key))
        .await
        .map_err(|_| CacheError::RemoteTimeout)??;

    match raw {
        None => Ok(None),
        Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
    }
}

async fn remote_set(
    mut manager: ConnectionManager,
    key: &str,
    entry: &StoredEntry,
    ttl: Duration,
) -> Result<(), CacheError> {
    let payload = serde_json::to_string(entry)?;
    let ttl_secs = ttl.as_secs().max(1);

    let _: () = tokio::time::timeout(REMOTE_OP_TIMEOUT, manager.set_ex(key, payload, ttl_secs))
        .await
        .map_err(|_| CacheError::RemoteTimeout)??;
    Ok(())
}

async fn remote_clear(
    mut manager: ConnectionManager,
    pattern: Option<&str>,
) -> Result<(), CacheError> {
    match pattern {
        Some(pattern) => {
            let keys: Vec<String> =
                tokio::time::timeout(REMOTE_OP_TIMEOUT, manager.keys(format!("*{pattern}*")))
                    .await
                    .map_err(|_| CacheError::RemoteTimeout)??;
            if !keys.is_empty() {
                let _: () = tokio::time::timeout(REMOTE_OP_TIMEOUT, manager.del(keys))
                    .await
                    .map_err(|_| CacheError::RemoteTimeout)??;
            }
        }
        None => {
            let _: () = tokio::time::timeout(
                REMOTE_OP_TIMEOUT,
                redis::cmd("FLUSHDB").query_async(&mut manager),
            )
            .await
            .map_err(|_| CacheError::RemoteTimeout)??;
        }
    }
    Ok(())
}
