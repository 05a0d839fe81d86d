//! Pooled device sessions with exclusive checkout.
//!
//! The pool owns idle [`TransportSession`]s and hands them out one caller
//! at a time: `acquire` transfers ownership of the session to the caller,
//! and only `release` can put it back, so two callers can never drive the
//! same CLI session concurrently. Sessions expire by idle time and by
//! absolute age; a periodic sweep closes expired sessions so the pool
//! self-heals without waiting for demand.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock, watch};

use crate::config::{DeviceEndpoint, PoolConfig, Protocol};
use crate::error::ConnectError;
use crate::transport::TransportSession;

/// SHA-256 fingerprint of the endpoint credentials.
///
/// Pooled sessions carry the fingerprint they were opened with instead of
/// plaintext credentials; after a credential swap, stale sessions fail the
/// comparison and are discarded instead of reusing an old login.
pub(crate) fn credential_fingerprint(endpoint: &DeviceEndpoint) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.username.as_bytes());
    hasher.update([0u8]);
    hasher.update(endpoint.password.as_bytes());
    hasher.finalize().into()
}

/// Bookkeeping attached to one pooled session.
#[derive(Debug, Clone, Copy)]
pub struct SessionMeta {
    created_at: Instant,
    last_used: Instant,
    usage_count: u64,
    healthy: bool,
    fingerprint: [u8; 32],
}

impl SessionMeta {
    fn new(fingerprint: [u8; 32]) -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_used: now,
            usage_count: 0,
            healthy: true,
            fingerprint,
        }
    }

    /// Expired sessions are never handed out again: idle beyond the idle
    /// timeout, or alive beyond the absolute age limit.
    pub fn is_expired(&self, config: &PoolConfig) -> bool {
        self.last_used.elapsed() > config.idle_timeout
            || self.created_at.elapsed() > config.max_age
    }

    fn mark_used(&mut self) {
        self.last_used = Instant::now();
        self.usage_count += 1;
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }
}

/// One checked-out device session.
pub struct PooledSession {
    pub(crate) session: TransportSession,
    meta: SessionMeta,
}

impl PooledSession {
    pub fn protocol(&self) -> Protocol {
        self.session.protocol()
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// Marks the session as unusable; `release` will close it instead of
    /// repooling it.
    pub fn mark_unhealthy(&mut self) {
        self.meta.healthy = false;
    }

    fn is_reusable(&self, config: &PoolConfig, fingerprint: &[u8; 32]) -> bool {
        self.meta.healthy
            && !self.meta.is_expired(config)
            && self.session.is_open()
            && &self.meta.fingerprint == fingerprint
    }
}

/// Pool of idle sessions for one device endpoint.
pub struct ConnectionPool {
    endpoint: RwLock<Arc<DeviceEndpoint>>,
    config: PoolConfig,
    idle: Mutex<VecDeque<PooledSession>>,
    shutdown: watch::Sender<bool>,
}

impl ConnectionPool {
    /// Creates the pool and spawns its background sweep task.
    pub fn new(endpoint: DeviceEndpoint, config: PoolConfig) -> Arc<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let pool = Arc::new(Self {
            endpoint: RwLock::new(Arc::new(endpoint)),
            config,
            idle: Mutex::new(VecDeque::new()),
            shutdown,
        });

        tokio::spawn(sweep_loop(
            Arc::downgrade(&pool),
            shutdown_rx,
            config.sweep_interval,
        ));

        pool
    }

    /// Checks out one session for exclusive use.
    ///
    /// Pops one idle session under the pool mutex; an expired, unhealthy
    /// or credential-stale candidate is closed and treated as a miss, and
    /// a miss opens a fresh session through the transport layer. No I/O
    /// happens while the mutex is held.
    pub async fn acquire(&self) -> Result<PooledSession, ConnectError> {
        let endpoint = self.endpoint.read().await.clone();
        let fingerprint = credential_fingerprint(&endpoint);

        let candidate = { self.idle.lock().await.pop_front() };
        if let Some(mut pooled) = candidate {
            if pooled.is_reusable(&self.config, &fingerprint) {
                pooled.meta.mark_used();
                debug!(
                    "reusing pooled {} session (use #{})",
                    pooled.protocol(),
                    pooled.meta.usage_count
                );
                return Ok(pooled);
            }
            debug!("closing stale pooled {} session", pooled.protocol());
            pooled.session.close().await;
        }

        debug!("pool miss, opening new {} session", endpoint.protocol);
        let session = TransportSession::connect(&endpoint).await?;
        let mut pooled = PooledSession {
            session,
            meta: SessionMeta::new(fingerprint),
        };
        pooled.meta.mark_used();
        Ok(pooled)
    }

    /// Returns a session to the pool after a healthy use.
    ///
    /// Unhealthy, expired or closed sessions are closed instead; when the
    /// pool is already at capacity the extra session is closed rather than
    /// blocking the caller.
    pub async fn release(&self, mut pooled: PooledSession) {
        let endpoint = self.endpoint.read().await.clone();
        let fingerprint = credential_fingerprint(&endpoint);

        if !pooled.is_reusable(&self.config, &fingerprint) {
            debug!("dropping returned {} session", pooled.protocol());
            pooled.session.close().await;
            return;
        }

        let overflow = {
            let mut idle = self.idle.lock().await;
            if idle.len() < self.config.max_sessions {
                idle.push_back(pooled);
                None
            } else {
                Some(pooled)
            }
        };

        if let Some(mut extra) = overflow {
            debug!("pool full, closing extra {} session", extra.protocol());
            extra.session.close().await;
        }
    }

    /// Closes a session that failed while in use. It is never repooled.
    pub async fn discard(&self, mut pooled: PooledSession) {
        pooled.meta.healthy = false;
        pooled.session.close().await;
    }

    /// Swaps the device endpoint. Sessions opened with the previous
    /// credentials are dropped lazily on acquire or by the sweep.
    pub async fn set_endpoint(&self, endpoint: DeviceEndpoint) {
        *self.endpoint.write().await = Arc::new(endpoint);
    }

    /// Drops every idle session that is expired, unhealthy or stale.
    async fn sweep(&self) {
        let endpoint = self.endpoint.read().await.clone();
        let fingerprint = credential_fingerprint(&endpoint);

        let stale: Vec<PooledSession> = {
            let mut idle = self.idle.lock().await;
            let mut keep = VecDeque::with_capacity(idle.len());
            let mut dropped = Vec::new();

            while let Some(pooled) = idle.pop_front() {
                if pooled.is_reusable(&self.config, &fingerprint) {
                    keep.push_back(pooled);
                } else {
                    dropped.push(pooled);
                }
            }
            *idle = keep;
            dropped
        };

        if !stale.is_empty() {
            debug!("pool sweep closing {} stale session(s)", stale.len());
        }
        for mut pooled in stale {
            pooled.session.close().await;
        }
    }

    /// Stops the sweep task and closes every idle session.
    pub async fn shutdown(&self) {
        if self.shutdown.send(true).is_err() {
            warn!("pool sweep task already gone");
        }

        let drained: Vec<PooledSession> = { self.idle.lock().await.drain(..).collect() };
        for mut pooled in drained {
            pooled.session.close().await;
        }
        debug!("connection pool shut down");
    }

    /// Number of idle sessions currently pooled.
    pub async fn idle_len(&self) -> usize {
        self.idle.lock().await.len()
    }
}

async fn sweep_loop(
    pool: std::sync::Weak<ConnectionPool>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {
                match pool.upgrade() {
                    Some(pool) => pool.sweep().await,
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(created_ago: Duration, used_ago: Duration) -> SessionMeta {
        let now = Instant::now();
        SessionMeta {
            created_at: now.checked_sub(created_ago).expect("instant"),
            last_used: now.checked_sub(used_ago).expect("instant"),
            usage_count: 1,
            healthy: true,
            fingerprint: [0u8; 32],
        }
    }

    #[test]
    fn fresh_session_is_not_expired() {
        let config = PoolConfig::default();
        let meta = meta_with(Duration::ZERO, Duration::ZERO);
        assert!(!meta.is_expired(&config));
    }

    #[test]
    fn idle_timeout_expires_session() {
        let config = PoolConfig::default();
        let meta = meta_with(Duration::from_secs(400), Duration::from_secs(301));
        assert!(meta.is_expired(&config));
    }

    #[test]
    fn max_age_expires_session_even_when_recently_used() {
        let config = PoolConfig::default();
        let meta = meta_with(Duration::from_secs(1801), Duration::from_secs(1));
        assert!(meta.is_expired(&config));
    }

    #[test]
    fn mark_used_refreshes_idle_clock() {
        let config = PoolConfig::default();
        let mut meta = meta_with(Duration::from_secs(100), Duration::from_secs(301));
        assert!(meta.is_expired(&config));

        meta.mark_used();
        assert!(!meta.is_expired(&config));
        assert_eq!(meta.usage_count(), 2);
    }

    #[test]
    fn fingerprint_differs_per_credentials() {
        let endpoint = DeviceEndpoint {
            host: "10.0.0.1".to_string(),
            port: 22,
            username: "monitor".to_string(),
            password: "secret".to_string(),
            protocol: Protocol::Ssh,
            timeouts: Default::default(),
        };
        let mut rotated = endpoint.clone();
        rotated.password = "rotated".to_string();

        assert_ne!(
            credential_fingerprint(&endpoint),
            credential_fingerprint(&rotated)
        );
        assert_eq!(
            credential_fingerprint(&endpoint),
            credential_fingerprint(&endpoint.clone())
        );
    }
}
