//! Application context wiring the monitor together.
//!
//! A [`Monitor`] owns the cache, the connection pool, the command executor
//! and the background poller, constructed explicitly from one
//! [`MonitorConfig`] and passed by reference wherever they are needed.
//! There are no global singletons; an HTTP layer holds one `Monitor` and
//! calls the methods below.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde_json::Value;

use crate::cache::{CacheStats, TieredCache};
use crate::config::MonitorConfig;
use crate::error::{ConfigError, ExecutionError};
use crate::executor::{CommandExecutor, ProbeResult};
use crate::poller::{Poller, PollerStatus};
use crate::pool::ConnectionPool;

/// The assembled monitoring core for one router.
pub struct Monitor {
    config: MonitorConfig,
    cache: Arc<TieredCache>,
    pool: Arc<ConnectionPool>,
    executor: Arc<CommandExecutor>,
    poller: Poller,
}

impl Monitor {
    /// Wires up cache, pool, executor and poller from the configuration.
    ///
    /// Probes the remote cache tier when one is configured; a dead remote
    /// tier degrades to local-only caching. No device connection is opened
    /// until the first command or poll.
    pub async fn connect(config: MonitorConfig) -> Self {
        let cache = Arc::new(TieredCache::connect(config.redis_url.clone()).await);
        let pool = ConnectionPool::new(config.endpoint.clone(), config.pool);
        let executor = Arc::new(CommandExecutor::new(
            pool.clone(),
            config.retry,
            config.endpoint.timeouts.command,
        ));
        let poller = Poller::new(
            executor.clone(),
            cache.clone(),
            config.intervals,
            config.ttls,
        );

        info!(
            "monitor assembled for {} over {}",
            config.endpoint.addr(),
            config.endpoint.protocol
        );

        Self {
            config,
            cache,
            pool,
            executor,
            poller,
        }
    }

    /// Loads the configuration from the environment and assembles the
    /// monitor. Fails fast when device credentials are missing.
    pub async fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::connect(MonitorConfig::from_env()?).await)
    }

    /// Starts the background poller.
    pub async fn start(&self) {
        self.poller.start().await;
    }

    /// Stops the poller and closes every pooled device session.
    pub async fn shutdown(&self) {
        self.poller.stop().await;
        self.pool.shutdown().await;
        info!("monitor shut down");
    }

    /// Runs a command batch on the device. Used by on-demand handlers;
    /// surfaces the executor's error when all retries are exhausted.
    pub async fn execute_commands(&self, commands: &[String]) -> Result<Vec<String>, ExecutionError> {
        self.executor.execute(commands).await
    }

    /// One-command connectivity test with latency measurement.
    pub async fn probe_device(&self) -> ProbeResult {
        self.executor.probe().await
    }

    /// Reads a cached value. Expired entries read as absent.
    pub async fn cached(&self, key: &str) -> Option<Value> {
        self.cache.get(key).await
    }

    /// Writes a value through both cache tiers.
    pub async fn set_cached(&self, key: &str, value: Value, ttl: Duration) {
        self.cache.set(key, value, ttl).await;
    }

    /// Clears cached entries; a pattern restricts the clear to keys
    /// containing it.
    pub async fn clear_cached(&self, pattern: Option<&str>) {
        self.cache.clear(pattern).await;
    }

    /// Snapshot of the poller state for status endpoints.
    pub async fn poller_status(&self) -> PollerStatus {
        self.poller.status().await
    }

    /// Snapshot of cache hit/miss counters and tier state.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Re-probes the remote cache tier after an outage.
    pub async fn reconnect_cache(&self) -> bool {
        self.cache.reconnect_remote().await
    }

    /// Swaps the device endpoint at runtime. Sessions opened with the old
    /// credentials are discarded as the pool encounters them.
    pub async fn update_endpoint(&self, endpoint: crate::config::DeviceEndpoint) {
        self.pool.set_endpoint(endpoint).await;
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::{DeviceEndpoint, Protocol, Timeouts};

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            endpoint: DeviceEndpoint {
                host: "127.0.0.1".to_string(),
                port: 9,
                username: "monitor".to_string(),
                password: "secret".to_string(),
                protocol: Protocol::Telnet,
                timeouts: Timeouts::default(),
            },
            pool: Default::default(),
            retry: Default::default(),
            ttls: Default::default(),
            intervals: Default::default(),
            redis_url: None,
        }
    }

    #[tokio::test]
    async fn cache_surface_round_trips() {
        let monitor = Monitor::connect(test_config()).await;

        monitor
            .set_cached("interfaces", json!([{"name": "Gi0/1/0"}]), Duration::from_secs(30))
            .await;
        assert!(monitor.cached("interfaces").await.is_some());

        monitor.clear_cached(Some("interfaces")).await;
        assert!(monitor.cached("interfaces").await.is_none());
    }

    #[tokio::test]
    async fn stats_and_status_are_queryable_before_start() {
        let monitor = Monitor::connect(test_config()).await;

        let stats = monitor.cache_stats().await;
        assert_eq!(stats.total_requests, 0);
        assert!(!stats.remote_available);

        let status = monitor.poller_status().await;
        assert!(!status.running);
        assert_eq!(status.collections, 0);
    }

    #[tokio::test]
    async fn rejected_commands_surface_to_the_caller() {
        let monitor = Monitor::connect(test_config()).await;

        let err = monitor
            .execute_commands(&["undo interface GigabitEthernet0/1/0".to_string()])
            .await
            .expect_err("non-display command must be rejected");
        assert!(matches!(err, ExecutionError::Rejected(_)));
    }
}
