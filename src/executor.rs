//! Batch command execution with retry, backoff and a wall-clock budget.
//!
//! The executor is the single entry point for running commands on the
//! device, and the only component that surfaces errors to its callers.
//! Batches are all-or-nothing: a transport failure mid-batch aborts the
//! remaining commands, and the retry wrapper re-runs the whole batch from
//! the first command.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::commands::{is_permitted, optimize_commands};
use crate::config::RetryConfig;
use crate::error::ExecutionError;
use crate::pool::{ConnectionPool, PooledSession};
use crate::transport::clean_output;

/// Result of a connectivity probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Executes command batches against the pooled device connection.
pub struct CommandExecutor {
    pool: Arc<ConnectionPool>,
    retry: RetryConfig,
    command_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(pool: Arc<ConnectionPool>, retry: RetryConfig, command_timeout: Duration) -> Self {
        Self {
            pool,
            retry,
            command_timeout,
        }
    }

    /// Runs a batch of commands sequentially on one pooled session and
    /// returns the cleaned output of each command, index-aligned with the
    /// input.
    ///
    /// Commands outside the permitted-prefix allowlist are rejected before
    /// any connection work. Each attempt runs under a wall-clock budget;
    /// a budget overrun discards the in-flight session and counts as a
    /// failed attempt.
    pub async fn execute(&self, commands: &[String]) -> Result<Vec<String>, ExecutionError> {
        for command in commands {
            if !command.trim().is_empty() && !is_permitted(command) {
                return Err(ExecutionError::Rejected(command.trim().to_string()));
            }
        }

        let batch = optimize_commands(commands);
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let budget = self.batch_budget(batch.len());
        retry(&self.retry, "command batch", || {
            self.attempt(&batch, budget)
        })
        .await
    }

    /// One-command connectivity test. Never fails; failures are folded
    /// into the result so status endpoints can render them.
    pub async fn probe(&self) -> ProbeResult {
        let started = Instant::now();
        let outcome = self.execute(&["display version".to_string()]).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(_) => ProbeResult {
                success: true,
                latency_ms,
                error: None,
                timestamp: Utc::now(),
            },
            Err(err) => ProbeResult {
                success: false,
                latency_ms,
                error: Some(err.to_string()),
                timestamp: Utc::now(),
            },
        }
    }

    /// Wall-clock budget for one batch attempt: the per-command timeout
    /// times the batch length, with a floor of two command timeouts.
    fn batch_budget(&self, batch_len: usize) -> Duration {
        self.command_timeout * (batch_len as u32).max(2)
    }

    async fn attempt(
        &self,
        batch: &[String],
        budget: Duration,
    ) -> Result<Vec<String>, ExecutionError> {
        let mut session = self.pool.acquire().await?;

        match tokio::time::timeout(budget, self.run_batch(&mut session, batch)).await {
            Ok(Ok(outputs)) => {
                self.pool.release(session).await;
                Ok(outputs)
            }
            Ok(Err(err)) => {
                self.pool.discard(session).await;
                Err(err)
            }
            Err(_) => {
                warn!("batch of {} command(s) exceeded its {budget:?} budget", batch.len());
                self.pool.discard(session).await;
                Err(ExecutionError::BatchTimeout(budget))
            }
        }
    }

    async fn run_batch(
        &self,
        pooled: &mut PooledSession,
        batch: &[String],
    ) -> Result<Vec<String>, ExecutionError> {
        let mut outputs = Vec::with_capacity(batch.len());

        for command in batch {
            debug!("executing {command:?}");
            let raw = pooled.session.send(command, self.command_timeout).await?;
            outputs.push(clean_output(&raw, command));
        }

        Ok(outputs)
    }
}

/// Delay before the retry following `attempt` (zero-based), capped at the
/// configured maximum.
pub(crate) fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let factor = config.backoff_multiplier.max(1.0).powi(attempt as i32);
    config.base_delay.mul_f64(factor).min(config.max_delay)
}

/// Runs `op` up to `config.max_attempts` times with exponential backoff,
/// re-raising the last failure once attempts are exhausted. Backoff sleeps
/// happen with no locks or sessions held.
async fn retry<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
) -> Result<T, ExecutionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExecutionError>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => {
                error!("{label} failed after {attempt} attempt(s): {err}");
                return Err(err);
            }
            Err(err) => {
                let delay = backoff_delay(attempt - 1, config);
                warn!(
                    "{label} failed (attempt {attempt}/{attempts}): {err}; retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_delays_are_non_decreasing_and_capped() {
        let config = RetryConfig::default();
        let delays: Vec<Duration> = (0..8).map(|i| backoff_delay(i, &config)).collect();

        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1], "delays must not decrease: {delays:?}");
        }
        assert_eq!(delays[0], Duration::from_millis(1500));
        assert_eq!(delays[1], Duration::from_millis(3000));
        assert_eq!(delays[2], Duration::from_millis(6000));
        assert!(delays.iter().all(|d| *d <= config.max_delay));
    }

    #[tokio::test]
    async fn retry_makes_exactly_configured_attempts() {
        let config = fast_retry(3);
        let calls = AtomicU32::new(0);

        let result: Result<(), ExecutionError> = retry(&config, "test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExecutionError::BatchTimeout(Duration::from_secs(1))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_on_first_success() {
        let config = fast_retry(3);
        let calls = AtomicU32::new(0);

        let result: Result<u32, ExecutionError> = retry(&config, "test op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(ExecutionError::BatchTimeout(Duration::from_secs(1)))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.expect("second attempt succeeds"), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_attempt_config_still_runs_once() {
        let config = fast_retry(0);
        let calls = AtomicU32::new(0);

        let result: Result<(), ExecutionError> = retry(&config, "test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExecutionError::BatchTimeout(Duration::from_secs(1))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_commands_never_reach_the_pool() {
        let endpoint = crate::config::DeviceEndpoint {
            host: "127.0.0.1".to_string(),
            port: 9,
            username: "monitor".to_string(),
            password: "secret".to_string(),
            protocol: crate::config::Protocol::Telnet,
            timeouts: Default::default(),
        };
        let pool = ConnectionPool::new(endpoint, Default::default());
        let executor = CommandExecutor::new(pool, fast_retry(1), Duration::from_secs(1));

        let err = executor
            .execute(&["reboot".to_string()])
            .await
            .expect_err("must be rejected");
        assert!(matches!(err, ExecutionError::Rejected(cmd) if cmd == "reboot"));
    }
}
