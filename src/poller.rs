//! Background poller keeping the cache warm per data category.
//!
//! Each category (`interfaces`, `pppoe_stats`, `system_metrics`,
//! `traffic_data`) polls on its own interval; the loop wakes on a short
//! tick, triggers every category whose interval has elapsed, and runs the
//! due collections concurrently. One category failing logs and bumps an
//! error counter without disturbing the loop or its siblings. When the
//! device is unreachable the poller writes zeroed placeholder records with
//! a short TTL so dashboards render immediately and a retry lands soon.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::cache::TieredCache;
use crate::commands::Category;
use crate::config::{CacheTtls, PollIntervals};
use crate::executor::CommandExecutor;
use crate::parse;

/// TTL for placeholder records written while the device is unreachable.
/// Short on purpose: the next collection attempt should replace them.
pub const FALLBACK_TTL: Duration = Duration::from_secs(60);

/// Queryable snapshot of the poller state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerStatus {
    pub running: bool,
    pub last_updates: BTreeMap<String, DateTime<Utc>>,
    pub collections: u64,
    pub errors: u64,
    pub uptime_seconds: Option<u64>,
}

#[derive(Error, Debug)]
enum CollectError {
    #[error(transparent)]
    Execute(#[from] crate::error::ExecutionError),

    #[error("failed to encode records: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Default)]
struct Shared {
    running: AtomicBool,
    collections: AtomicU64,
    errors: AtomicU64,
    started_at: Mutex<Option<DateTime<Utc>>>,
    last_updates: Mutex<BTreeMap<Category, DateTime<Utc>>>,
}

/// Long-lived collection task plus the handle to control it.
pub struct Poller {
    worker: Arc<Worker>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// State owned by the collection loop.
struct Worker {
    executor: Arc<CommandExecutor>,
    cache: Arc<TieredCache>,
    intervals: PollIntervals,
    ttls: CacheTtls,
    shared: Shared,
}

impl Poller {
    pub fn new(
        executor: Arc<CommandExecutor>,
        cache: Arc<TieredCache>,
        intervals: PollIntervals,
        ttls: CacheTtls,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            worker: Arc::new(Worker {
                executor,
                cache,
                intervals,
                ttls,
                shared: Shared::default(),
            }),
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Spawns the collection loop. Calling start on a running poller is a
    /// no-op beyond a warning.
    pub async fn start(&self) {
        if self.worker.shared.running.swap(true, Ordering::SeqCst) {
            warn!("poller is already running");
            return;
        }

        *self.worker.shared.started_at.lock().await = Some(Utc::now());

        let worker = self.worker.clone();
        let shutdown_rx = self.shutdown.subscribe();
        let task = tokio::spawn(run_loop(worker, shutdown_rx));
        *self.handle.lock().await = Some(task);

        info!("background poller started");
    }

    /// Signals the loop to stop and waits for it to wind down. The loop
    /// reacts within one tick.
    pub async fn stop(&self) {
        if !self.worker.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(true);

        if let Some(task) = self.handle.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("poller loop did not stop within 5s");
            }
        }

        info!("background poller stopped");
    }

    /// Snapshot of the poller state. Never blocks the collection loop
    /// beyond the shared map locks.
    pub async fn status(&self) -> PollerStatus {
        self.worker.status().await
    }
}

async fn run_loop(worker: Arc<Worker>, mut shutdown: watch::Receiver<bool>) {
    info!("poller loop starting");

    worker.initial_collection().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(worker.intervals.tick) => {
                let due = worker.due_categories().await;
                if due.is_empty() {
                    continue;
                }

                let tasks: Vec<JoinHandle<()>> = due
                    .into_iter()
                    .map(|category| {
                        let worker = worker.clone();
                        tokio::spawn(async move { worker.collect(category, false).await })
                    })
                    .collect();
                // Awaiting the whole round keeps each category serialized
                // against itself; distinct categories still overlap.
                for task in tasks {
                    let _ = task.await;
                }
            }
        }
    }

    info!("poller loop stopped");
}

impl Worker {
    /// Best-effort warm pass across all categories before the steady
    /// loop. Failures leave placeholder records behind.
    async fn initial_collection(self: &Arc<Self>) {
        info!("initial collection pass starting");

        let now = Utc::now();
        {
            let mut last_updates = self.shared.last_updates.lock().await;
            for category in Category::ALL {
                last_updates.insert(category, now);
            }
        }

        let tasks: Vec<JoinHandle<()>> = Category::ALL
            .into_iter()
            .map(|category| {
                let worker = self.clone();
                tokio::spawn(async move { worker.collect(category, true).await })
            })
            .collect();
        for task in tasks {
            let _ = task.await;
        }

        info!("initial collection pass finished");
    }

    /// Categories whose interval has elapsed, with their trigger time
    /// recorded up front.
    async fn due_categories(&self) -> Vec<Category> {
        let now = Utc::now();
        let mut due = Vec::new();

        let mut last_updates = self.shared.last_updates.lock().await;
        for category in Category::ALL {
            let interval = category.interval(&self.intervals);
            let elapsed = last_updates
                .get(&category)
                .map(|last| now.signed_duration_since(*last));

            let is_due = match elapsed {
                Some(elapsed) => elapsed >= chrono::Duration::from_std(interval)
                    .unwrap_or(chrono::Duration::zero()),
                None => true,
            };

            if is_due {
                last_updates.insert(category, now);
                due.push(category);
            }
        }

        due
    }

    async fn collect(&self, category: Category, fallback_on_error: bool) {
        debug!("collecting {category}");

        match self.collect_category(category).await {
            Ok(()) => {
                self.shared.collections.fetch_add(1, Ordering::Relaxed);
                debug!("{category} collected");
            }
            Err(err) => {
                self.shared.errors.fetch_add(1, Ordering::Relaxed);
                error!("collection for {category} failed: {err}");

                if fallback_on_error {
                    self.write_fallback(category).await;
                }
            }
        }
    }

    async fn collect_category(&self, category: Category) -> Result<(), CollectError> {
        let commands: Vec<String> = category
            .commands()
            .iter()
            .map(|command| (*command).to_string())
            .collect();
        let outputs = self.executor.execute(&commands).await?;

        let value = match category {
            Category::Interfaces => {
                let mut interfaces =
                    parse::parse_interfaces(outputs.first().map(String::as_str).unwrap_or(""));
                if let Some(utilization) = outputs.get(1) {
                    parse::apply_utilization(&mut interfaces, utilization);
                }
                info!("interfaces updated: {} found", interfaces.len());
                serde_json::to_value(interfaces)?
            }
            Category::PppoeStats => {
                let stats = parse::parse_pppoe_stats(&outputs);
                info!("pppoe stats updated: {} active sessions", stats.active);
                serde_json::to_value(stats)?
            }
            Category::SystemMetrics => {
                let metrics = parse::parse_system_metrics(&outputs);
                info!(
                    "system metrics updated: cpu {}%, memory {}%",
                    metrics.cpu_percent, metrics.memory_percent
                );
                serde_json::to_value(metrics)?
            }
            Category::TrafficData => {
                let traffic = parse::parse_traffic(&outputs);
                info!("traffic updated: {} Mbps total", traffic.total_mbps);
                serde_json::to_value(traffic)?
            }
        };

        self.cache
            .set(category.cache_key(), value, category.ttl(&self.ttls))
            .await;
        Ok(())
    }

    /// Writes a zeroed placeholder so the category key is present even
    /// while the device is unreachable.
    async fn write_fallback(&self, category: Category) {
        let value = match category {
            Category::Interfaces => json!([]),
            Category::PppoeStats => encode_or_null(&parse::PppoeStats::fallback()),
            Category::SystemMetrics => encode_or_null(&parse::SystemMetrics::fallback()),
            Category::TrafficData => encode_or_null(&parse::TrafficStats::fallback()),
        };

        warn!("writing fallback record for {category}");
        self.cache
            .set(category.cache_key(), value, FALLBACK_TTL)
            .await;
    }

    async fn status(&self) -> PollerStatus {
        let started_at = *self.shared.started_at.lock().await;
        let running = self.shared.running.load(Ordering::SeqCst);

        let last_updates = self
            .shared
            .last_updates
            .lock()
            .await
            .iter()
            .map(|(category, at)| (category.cache_key().to_string(), *at))
            .collect();

        PollerStatus {
            running,
            last_updates,
            collections: self.shared.collections.load(Ordering::Relaxed),
            errors: self.shared.errors.load(Ordering::Relaxed),
            uptime_seconds: started_at.filter(|_| running).map(|at| {
                Utc::now()
                    .signed_duration_since(at)
                    .num_seconds()
                    .max(0) as u64
            }),
        }
    }

}

fn encode_or_null<T: Serialize>(records: &T) -> Value {
    match serde_json::to_value(records) {
        Ok(value) => value,
        Err(err) => {
            error!("failed to encode fallback record: {err}");
            Value::Null
        }
    }
}
