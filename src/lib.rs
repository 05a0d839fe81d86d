//! # nemon - NE8000 Router Polling and Caching Core
//!
//! `nemon` is the connection and caching core behind an NE8000 router
//! dashboard. It keeps a small pool of SSH or Telnet CLI sessions to one
//! device, executes batches of read-only `display` commands with retry and
//! backoff, parses the raw output into typed records, and keeps a tiered
//! (Redis + in-process) cache warm through a background poller so the
//! dashboard always has something to render.
//!
//! ## Features
//!
//! - **Connection Pooling**: Reuses authenticated CLI sessions with idle
//!   and age expiry, exclusive checkout and a self-healing sweep
//! - **Protocol Abstraction**: SSH (interactive pseudo-shell) and Telnet
//!   (literal login challenge) behind one transport interface
//! - **Retry with Backoff**: Whole-batch retries with capped exponential
//!   backoff and a wall-clock budget per attempt
//! - **Tiered Caching**: Remote-first reads with local fallback, TTL
//!   expiry and hit/miss statistics
//! - **Background Polling**: Per-category intervals, fallback placeholder
//!   data while the device is unreachable, prompt shutdown
//! - **Maximum Compatibility**: Keeps legacy SSH algorithms enabled for
//!   older VRP images
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nemon::app::Monitor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads ROUTER_HOST / ROUTER_USERNAME / ROUTER_PASSWORD and the
//!     // optional tunables from the environment.
//!     let monitor = Monitor::from_env().await?;
//!
//!     // Keep the cache warm in the background.
//!     monitor.start().await;
//!
//!     // On-demand execution for a dashboard handler.
//!     let outputs = monitor
//!         .execute_commands(&["display version".to_string()])
//!         .await?;
//!     println!("{}", outputs[0]);
//!
//!     // Cache-first reads for everything the poller collects.
//!     if let Some(interfaces) = monitor.cached("interfaces").await {
//!         println!("interfaces: {interfaces}");
//!     }
//!
//!     monitor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`app::Monitor`] - Application context wiring all components together
//! - [`executor::CommandExecutor`] - Batch execution with retry and budget
//! - [`pool::ConnectionPool`] - Pooled device sessions with expiry
//! - [`transport::TransportSession`] - SSH/Telnet session handling
//! - [`cache::TieredCache`] - Remote + local cache with TTL expiry
//! - [`poller::Poller`] - Background collection per data category
//! - [`parse`] - Heuristic parsers for `display` output
//! - [`config::MonitorConfig`] - Environment-driven configuration

pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod parse;
pub mod poller;
pub mod pool;
pub mod transport;
