//! Runtime configuration for the router monitor.
//!
//! Everything is loaded once from environment variables and is immutable
//! afterwards. Device credentials are mandatory; every tunable (timeouts,
//! cache TTLs, poll intervals, pool and retry settings) has a default that
//! matches a single NE8000-class device on a reasonably fast management
//! network.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Wire protocol used to reach the device CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Telnet,
}

impl Protocol {
    /// Default TCP port for the protocol.
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ssh => 22,
            Protocol::Telnet => 23,
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssh" => Ok(Protocol::Ssh),
            "telnet" => Ok(Protocol::Telnet),
            other => Err(format!("unknown protocol {other:?}, expected ssh or telnet")),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ssh => f.write_str("ssh"),
            Protocol::Telnet => f.write_str("telnet"),
        }
    }
}

/// Timeouts applied to one device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Opening the TCP/SSH connection.
    pub connect: Duration,
    /// Reading the output of a single command.
    pub command: Duration,
    /// Authenticating and reaching the first shell prompt.
    pub auth: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(8),
            command: Duration::from_secs(12),
            auth: Duration::from_secs(15),
        }
    }
}

/// Address and credentials of the monitored device.
#[derive(Clone)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub protocol: Protocol,
    pub timeouts: Timeouts,
}

impl DeviceEndpoint {
    /// `host:port` form used in log messages.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Connection pool sizing and lifetime limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on pooled idle sessions. One physical device only
    /// serves a few concurrent CLI sessions, so this stays small.
    pub max_sessions: usize,
    /// Idle time after which a pooled session is closed.
    pub idle_timeout: Duration,
    /// Absolute age after which a session is closed regardless of use.
    pub max_age: Duration,
    /// Interval of the background sweep that drops expired sessions.
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            idle_timeout: Duration::from_secs(300),
            max_age: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Retry and backoff policy for batch execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_millis(8000),
            backoff_multiplier: 2.0,
        }
    }
}

/// Cache TTL per data category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub interfaces: Duration,
    pub pppoe_stats: Duration,
    pub system_metrics: Duration,
    pub traffic_data: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            interfaces: Duration::from_secs(45),
            pppoe_stats: Duration::from_secs(20),
            system_metrics: Duration::from_secs(60),
            traffic_data: Duration::from_secs(30),
        }
    }
}

/// Background poll interval per data category, plus the loop tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub interfaces: Duration,
    pub pppoe_stats: Duration,
    pub system_metrics: Duration,
    pub traffic_data: Duration,
    /// Wake-up granularity of the poller loop. Shutdown latency and the
    /// precision of the per-category intervals are bounded by this.
    pub tick: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            interfaces: Duration::from_secs(30),
            pppoe_stats: Duration::from_secs(15),
            system_metrics: Duration::from_secs(45),
            traffic_data: Duration::from_secs(20),
            tick: Duration::from_secs(5),
        }
    }
}

/// Complete monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub endpoint: DeviceEndpoint,
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    pub ttls: CacheTtls,
    pub intervals: PollIntervals,
    /// Remote cache tier URL (`redis://...`). Absent means local-only.
    pub redis_url: Option<String>,
}

impl MonitorConfig {
    /// Loads the configuration from process environment variables.
    ///
    /// `ROUTER_HOST`, `ROUTER_USERNAME` and `ROUTER_PASSWORD` are required;
    /// everything else falls back to defaults. Present-but-invalid values
    /// are rejected rather than silently replaced.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = require(&get, "ROUTER_HOST")?;
        let username = require(&get, "ROUTER_USERNAME")?;
        let password = require(&get, "ROUTER_PASSWORD")?;
        let protocol: Protocol = parse_or(&get, "ROUTER_PROTOCOL", Protocol::Ssh)?;

        let port_var = match protocol {
            Protocol::Ssh => "ROUTER_SSH_PORT",
            Protocol::Telnet => "ROUTER_TELNET_PORT",
        };
        let port: u16 = parse_or(&get, port_var, protocol.default_port())?;

        let timeouts = Timeouts {
            connect: secs_or(&get, "ROUTER_CONNECT_TIMEOUT", Timeouts::default().connect)?,
            command: secs_or(&get, "ROUTER_COMMAND_TIMEOUT", Timeouts::default().command)?,
            auth: secs_or(&get, "ROUTER_AUTH_TIMEOUT", Timeouts::default().auth)?,
        };

        let pool_defaults = PoolConfig::default();
        let pool = PoolConfig {
            max_sessions: parse_or(&get, "POOL_MAX_SESSIONS", pool_defaults.max_sessions)?,
            idle_timeout: secs_or(&get, "POOL_IDLE_TIMEOUT", pool_defaults.idle_timeout)?,
            max_age: secs_or(&get, "POOL_MAX_AGE", pool_defaults.max_age)?,
            sweep_interval: pool_defaults.sweep_interval,
        };

        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
            base_delay: millis_or(&get, "RETRY_BASE_DELAY_MS", retry_defaults.base_delay)?,
            max_delay: millis_or(&get, "RETRY_MAX_DELAY_MS", retry_defaults.max_delay)?,
            backoff_multiplier: parse_or(
                &get,
                "RETRY_BACKOFF_MULTIPLIER",
                retry_defaults.backoff_multiplier,
            )?,
        };

        let ttl_defaults = CacheTtls::default();
        let ttls = CacheTtls {
            interfaces: secs_or(&get, "CACHE_TTL_INTERFACES", ttl_defaults.interfaces)?,
            pppoe_stats: secs_or(&get, "CACHE_TTL_PPPOE_STATS", ttl_defaults.pppoe_stats)?,
            system_metrics: secs_or(&get, "CACHE_TTL_SYSTEM_METRICS", ttl_defaults.system_metrics)?,
            traffic_data: secs_or(&get, "CACHE_TTL_TRAFFIC_DATA", ttl_defaults.traffic_data)?,
        };

        let interval_defaults = PollIntervals::default();
        let intervals = PollIntervals {
            interfaces: secs_or(&get, "BG_INTERVAL_INTERFACES", interval_defaults.interfaces)?,
            pppoe_stats: secs_or(&get, "BG_INTERVAL_PPPOE", interval_defaults.pppoe_stats)?,
            system_metrics: secs_or(&get, "BG_INTERVAL_SYSTEM", interval_defaults.system_metrics)?,
            traffic_data: secs_or(&get, "BG_INTERVAL_TRAFFIC", interval_defaults.traffic_data)?,
            tick: interval_defaults.tick,
        };

        Ok(Self {
            endpoint: DeviceEndpoint {
                host,
                port,
                username,
                password,
                protocol,
                timeouts,
            },
            pool,
            retry,
            ttls,
            intervals,
            redis_url: get("REDIS_URL").filter(|url| !url.trim().is_empty()),
        })
    }
}

fn require<F>(get: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(var)),
    }
}

fn parse_or<F, T>(get: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::InvalidVar {
            var,
            value: raw,
            reason: err.to_string(),
        }),
    }
}

fn secs_or<F>(get: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(Duration::from_secs(parse_or(get, var, default.as_secs())?))
}

fn millis_or<F>(get: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(Duration::from_millis(parse_or(
        get,
        var,
        default.as_millis() as u64,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_map(vars: &HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + '_ {
        move |var| vars.get(var).map(|v| (*v).to_string())
    }

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("ROUTER_HOST", "10.0.0.1"),
            ("ROUTER_USERNAME", "monitor"),
            ("ROUTER_PASSWORD", "secret"),
        ])
    }

    #[test]
    fn minimal_configuration_uses_defaults() {
        let vars = base_vars();
        let config = MonitorConfig::from_lookup(lookup_map(&vars)).expect("config");

        assert_eq!(config.endpoint.host, "10.0.0.1");
        assert_eq!(config.endpoint.port, 22);
        assert_eq!(config.endpoint.protocol, Protocol::Ssh);
        assert_eq!(config.pool.max_sessions, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.ttls.pppoe_stats, Duration::from_secs(20));
        assert_eq!(config.intervals.tick, Duration::from_secs(5));
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn missing_credentials_fail_fast() {
        let mut vars = base_vars();
        vars.remove("ROUTER_PASSWORD");

        let err = MonitorConfig::from_lookup(lookup_map(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("ROUTER_PASSWORD")));
    }

    #[test]
    fn telnet_protocol_switches_default_port() {
        let mut vars = base_vars();
        vars.insert("ROUTER_PROTOCOL", "telnet");

        let config = MonitorConfig::from_lookup(lookup_map(&vars)).expect("config");
        assert_eq!(config.endpoint.protocol, Protocol::Telnet);
        assert_eq!(config.endpoint.port, 23);
    }

    #[test]
    fn invalid_numeric_value_is_rejected() {
        let mut vars = base_vars();
        vars.insert("RETRY_MAX_ATTEMPTS", "many");

        let err = MonitorConfig::from_lookup(lookup_map(&vars)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar {
                var: "RETRY_MAX_ATTEMPTS",
                ..
            }
        ));
    }

    #[test]
    fn invalid_protocol_is_rejected() {
        let mut vars = base_vars();
        vars.insert("ROUTER_PROTOCOL", "serial");

        assert!(MonitorConfig::from_lookup(lookup_map(&vars)).is_err());
    }

    #[test]
    fn debug_output_redacts_password() {
        let vars = base_vars();
        let config = MonitorConfig::from_lookup(lookup_map(&vars)).expect("config");

        let rendered = format!("{:?}", config.endpoint);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
