//! Display-command catalog for the NE8000 data categories.
//!
//! Commands sent to the device all come from the fixed per-category lists
//! below or from callers going through the permitted-prefix allowlist.
//! Normalization appends the paging-disable suffix so that long output is
//! never truncated by an interactive `---- More ----` pause.

use std::fmt;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{CacheTtls, PollIntervals};

/// Suffix that disables output paging on display commands.
pub const PAGING_SUFFIX: &str = " | no-more";

/// Command prefixes accepted on the execution path. Everything else is
/// rejected before any transport work happens.
pub const PERMITTED_PREFIXES: &[&str] = &["display", "ping"];

/// One polled data domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Interfaces,
    PppoeStats,
    SystemMetrics,
    TrafficData,
}

impl Category {
    /// All categories, in collection order.
    pub const ALL: [Category; 4] = [
        Category::Interfaces,
        Category::PppoeStats,
        Category::SystemMetrics,
        Category::TrafficData,
    ];

    /// Key under which this category's records are cached.
    pub fn cache_key(self) -> &'static str {
        match self {
            Category::Interfaces => "interfaces",
            Category::PppoeStats => "pppoe_stats",
            Category::SystemMetrics => "system_metrics",
            Category::TrafficData => "traffic_data",
        }
    }

    /// Display commands collected for this category, in execution order.
    ///
    /// The order matters: parsers map results back by batch index.
    pub fn commands(self) -> &'static [&'static str] {
        match self {
            Category::Interfaces => &[
                "display interface brief",
                "display interface statistics",
            ],
            Category::PppoeStats => &[
                "display access-user online-total",
                "display access-user statistics",
            ],
            Category::SystemMetrics => &[
                "display cpu-usage",
                "display memory-usage",
                "display device",
                "display version",
            ],
            Category::TrafficData => &[
                "display interface brief | include utilization",
                "display traffic-policy statistics",
            ],
        }
    }

    /// Cache TTL configured for this category.
    pub fn ttl(self, ttls: &CacheTtls) -> Duration {
        match self {
            Category::Interfaces => ttls.interfaces,
            Category::PppoeStats => ttls.pppoe_stats,
            Category::SystemMetrics => ttls.system_metrics,
            Category::TrafficData => ttls.traffic_data,
        }
    }

    /// Background poll interval configured for this category.
    pub fn interval(self, intervals: &PollIntervals) -> Duration {
        match self {
            Category::Interfaces => intervals.interfaces,
            Category::PppoeStats => intervals.pppoe_stats,
            Category::SystemMetrics => intervals.system_metrics,
            Category::TrafficData => intervals.traffic_data,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cache_key())
    }
}

/// Returns true when the command matches one of the permitted prefixes.
///
/// A prefix only matches at a word boundary: `display interface` passes,
/// `displayfoo` does not.
pub fn is_permitted(command: &str) -> bool {
    let command = command.trim();
    PERMITTED_PREFIXES.iter().any(|prefix| {
        command.starts_with(prefix)
            && (command.len() == prefix.len() || command.as_bytes()[prefix.len()] == b' ')
    })
}

/// Normalizes a batch before execution: trims whitespace, drops empty
/// entries and appends the paging-disable suffix to display commands that
/// carry no pipe of their own. Already-normalized commands pass unchanged.
pub fn optimize_commands(commands: &[String]) -> Vec<String> {
    let mut optimized = Vec::with_capacity(commands.len());

    for command in commands {
        let command = command.trim();
        if command.is_empty() {
            continue;
        }

        if command.starts_with("display") && !command.contains('|') {
            optimized.push(format!("{command}{PAGING_SUFFIX}"));
        } else {
            optimized.push(command.to_string());
        }
    }

    optimized
}
