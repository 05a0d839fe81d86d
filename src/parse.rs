//! Heuristic parsers for NE8000 display output.
//!
//! All parsers are pure functions: raw text in, typed records out, no
//! I/O, no failures. Input that cannot be understood (empty text, an
//! `Error:`-tagged payload from a legacy upstream, an unexpected format)
//! degrades to empty or zeroed records so a parsing problem can never
//! stall the collection pipeline.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One row of `display interface brief`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceRecord {
    pub name: String,
    pub status: String,
    pub protocol: String,
    pub ip_address: String,
    pub description: String,
    pub utilization_in: f64,
    pub utilization_out: f64,
}

/// PPPoE subscriber counters from `display access-user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PppoeStats {
    pub total: u64,
    pub active: u64,
    pub peak: u64,
    pub authenticated: u64,
    pub last_update: DateTime<Utc>,
}

impl PppoeStats {
    /// Zeroed placeholder written when the device is unreachable.
    pub fn fallback() -> Self {
        Self {
            total: 0,
            active: 0,
            peak: 0,
            authenticated: 0,
            last_update: Utc::now(),
        }
    }
}

/// Chassis-level health from `display cpu-usage` / `memory-usage` /
/// `device` / `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub uptime: String,
    pub version: String,
    pub model: String,
    pub temperature_celsius: f64,
    pub last_update: DateTime<Utc>,
}

impl SystemMetrics {
    pub fn fallback() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            uptime: "Unknown".to_string(),
            version: "Unknown".to_string(),
            model: "NE8000".to_string(),
            temperature_celsius: 0.0,
            last_update: Utc::now(),
        }
    }
}

/// Aggregate traffic picture across interfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub inbound_mbps: f64,
    pub outbound_mbps: f64,
    pub total_mbps: f64,
    pub peak_in_mbps: f64,
    pub peak_out_mbps: f64,
    pub last_update: DateTime<Utc>,
}

impl TrafficStats {
    pub fn fallback() -> Self {
        Self {
            inbound_mbps: 0.0,
            outbound_mbps: 0.0,
            total_mbps: 0.0,
            peak_in_mbps: 0.0,
            peak_out_mbps: 0.0,
            last_update: Utc::now(),
        }
    }
}

fn unusable(output: &str) -> bool {
    let trimmed = output.trim();
    trimmed.is_empty() || trimmed.starts_with("Error:")
}

/// First whitespace-separated token that is all digits.
fn first_integer(line: &str) -> Option<u64> {
    line.split_whitespace()
        .find(|token| !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|token| token.parse().ok())
}

/// First `NN%` token on the line.
fn first_percent(line: &str) -> Option<f64> {
    line.split_whitespace().find_map(|token| {
        token
            .strip_suffix('%')
            .and_then(|raw| raw.trim_end_matches('.').parse::<f64>().ok())
    })
}

/// Numeric value of a `tag:`-style token: either inline (`in:42%`) or in
/// the following token (`in: 42%`).
fn tagged_number(parts: &[&str], index: usize, tag: &str) -> Option<f64> {
    let token = parts.get(index)?;
    let lower = token.to_ascii_lowercase();
    if !lower.starts_with(tag) {
        return None;
    }

    let inline = &token[tag.len()..];
    let raw = if inline.is_empty() {
        parts.get(index + 1)?
    } else {
        inline
    };
    parse_rate(raw)
}

fn parse_rate(token: &str) -> Option<f64> {
    token
        .trim_end_matches("Mbps")
        .trim_end_matches("mbps")
        .trim_end_matches('%')
        .parse()
        .ok()
}

/// Parses `display interface brief` output into interface records.
///
/// Header and separator lines are skipped; remaining rows are mapped
/// positionally: name, status, protocol, then an optional address and a
/// free-form description.
pub fn parse_interfaces(output: &str) -> Vec<InterfaceRecord> {
    let mut interfaces = Vec::new();
    if unusable(output) {
        return interfaces;
    }

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains("Interface") || line.contains("-----") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        // Legend lines (`*down: administratively down`) read like rows but
        // carry a colon-terminated first token.
        if parts.len() < 3 || parts[0].ends_with(':') {
            continue;
        }

        interfaces.push(InterfaceRecord {
            name: parts[0].to_string(),
            status: parts[1].to_string(),
            protocol: parts[2].to_string(),
            ip_address: parts.get(3).copied().unwrap_or_default().to_string(),
            description: if parts.len() > 4 {
                parts[4..].join(" ")
            } else {
                String::new()
            },
            utilization_in: 0.0,
            utilization_out: 0.0,
        });
    }

    interfaces
}

/// Folds `in:`/`out:` utilization figures into already-parsed interfaces,
/// matching rows by interface name.
pub fn apply_utilization(interfaces: &mut [InterfaceRecord], output: &str) {
    if unusable(output) {
        return;
    }

    for line in output.lines() {
        let lower = line.to_ascii_lowercase();
        if !lower.contains("in:") && !lower.contains("out:") {
            continue;
        }

        for interface in interfaces.iter_mut() {
            if !line.contains(&interface.name) {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            for index in 0..parts.len() {
                if let Some(value) = tagged_number(&parts, index, "in:") {
                    interface.utilization_in = value;
                }
                if let Some(value) = tagged_number(&parts, index, "out:") {
                    interface.utilization_out = value;
                }
            }
        }
    }
}

/// Extracts subscriber counters from the `display access-user` outputs.
pub fn parse_pppoe_stats(results: &[String]) -> PppoeStats {
    let mut stats = PppoeStats::fallback();

    for result in results {
        if unusable(result) {
            continue;
        }

        for line in result.lines() {
            let line = line.trim().to_ascii_lowercase();

            if line.contains("total") && line.contains("user") {
                if let Some(n) = first_integer(&line) {
                    stats.total = n;
                }
            } else if line.contains("active") {
                if let Some(n) = first_integer(&line) {
                    stats.active = n;
                }
            } else if line.contains("peak") {
                if let Some(n) = first_integer(&line) {
                    stats.peak = n;
                }
            } else if line.contains("auth") {
                if let Some(n) = first_integer(&line) {
                    stats.authenticated = n;
                }
            }
        }
    }

    stats
}

/// Extracts chassis health from the system command batch. Results are
/// positional: cpu-usage, memory-usage, device, version.
pub fn parse_system_metrics(results: &[String]) -> SystemMetrics {
    let mut metrics = SystemMetrics::fallback();

    for (index, result) in results.iter().enumerate() {
        if unusable(result) {
            continue;
        }

        match index {
            0 => {
                for line in result.lines() {
                    let lower = line.to_ascii_lowercase();
                    if lower.contains("cpu") && line.contains('%') {
                        if let Some(value) = first_percent(line) {
                            metrics.cpu_percent = value;
                            break;
                        }
                    }
                }
            }
            1 => {
                for line in result.lines() {
                    let lower = line.to_ascii_lowercase();
                    if lower.contains("memory") && line.contains('%') {
                        if let Some(value) = first_percent(line) {
                            metrics.memory_percent = value;
                            break;
                        }
                    }
                }
            }
            2 => {
                for line in result.lines() {
                    let lower = line.to_ascii_lowercase();
                    if let Some(position) = lower.find("temperature") {
                        let tail = &line[position + "temperature".len()..];
                        if let Some(value) = first_integer(tail).map(|n| n as f64) {
                            metrics.temperature_celsius = value;
                        }
                    }
                    if let Some(token) = line
                        .split_whitespace()
                        .find(|token| token.starts_with("NE8000"))
                    {
                        metrics.model = token.to_string();
                    }
                }
            }
            3 => {
                for line in result.lines() {
                    if let Some(position) = line.find("uptime is ") {
                        metrics.uptime = line[position + "uptime is ".len()..].trim().to_string();
                    }
                    if let Some(position) = line.find("Version ") {
                        if line.contains("VRP") || metrics.version == "Unknown" {
                            metrics.version =
                                line[position + "Version ".len()..].trim().to_string();
                        }
                    }
                }
            }
            _ => {}
        }
    }

    metrics
}

/// Averages per-interface `in:`/`out:` rates into one traffic summary;
/// peaks keep the highest single-interface figure seen.
pub fn parse_traffic(results: &[String]) -> TrafficStats {
    let mut stats = TrafficStats::fallback();

    let mut total_in = 0.0;
    let mut total_out = 0.0;
    let mut sampled = 0u32;

    for result in results {
        if unusable(result) {
            continue;
        }

        for line in result.lines() {
            let lower = line.to_ascii_lowercase();
            if !lower.contains("in:") || !lower.contains("out:") {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            let mut line_in = None;
            let mut line_out = None;
            for index in 0..parts.len() {
                if let Some(value) = tagged_number(&parts, index, "in:") {
                    line_in = Some(value);
                }
                if let Some(value) = tagged_number(&parts, index, "out:") {
                    line_out = Some(value);
                }
            }

            if let (Some(rate_in), Some(rate_out)) = (line_in, line_out) {
                total_in += rate_in;
                total_out += rate_out;
                sampled += 1;
                stats.peak_in_mbps = stats.peak_in_mbps.max(rate_in);
                stats.peak_out_mbps = stats.peak_out_mbps.max(rate_out);
            }
        }
    }

    if sampled > 0 {
        stats.inbound_mbps = total_in / f64::from(sampled);
        stats.outbound_mbps = total_out / f64::from(sampled);
        stats.total_mbps = stats.inbound_mbps + stats.outbound_mbps;
    }

    stats
}
