//! Parser tests over captured NE8000 display output.

use nemon::parse::{
    apply_utilization, parse_interfaces, parse_pppoe_stats, parse_system_metrics, parse_traffic,
};

const INTERFACE_BRIEF: &str = include_str!("fixtures/interface_brief.txt");
const INTERFACE_UTILIZATION: &str = include_str!("fixtures/interface_utilization.txt");
const ACCESS_USER_ONLINE: &str = include_str!("fixtures/access_user_online.txt");
const ACCESS_USER_STATISTICS: &str = include_str!("fixtures/access_user_statistics.txt");
const CPU_USAGE: &str = include_str!("fixtures/cpu_usage.txt");
const MEMORY_USAGE: &str = include_str!("fixtures/memory_usage.txt");
const DEVICE_STATUS: &str = include_str!("fixtures/device_status.txt");
const VERSION: &str = include_str!("fixtures/version.txt");

#[test]
fn interface_brief_fixture_parses_rows_and_skips_the_legend() {
    let interfaces = parse_interfaces(INTERFACE_BRIEF);

    assert_eq!(interfaces.len(), 4);
    assert_eq!(interfaces[0].name, "GigabitEthernet0/1/0");
    assert_eq!(interfaces[0].status, "up");
    assert_eq!(interfaces[0].ip_address, "100.64.0.1");
    assert_eq!(interfaces[0].description, "core uplink");
    assert_eq!(interfaces[2].status, "*down");
    assert_eq!(interfaces[2].ip_address, "unassigned");
    assert_eq!(interfaces[3].name, "Eth-Trunk1");
}

#[test]
fn utilization_fixture_attaches_rates_to_interfaces() {
    let mut interfaces = parse_interfaces(INTERFACE_BRIEF);
    apply_utilization(&mut interfaces, INTERFACE_UTILIZATION);

    assert_eq!(interfaces[0].utilization_in, 480.0);
    assert_eq!(interfaces[0].utilization_out, 130.0);
    assert_eq!(interfaces[1].utilization_in, 220.0);
    // No rate line for the spare port.
    assert_eq!(interfaces[2].utilization_in, 0.0);
}

#[test]
fn access_user_fixtures_fill_every_counter() {
    let results = vec![
        ACCESS_USER_ONLINE.to_string(),
        ACCESS_USER_STATISTICS.to_string(),
    ];
    let stats = parse_pppoe_stats(&results);

    assert_eq!(stats.total, 1874);
    assert_eq!(stats.active, 1791);
    assert_eq!(stats.peak, 2011);
    assert_eq!(stats.authenticated, 1791);
}

#[test]
fn system_fixtures_fill_health_and_identity() {
    let results = vec![
        CPU_USAGE.to_string(),
        MEMORY_USAGE.to_string(),
        DEVICE_STATUS.to_string(),
        VERSION.to_string(),
    ];
    let metrics = parse_system_metrics(&results);

    assert_eq!(metrics.cpu_percent, 23.0);
    assert_eq!(metrics.memory_percent, 61.0);
    assert_eq!(metrics.model, "NE8000-M8");
    assert_eq!(metrics.temperature_celsius, 39.0);
    assert_eq!(metrics.uptime, "84 days, 3 hours, 21 minutes");
    assert!(metrics.version.starts_with("8.210"));
}

#[test]
fn utilization_fixture_aggregates_into_traffic_totals() {
    let stats = parse_traffic(&[INTERFACE_UTILIZATION.to_string()]);

    assert_eq!(stats.inbound_mbps, 350.0);
    assert_eq!(stats.outbound_mbps, 112.5);
    assert_eq!(stats.total_mbps, 462.5);
    assert_eq!(stats.peak_in_mbps, 480.0);
    assert_eq!(stats.peak_out_mbps, 130.0);
}

#[test]
fn partial_batches_still_produce_usable_records() {
    // The device answered the cpu command but the rest timed out empty.
    let results = vec![
        CPU_USAGE.to_string(),
        String::new(),
        String::new(),
        String::new(),
    ];
    let metrics = parse_system_metrics(&results);

    assert_eq!(metrics.cpu_percent, 23.0);
    assert_eq!(metrics.memory_percent, 0.0);
    assert_eq!(metrics.version, "Unknown");
}
