//! End-to-end tests against an in-process fake NE8000.
//!
//! The fake speaks the VRP Telnet login protocol (`Username:` /
//! `Password:` literals, `<NE8000>` prompt) over a loopback socket and
//! answers the display commands the monitor sends, so the transport, pool,
//! executor and poller run their real code paths with no device attached.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use nemon::cache::TieredCache;
use nemon::config::{
    CacheTtls, DeviceEndpoint, PollIntervals, PoolConfig, Protocol, RetryConfig, Timeouts,
};
use nemon::executor::CommandExecutor;
use nemon::poller::Poller;
use nemon::pool::ConnectionPool;
use nemon::transport::{TransportSession, clean_output};

const PROMPT: &[u8] = b"\r\n<NE8000>";

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Copy, Default)]
struct Behavior {
    /// Number of commands the first accepted connection answers before it
    /// closes without replying. `None` answers everything.
    drop_first_connection_after: Option<usize>,
    /// Delay before answering each command.
    response_delay: Duration,
}

struct FakeDevice {
    port: u16,
    connections: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeDevice {
    async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let port = listener.local_addr().expect("local addr").port();
        let connections = Arc::new(AtomicUsize::new(0));
        let commands = Arc::new(Mutex::new(Vec::new()));

        let conn_counter = connections.clone();
        let log = commands.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let index = conn_counter.fetch_add(1, Ordering::SeqCst);
                let log = log.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, index, behavior, log).await;
                });
            }
        });

        Self {
            port,
            connections,
            commands,
        }
    }

    fn endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint {
            host: "127.0.0.1".to_string(),
            port: self.port,
            username: "monitor".to_string(),
            password: "secret".to_string(),
            protocol: Protocol::Telnet,
            timeouts: Timeouts {
                connect: Duration::from_secs(2),
                command: Duration::from_secs(2),
                auth: Duration::from_secs(2),
            },
        }
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn commands_seen(&self) -> Vec<String> {
        self.commands.lock().expect("command log").clone()
    }
}

async fn serve(
    mut stream: TcpStream,
    index: usize,
    behavior: Behavior,
    log: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    stream.write_all(b"Username:").await?;
    read_line(&mut stream).await?;
    stream.write_all(b"Password:").await?;
    read_line(&mut stream).await?;
    stream.write_all(PROMPT).await?;

    let mut answered = 0usize;
    loop {
        let Some(line) = read_line(&mut stream).await? else {
            return Ok(());
        };
        let command = line.trim().to_string();
        if command.is_empty() {
            continue;
        }
        if command == "quit" {
            return Ok(());
        }

        log.lock().expect("command log").push(command.clone());
        if index == 0 && behavior.drop_first_connection_after == Some(answered) {
            // Vanish mid-batch the way a crashed CLI process would.
            return Ok(());
        }

        if !behavior.response_delay.is_zero() {
            tokio::time::sleep(behavior.response_delay).await;
        }
        let reply = format!("{command}\r\n{}", respond(&command));
        stream.write_all(reply.as_bytes()).await?;
        stream.write_all(PROMPT).await?;
        answered += 1;
    }
}

async fn read_line(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte).await? == 0 {
            return Ok(None);
        }
        if byte[0] == b'\n' {
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
        line.push(byte[0]);
    }
}

fn respond(command: &str) -> String {
    if command.starts_with("display version") {
        "VRP (R) software, Version 8.210 (NE8000 V800R021C10)\r\n\
         HUAWEI NE8000-M8 uptime is 12 days, 4 hours"
            .to_string()
    } else if command.starts_with("display interface brief | include utilization") {
        "GigabitEthernet0/1/0 utilization in: 120Mbps out: 80Mbps\r\n\
         GigabitEthernet0/1/1 utilization in: 40Mbps out: 10Mbps"
            .to_string()
    } else if command.starts_with("display interface brief") {
        "Interface                     PHY     Protocol  Address       Description\r\n\
         -------------------------------------------------------------------------\r\n\
         GigabitEthernet0/1/0          up      up        10.0.0.1      core uplink\r\n\
         GigabitEthernet0/1/1          down    down"
            .to_string()
    } else if command.starts_with("display interface statistics") {
        "GigabitEthernet0/1/0 utilization in: 42% out: 17%".to_string()
    } else if command.starts_with("display access-user online-total") {
        "Total users                    : 1874\r\nActive sessions                : 1791".to_string()
    } else if command.starts_with("display access-user statistics") {
        "Peak sessions                  : 2011\r\nAuthenticated users            : 1791".to_string()
    } else if command.starts_with("display cpu-usage") {
        "Cpu utilization for five seconds: 23%".to_string()
    } else if command.starts_with("display memory-usage") {
        "Memory utilization : 61%".to_string()
    } else if command.starts_with("display device") {
        "Slot 1 NE8000-M8 Temperature 39 Normal".to_string()
    } else if command.starts_with("display traffic-policy statistics") {
        "Info: no traffic policy statistics available".to_string()
    } else {
        format!("Info: unrecognized command {command}")
    }
}

async fn wait_for(cache: &TieredCache, key: &str) -> serde_json::Value {
    for _ in 0..100 {
        if let Some(value) = cache.get(key).await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("cache key {key:?} never appeared");
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        backoff_multiplier: 2.0,
    }
}

#[tokio::test]
async fn telnet_session_logs_in_and_answers_commands() {
    init_logs();
    let device = FakeDevice::start(Behavior::default()).await;

    let endpoint = device.endpoint();
    let mut session = TransportSession::connect(&endpoint).await.expect("login");
    assert!(session.is_open());

    let raw = session
        .send("display version", Duration::from_secs(2))
        .await
        .expect("send");
    assert!(raw.contains("VRP"));
    assert!(raw.trim_end().ends_with("<NE8000>"));

    let cleaned = clean_output(&raw, "display version");
    assert!(cleaned.contains("Version 8.210"));
    assert!(!cleaned.contains("<NE8000>"));
    assert!(!cleaned.contains("display version"));

    session.close().await;
}

#[tokio::test]
async fn executor_runs_batches_with_paging_disabled() {
    init_logs();
    let device = FakeDevice::start(Behavior::default()).await;

    let pool = ConnectionPool::new(device.endpoint(), PoolConfig::default());
    let executor = CommandExecutor::new(pool, fast_retry(), Duration::from_secs(2));

    let outputs = executor
        .execute(&[
            "display version".to_string(),
            "display cpu-usage".to_string(),
        ])
        .await
        .expect("batch succeeds");

    assert_eq!(outputs.len(), 2);
    assert!(outputs[0].contains("VRP"));
    assert!(outputs[1].contains("23%"));
    assert!(outputs.iter().all(|output| !output.contains("<NE8000>")));

    let seen = device.commands_seen();
    assert_eq!(
        seen,
        vec![
            "display version | no-more".to_string(),
            "display cpu-usage | no-more".to_string(),
        ]
    );
}

#[tokio::test]
async fn capacity_one_pool_never_shares_a_session() {
    init_logs();
    let device = FakeDevice::start(Behavior {
        response_delay: Duration::from_millis(50),
        ..Default::default()
    })
    .await;

    let pool = ConnectionPool::new(
        device.endpoint(),
        PoolConfig {
            max_sessions: 1,
            ..Default::default()
        },
    );
    let executor = CommandExecutor::new(pool.clone(), fast_retry(), Duration::from_secs(2));

    let (first, second) = tokio::join!(
        executor.execute(&["display version".to_string()]),
        executor.execute(&["display cpu-usage".to_string()]),
    );
    first.expect("first batch");
    second.expect("second batch");

    // Concurrent callers each got their own session.
    assert!(device.connections() >= 2);
    // Only one of them fits back into the capacity-1 pool.
    assert_eq!(pool.idle_len().await, 1);

    // A later batch reuses the pooled session instead of reconnecting.
    let connections_before = device.connections();
    executor
        .execute(&["display version".to_string()])
        .await
        .expect("reused session");
    assert_eq!(device.connections(), connections_before);
}

#[tokio::test]
async fn transport_failure_reruns_the_whole_batch() {
    init_logs();
    let device = FakeDevice::start(Behavior {
        drop_first_connection_after: Some(1),
        ..Default::default()
    })
    .await;

    let pool = ConnectionPool::new(device.endpoint(), PoolConfig::default());
    let executor = CommandExecutor::new(pool, fast_retry(), Duration::from_secs(2));

    let outputs = executor
        .execute(&[
            "display version".to_string(),
            "display cpu-usage".to_string(),
            "display memory-usage".to_string(),
        ])
        .await
        .expect("retry recovers the batch");
    assert_eq!(outputs.len(), 3);

    let seen = device.commands_seen();
    // First connection died on command two; nothing beyond it ran there.
    assert_eq!(seen[0], "display version | no-more");
    assert_eq!(seen[1], "display cpu-usage | no-more");
    // The retry started over from command one on a fresh connection.
    assert_eq!(seen[2], "display version | no-more");
    assert_eq!(
        seen.iter()
            .filter(|command| command.contains("memory-usage"))
            .count(),
        1
    );
    assert_eq!(device.connections(), 2);
}

#[tokio::test]
async fn poller_fills_the_cache_from_the_device() {
    init_logs();
    let device = FakeDevice::start(Behavior::default()).await;

    let pool = ConnectionPool::new(device.endpoint(), PoolConfig::default());
    let executor = Arc::new(CommandExecutor::new(
        pool.clone(),
        fast_retry(),
        Duration::from_secs(2),
    ));
    let cache = Arc::new(TieredCache::local_only());
    let poller = Poller::new(
        executor,
        cache.clone(),
        PollIntervals {
            tick: Duration::from_millis(50),
            ..Default::default()
        },
        CacheTtls::default(),
    );

    poller.start().await;

    let interfaces = wait_for(&cache, "interfaces").await;
    assert_eq!(interfaces[0]["name"], json!("GigabitEthernet0/1/0"));
    assert_eq!(interfaces[0]["utilization_in"], json!(42.0));

    let pppoe = wait_for(&cache, "pppoe_stats").await;
    assert_eq!(pppoe["active"], json!(1791));
    assert_eq!(pppoe["peak"], json!(2011));

    let metrics = wait_for(&cache, "system_metrics").await;
    assert_eq!(metrics["cpu_percent"], json!(23.0));
    assert_eq!(metrics["model"], json!("NE8000-M8"));

    let traffic = wait_for(&cache, "traffic_data").await;
    assert_eq!(traffic["inbound_mbps"], json!(80.0));
    assert_eq!(traffic["peak_in_mbps"], json!(120.0));

    let status = poller.status().await;
    assert!(status.running);
    assert!(status.collections >= 4);
    assert_eq!(status.errors, 0);

    poller.stop().await;
    pool.shutdown().await;
}
