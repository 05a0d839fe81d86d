//! SSH session over an interactive pseudo-shell.

use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::{debug, trace, warn};
use russh::ChannelMsg;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::Instant;

use crate::config::DeviceEndpoint;
use crate::error::ConnectError;

use super::{algo, ends_with_prompt};

/// One authenticated SSH shell session.
///
/// The russh channel is owned by a spawned I/O task; the session talks to
/// it through a pair of mpsc queues, so reads and writes never block on
/// the channel state machine directly.
pub struct SshSession {
    client: Client,
    to_shell: Sender<String>,
    from_shell: Receiver<String>,
}

impl SshSession {
    pub(crate) async fn connect(endpoint: &DeviceEndpoint) -> Result<Self, ConnectError> {
        let device_addr = endpoint.addr();

        let config = Config {
            preferred: algo::preferred(),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let client = tokio::time::timeout(
            endpoint.timeouts.connect,
            Client::connect_with_config(
                (endpoint.host.clone(), endpoint.port),
                &endpoint.username,
                AuthMethod::with_password(&endpoint.password),
                ServerCheckMethod::NoCheck,
                config,
            ),
        )
        .await
        .map_err(|_| ConnectError::ConnectTimeout {
            addr: device_addr.clone(),
            timeout: endpoint.timeouts.connect,
        })??;
        debug!("{device_addr} SSH connection authenticated");

        let mut channel = client.get_channel().await?;
        channel.request_pty(false, "xterm", 120, 40, 0, 0, &[]).await?;
        channel.request_shell(false).await?;
        debug!("{device_addr} shell request successful");

        let (to_shell, mut from_caller) = mpsc::channel::<String>(64);
        let (to_caller, from_shell) = mpsc::channel::<String>(64);

        let task_addr = device_addr.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = from_caller.recv() => {
                        if let Err(err) = channel.data(data.as_bytes()).await {
                            debug!("{task_addr} failed to send data to shell: {err:?}");
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                if let Ok(text) = std::str::from_utf8(data)
                                    && to_caller.send(text.to_string()).await.is_err()
                                {
                                    debug!("{task_addr} shell output receiver dropped");
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{task_addr} shell exited with status {exit_status}");
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{task_addr} shell sent EOF");
                                break;
                            }
                            _ => {}
                        }
                    },
                    else => break,
                }
            }
            debug!("{task_addr} SSH I/O task ended");
        });

        let mut session = Self {
            client,
            to_shell,
            from_shell,
        };
        session.await_prompt(endpoint.timeouts.auth).await?;
        debug!("{device_addr} initial prompt detected, session ready");

        Ok(session)
    }

    /// Waits for the first shell prompt so the session starts out between
    /// commands.
    async fn await_prompt(&mut self, timeout: Duration) -> Result<(), ConnectError> {
        let mut buffer = String::new();

        let waited = tokio::time::timeout(timeout, async {
            loop {
                match self.from_shell.recv().await {
                    Some(chunk) => {
                        trace!("{chunk:?}");
                        buffer.push_str(&chunk);
                        if ends_with_prompt(buffer.as_bytes()) {
                            return Ok(());
                        }
                    }
                    None => return Err(ConnectError::SessionClosed),
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(ConnectError::AuthTimeout(timeout)),
        }
    }

    pub(crate) async fn send(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ConnectError> {
        // Drop residual output from a previous command before writing.
        while self.from_shell.try_recv().is_ok() {}

        self.to_shell.send(format!("{command}\n")).await?;

        let mut output = String::new();
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "command {command:?} timed out after {timeout:?}, returning {} buffered bytes",
                    output.len()
                );
                return Ok(output);
            }

            match tokio::time::timeout(remaining, self.from_shell.recv()).await {
                Err(_) => {
                    warn!(
                        "command {command:?} timed out after {timeout:?}, returning {} buffered bytes",
                        output.len()
                    );
                    return Ok(output);
                }
                Ok(None) => return Err(ConnectError::SessionClosed),
                Ok(Some(chunk)) => {
                    trace!("{chunk:?}");
                    output.push_str(&chunk);
                    if ends_with_prompt(output.as_bytes()) {
                        return Ok(output);
                    }
                }
            }
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.client.is_closed()
    }

    pub(crate) async fn close(&mut self) {
        self.from_shell.close();

        if self.is_open() {
            // Ask the CLI to log out; the underlying client closes on drop
            // regardless of whether the device honors it.
            if let Err(err) = self.to_shell.send("quit\n".to_string()).await {
                debug!("failed to send quit on close: {err:?}");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
