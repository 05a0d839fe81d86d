//! Telnet session over a raw TCP socket.
//!
//! NE8000 Telnet access uses a plain line-oriented login: the device sends
//! `Username:` and `Password:` literals, then drops into the usual VRP
//! prompt. No option negotiation is attempted; the device side tolerates a
//! dumb client.

use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::config::DeviceEndpoint;
use crate::error::ConnectError;

use super::ends_with_prompt;

const USERNAME_CHALLENGE: &str = "Username:";
const PASSWORD_CHALLENGE: &str = "Password:";

/// One authenticated Telnet session.
pub struct TelnetSession {
    stream: TcpStream,
    open: bool,
}

impl TelnetSession {
    pub(crate) async fn connect(endpoint: &DeviceEndpoint) -> Result<Self, ConnectError> {
        let device_addr = endpoint.addr();

        let stream = tokio::time::timeout(
            endpoint.timeouts.connect,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| ConnectError::ConnectTimeout {
            addr: device_addr.clone(),
            timeout: endpoint.timeouts.connect,
        })??;
        debug!("{device_addr} TCP connection established");

        let mut session = Self { stream, open: true };

        let auth = endpoint.timeouts.auth;
        session.read_until(USERNAME_CHALLENGE, auth).await?;
        session.write_line(&endpoint.username).await?;
        session.read_until(PASSWORD_CHALLENGE, auth).await?;
        session.write_line(&endpoint.password).await?;
        session.await_prompt(auth).await?;
        debug!("{device_addr} Telnet login complete, session ready");

        Ok(session)
    }

    async fn write_line(&mut self, text: &str) -> Result<(), ConnectError> {
        self.stream.write_all(text.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        Ok(())
    }

    /// Reads until `marker` appears in the accumulated stream.
    async fn read_until(
        &mut self,
        marker: &'static str,
        timeout: Duration,
    ) -> Result<(), ConnectError> {
        let deadline = Instant::now() + timeout;
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 1024];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectError::LoginChallenge(marker));
            }

            match tokio::time::timeout(remaining, self.stream.read(&mut chunk)).await {
                Err(_) => return Err(ConnectError::LoginChallenge(marker)),
                Ok(Err(err)) => {
                    self.open = false;
                    return Err(err.into());
                }
                Ok(Ok(0)) => {
                    self.open = false;
                    return Err(ConnectError::SessionClosed);
                }
                Ok(Ok(n)) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if String::from_utf8_lossy(&buffer).contains(marker) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Waits until the stream settles at a shell prompt.
    async fn await_prompt(&mut self, timeout: Duration) -> Result<(), ConnectError> {
        let deadline = Instant::now() + timeout;
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 1024];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectError::AuthTimeout(timeout));
            }

            match tokio::time::timeout(remaining, self.stream.read(&mut chunk)).await {
                Err(_) => return Err(ConnectError::AuthTimeout(timeout)),
                Ok(Err(err)) => {
                    self.open = false;
                    return Err(err.into());
                }
                Ok(Ok(0)) => {
                    self.open = false;
                    return Err(ConnectError::SessionClosed);
                }
                Ok(Ok(n)) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if ends_with_prompt(&buffer) {
                        return Ok(());
                    }
                }
            }
        }
    }

    pub(crate) async fn send(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ConnectError> {
        // Drop residual output from a previous command before writing.
        let mut drain = [0u8; 1024];
        loop {
            match self.stream.try_read(&mut drain) {
                Ok(0) => {
                    self.open = false;
                    return Err(ConnectError::SessionClosed);
                }
                Ok(_) => continue,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    self.open = false;
                    return Err(err.into());
                }
            }
        }

        self.write_line(command).await?;

        let deadline = Instant::now() + timeout;
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "command {command:?} timed out after {timeout:?}, returning {} buffered bytes",
                    buffer.len()
                );
                return Ok(String::from_utf8_lossy(&buffer).into_owned());
            }

            match tokio::time::timeout(remaining, self.stream.read(&mut chunk)).await {
                Err(_) => {
                    warn!(
                        "command {command:?} timed out after {timeout:?}, returning {} buffered bytes",
                        buffer.len()
                    );
                    return Ok(String::from_utf8_lossy(&buffer).into_owned());
                }
                Ok(Err(err)) => {
                    self.open = false;
                    return Err(err.into());
                }
                Ok(Ok(0)) => {
                    self.open = false;
                    return Err(ConnectError::SessionClosed);
                }
                Ok(Ok(n)) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if ends_with_prompt(&buffer) {
                        return Ok(String::from_utf8_lossy(&buffer).into_owned());
                    }
                }
            }
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) async fn close(&mut self) {
        if self.open {
            let _ = self.write_line("quit").await;
            let _ = self.stream.shutdown().await;
            self.open = false;
        }
    }
}
