//! Device transport layer.
//!
//! A [`TransportSession`] is one authenticated interactive CLI session,
//! reached over SSH or Telnet. Both variants follow the same discipline:
//! wait for a shell prompt before the session is considered usable, write
//! one command line at a time, and read until a prompt terminator ends the
//! stream or the command timeout elapses. A read timeout is tolerated and
//! yields whatever was buffered; the device is assumed to already be
//! sitting at its prompt between commands.
//!
//! # Main Components
//!
//! - [`TransportSession`] - protocol-dispatching session handle
//! - [`SshSession`] / [`TelnetSession`] - protocol implementations
//! - [`clean_output`] - echo/prompt stripping applied to raw output

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{DeviceEndpoint, Protocol};
use crate::error::ConnectError;

pub mod algo;
mod ssh;
mod telnet;

pub use ssh::SshSession;
pub use telnet::TelnetSession;

/// Bytes that terminate an NE8000 shell prompt (`<sys>`, `[sys]`, `>`, `#`).
pub(crate) const PROMPT_TERMINATORS: &[u8] = b">#]<";

/// Terminal control sequences stripped before output cleaning.
static CONTROL_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b[()][A-Za-z0-9]") {
        Ok(regex) => regex,
        Err(err) => panic!("invalid CONTROL_SEQUENCE regex: {err}"),
    }
});

/// A line consisting of (or ending in) a shell prompt.
static PROMPT_LINE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"[>#\]<]\s*$") {
        Ok(regex) => regex,
        Err(err) => panic!("invalid PROMPT_LINE regex: {err}"),
    }
});

/// One live CLI session to the device.
pub enum TransportSession {
    Ssh(SshSession),
    Telnet(TelnetSession),
}

impl TransportSession {
    /// Opens and authenticates a session using the endpoint's protocol.
    pub async fn connect(endpoint: &DeviceEndpoint) -> Result<Self, ConnectError> {
        match endpoint.protocol {
            Protocol::Ssh => Ok(TransportSession::Ssh(SshSession::connect(endpoint).await?)),
            Protocol::Telnet => Ok(TransportSession::Telnet(
                TelnetSession::connect(endpoint).await?,
            )),
        }
    }

    /// Sends one command and reads its raw output.
    ///
    /// Returns partial output when the read loop times out; fails only on
    /// transport-level errors (closed channel or socket).
    pub async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, ConnectError> {
        match self {
            TransportSession::Ssh(session) => session.send(command, timeout).await,
            TransportSession::Telnet(session) => session.send(command, timeout).await,
        }
    }

    /// Whether the underlying connection is still usable.
    pub fn is_open(&self) -> bool {
        match self {
            TransportSession::Ssh(session) => session.is_open(),
            TransportSession::Telnet(session) => session.is_open(),
        }
    }

    /// Best-effort close. Errors are swallowed; the connection is dropped
    /// either way.
    pub async fn close(&mut self) {
        match self {
            TransportSession::Ssh(session) => session.close().await,
            TransportSession::Telnet(session) => session.close().await,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            TransportSession::Ssh(_) => Protocol::Ssh,
            TransportSession::Telnet(_) => Protocol::Telnet,
        }
    }
}

/// True when the buffered output ends in a prompt terminator, ignoring
/// trailing whitespace. The device prints its prompt without a newline, so
/// this is the signal that a command has finished.
pub(crate) fn ends_with_prompt(buffer: &[u8]) -> bool {
    buffer
        .iter()
        .rev()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| PROMPT_TERMINATORS.contains(byte))
}

/// Cleans raw command output: strips control sequences, the first echoed
/// command line and any prompt lines, and trims surrounding whitespace.
///
/// Cleaning already-clean output returns it unchanged.
pub fn clean_output(raw: &str, command: &str) -> String {
    let text = CONTROL_SEQUENCE.replace_all(raw, "");
    let command = command.trim();

    let mut cleaned: Vec<&str> = Vec::new();
    let mut echo_pending = !command.is_empty();

    for line in text.lines() {
        let line = line.trim_matches(['\r', ' ', '\t']);

        if echo_pending && line.ends_with(command) {
            echo_pending = false;
            continue;
        }
        if line.is_empty() || PROMPT_LINE.is_match(line) {
            continue;
        }

        cleaned.push(line);
    }

    cleaned.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_detection_ignores_trailing_whitespace() {
        assert!(ends_with_prompt(b"<NE8000>"));
        assert!(ends_with_prompt(b"[NE8000-GigabitEthernet0/1/0] "));
        assert!(ends_with_prompt(b"output\r\n<NE8000> \r\n"));
        assert!(!ends_with_prompt(b"still printing"));
        assert!(!ends_with_prompt(b""));
    }

    #[test]
    fn cleaning_strips_echo_and_prompt() {
        let raw = "display version | no-more\r\nVRP (R) software, Version 8.210\r\nHUAWEI NE8000 M8 uptime is 12 days\r\n<NE8000>";
        let cleaned = clean_output(raw, "display version | no-more");
        assert_eq!(
            cleaned,
            "VRP (R) software, Version 8.210\nHUAWEI NE8000 M8 uptime is 12 days"
        );
    }

    #[test]
    fn cleaning_strips_prompt_prefixed_echo() {
        let raw = "<NE8000>display cpu-usage\r\nCpu utilization: 23%\r\n<NE8000>";
        let cleaned = clean_output(raw, "display cpu-usage");
        assert_eq!(cleaned, "Cpu utilization: 23%");
    }

    #[test]
    fn cleaning_is_idempotent_on_clean_output() {
        let clean = "GigabitEthernet0/1/0 up up 10.0.0.1\nGigabitEthernet0/1/1 down down";
        assert_eq!(clean_output(clean, "display interface brief"), clean);
        let twice = clean_output(&clean_output(clean, ""), "");
        assert_eq!(twice, clean);
    }

    #[test]
    fn cleaning_drops_control_sequences() {
        let raw = "\u{1b}[42Dinterface up\r\n<NE8000>";
        assert_eq!(clean_output(raw, ""), "interface up");
    }
}
