//! Tor control port client
//!
//! Line-oriented session over the control port: authentication,
//! command issuance, and demultiplexing of asynchronous `650` notices
//! from numbered command replies. A dedicated reader task owns the
//! read half; replies are handed back to the command issuer through a
//! channel, notices go to the registered event listener.

use crate::config::TorConfig;
use data_encoding::HEXLOWER;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Bound on waiting for a command reply
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Common cookie file locations
const COOKIE_PATHS: &[&str] = &[
    "/run/tor/control.authcookie",
    "/var/run/tor/control.authcookie",
    "/var/lib/tor/control_auth_cookie",
];

/// Control protocol failures
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("command failed with status {code}: {msg}")]
    CommandFailed { code: u16, msg: String },
    #[error("malformed control response: {0}")]
    Protocol(String),
    #[error("timed out waiting for control response")]
    Timeout,
    #[error("control session is closed")]
    Closed,
}

/// An asynchronous notice, as a (keyword, payload) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    pub keyword: String,
    pub payload: String,
}

/// A complete numbered reply to one command
#[derive(Debug)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

type EventSink = Arc<Mutex<Option<mpsc::UnboundedSender<ControlEvent>>>>;

/// Authenticated session on the control port.
///
/// Exclusively owned by the orchestrator while active. Teardown is
/// idempotent; closing an already-closed session is a no-op.
pub struct ControlSession {
    writer: OwnedWriteHalf,
    replies: mpsc::UnboundedReceiver<Reply>,
    listener: EventSink,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

impl ControlSession {
    /// Connect to the control port. Does not authenticate.
    pub async fn connect(config: &TorConfig) -> Result<Self, ControlError> {
        let addr = format!("{}:{}", config.control_host, config.control_port);
        debug!("Connecting to Tor control port: {}", addr);

        let stream = TcpStream::connect(&addr).await?;
        let (read_half, writer) = stream.into_split();

        let (reply_tx, replies) = mpsc::unbounded_channel();
        let listener: EventSink = Arc::new(Mutex::new(None));
        let reader = tokio::spawn(read_loop(
            BufReader::new(read_half),
            reply_tx,
            Arc::clone(&listener),
        ));

        Ok(Self {
            writer,
            replies,
            listener,
            reader: Some(reader),
            closed: false,
        })
    }

    /// Authenticate with the configured password, or a control auth
    /// cookie, or null auth as a last resort.
    pub async fn authenticate(&mut self, config: &TorConfig) -> Result<(), ControlError> {
        if let Some(password) = &config.control_password {
            let hex = HEXLOWER.encode(password.as_bytes());
            return self
                .send_command(&format!("AUTHENTICATE {}", hex))
                .await
                .map(|_| ())
                .map_err(auth_error);
        }

        let mut candidates: Vec<String> = Vec::new();
        if let Some(path) = &config.cookie_path {
            candidates.push(path.clone());
        }
        candidates.extend(COOKIE_PATHS.iter().map(|p| p.to_string()));

        for path in &candidates {
            let Ok(cookie) = std::fs::read(path) else {
                continue;
            };
            let hex = HEXLOWER.encode(&cookie);
            match self.send_command(&format!("AUTHENTICATE {}", hex)).await {
                Ok(_) => {
                    debug!("Authenticated with cookie from {}", path);
                    return Ok(());
                },
                Err(e) => {
                    debug!("Cookie auth failed with {}: {}", path, e);
                    continue;
                },
            }
        }

        debug!("Trying null authentication");
        self.send_command("AUTHENTICATE")
            .await
            .map(|_| ())
            .map_err(auth_error)
    }

    /// Tie the daemon's lifetime to this control connection
    pub async fn take_ownership(&mut self) -> Result<(), ControlError> {
        self.send_command("TAKEOWNERSHIP").await.map(|_| ())
    }

    /// Register the asynchronous event listener.
    ///
    /// Must be called before [`set_events`](Self::set_events), else
    /// early notices race past the registration and are dropped.
    pub fn subscribe(&self, listener: mpsc::UnboundedSender<ControlEvent>) {
        *self.listener.lock().expect("listener lock poisoned") = Some(listener);
    }

    /// Enable delivery of the given asynchronous event keywords
    pub async fn set_events(&mut self, keywords: &[&str]) -> Result<(), ControlError> {
        self.send_command(&format!("SETEVENTS {}", keywords.join(" ")))
            .await
            .map(|_| ())
    }

    /// Push configuration entries as a single SETCONF command
    pub async fn set_conf(&mut self, entries: &[(String, String)]) -> Result<(), ControlError> {
        let mut cmd = String::from("SETCONF");
        for (key, value) in entries {
            if value.contains(' ') {
                cmd.push_str(&format!(" {}=\"{}\"", key, value));
            } else {
                cmd.push_str(&format!(" {}={}", key, value));
            }
        }
        self.send_command(&cmd).await.map(|_| ())
    }

    /// Create an ephemeral v3 onion service mapping external port 80
    /// to the given local target. The key is freshly generated and
    /// discarded by the daemon (`Flags=DiscardPK`), so it is never
    /// persisted anywhere.
    ///
    /// Returns the full onion address.
    pub async fn create_ephemeral_service(
        &mut self,
        target_host: &str,
        target_port: u16,
    ) -> Result<String, ControlError> {
        let cmd = format!(
            "ADD_ONION NEW:ED25519-V3 Flags=DiscardPK Port=80,{}:{}",
            target_host, target_port
        );
        let reply = self.send_command(&cmd).await?;

        let service_id = reply
            .lines
            .iter()
            .find_map(|line| line.strip_prefix("ServiceID=").map(|id| id.trim().to_string()))
            .ok_or_else(|| {
                ControlError::Protocol("ADD_ONION response missing ServiceID".to_string())
            })?;

        Ok(format!("{}.onion", service_id))
    }

    /// Remove a previously created onion service
    pub async fn del_onion(&mut self, service_id: &str) -> Result<(), ControlError> {
        self.send_command(&format!("DEL_ONION {}", service_id))
            .await
            .map(|_| ())
    }

    /// Tear down the session. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        *self.listener.lock().expect("listener lock poisoned") = None;
    }

    /// Send one command line and wait for its numbered reply
    async fn send_command(&mut self, cmd: &str) -> Result<Reply, ControlError> {
        if self.closed {
            return Err(ControlError::Closed);
        }

        trace!("-> {}", redact(cmd));
        self.writer.write_all(cmd.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;

        let reply = match tokio::time::timeout(REPLY_TIMEOUT, self.replies.recv()).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return Err(ControlError::Closed),
            Err(_) => return Err(ControlError::Timeout),
        };

        if reply.code >= 400 {
            return Err(ControlError::CommandFailed {
                code: reply.code,
                msg: reply.lines.join(" / "),
            });
        }
        Ok(reply)
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn auth_error(e: ControlError) -> ControlError {
    match e {
        ControlError::CommandFailed { msg, .. } => ControlError::Auth(msg),
        other => other,
    }
}

/// Hide credential bytes in logs
fn redact(cmd: &str) -> String {
    if cmd.starts_with("AUTHENTICATE") {
        "AUTHENTICATE <redacted>".to_string()
    } else {
        cmd.to_string()
    }
}

/// Reader task: demultiplex asynchronous notices from replies.
///
/// Notices (code 650) are forwarded to the registered listener in
/// arrival order, exactly once each, for as long as the session is
/// open. Reply lines accumulate until the final `NNN<space>` line.
async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    reply_tx: mpsc::UnboundedSender<Reply>,
    listener: EventSink,
) {
    let mut pending: Vec<String> = Vec::new();
    let mut in_data_block = false;

    loop {
        let mut line = String::new();
        let n = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                debug!("Control port read error: {}", e);
                break;
            },
        };
        if n == 0 {
            debug!("Control port closed by peer");
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']);

        // Multi-line data blocks (250+key=...) end with a lone dot
        if in_data_block {
            if line == "." {
                in_data_block = false;
            } else {
                pending.push(line.to_string());
            }
            continue;
        }

        let Some((code, sep, rest)) = split_status_line(line) else {
            warn!("Unparseable control line: {:?}", line);
            continue;
        };

        if code == 650 {
            if let Some(event) = parse_event_line(rest) {
                let guard = listener.lock().expect("listener lock poisoned");
                match guard.as_ref() {
                    Some(tx) => {
                        if tx.send(event).is_err() {
                            trace!("Event listener dropped; discarding notice");
                        }
                    },
                    None => trace!("Notice before listener registration: {:?}", rest),
                }
            }
            continue;
        }

        match sep {
            '+' => {
                pending.push(rest.to_string());
                in_data_block = true;
            },
            '-' => pending.push(rest.to_string()),
            _ => {
                // Final line completes the reply
                pending.push(rest.to_string());
                let reply = Reply {
                    code,
                    lines: std::mem::take(&mut pending),
                };
                if reply_tx.send(reply).is_err() {
                    break;
                }
            },
        }
    }
}

/// Split `NNN<sep>rest` where sep is ' ', '-' or '+'
fn split_status_line(line: &str) -> Option<(u16, char, &str)> {
    if line.len() < 4 {
        return None;
    }
    let code: u16 = line.get(0..3)?.parse().ok()?;
    let sep = line.chars().nth(3)?;
    if !matches!(sep, ' ' | '-' | '+') {
        return None;
    }
    Some((code, sep, line.get(4..).unwrap_or("")))
}

/// Split an event payload into its keyword and remainder
fn parse_event_line(rest: &str) -> Option<ControlEvent> {
    let mut parts = rest.splitn(2, ' ');
    let keyword = parts.next()?.to_string();
    if keyword.is_empty() {
        return None;
    }
    let payload = parts.next().unwrap_or("").to_string();
    Some(ControlEvent { keyword, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_final_and_continuation_lines() {
        assert_eq!(split_status_line("250 OK"), Some((250, ' ', "OK")));
        assert_eq!(
            split_status_line("250-ServiceID=abc"),
            Some((250, '-', "ServiceID=abc"))
        );
        assert_eq!(split_status_line("250+info="), Some((250, '+', "info=")));
        assert_eq!(split_status_line("650"), None);
        assert_eq!(split_status_line("nope"), None);
    }

    #[test]
    fn parses_event_keyword_and_payload() {
        let ev = parse_event_line("HS_DESC UPLOAD abc UNKNOWN hsdir").unwrap();
        assert_eq!(ev.keyword, "HS_DESC");
        assert_eq!(ev.payload, "UPLOAD abc UNKNOWN hsdir");

        let bare = parse_event_line("DEBUG").unwrap();
        assert_eq!(bare.keyword, "DEBUG");
        assert_eq!(bare.payload, "");
    }

    #[test]
    fn redacts_credentials() {
        assert_eq!(redact("AUTHENTICATE deadbeef"), "AUTHENTICATE <redacted>");
        assert_eq!(redact("SETEVENTS HS_DESC"), "SETEVENTS HS_DESC");
    }
}
