//! Tor worker boundary
//!
//! The orchestrator drives the daemon process through an explicit
//! command/signal channel pair: "start requested" eventually answers
//! `Ready` or `Failed`, "stop requested" eventually answers `Stopped`.
//! Signals are scoped to this worker instance, so unrelated process
//! noise never leaks in. An unsolicited `Stopped` means the daemon
//! died on its own.
//!
//! [`TorProcessWorker`] is the default implementation: it writes a
//! per-session torrc, spawns the `tor` binary, and reports readiness
//! once the control port accepts connections.

use crate::config::TorConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Bound on polling for the control port after spawning the daemon
const CONTROL_WAIT: Duration = Duration::from_secs(90);

/// Requests into the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    Start,
    Stop,
}

/// Asynchronous answers out of the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSignal {
    /// The daemon is up and its control port is reachable
    Ready,
    /// The daemon never reached ready
    Failed(String),
    /// The daemon has exited, solicited or not
    Stopped,
}

/// Orchestrator-side handle
pub struct WorkerChannel {
    pub commands: mpsc::Sender<WorkerCommand>,
    pub signals: mpsc::Receiver<WorkerSignal>,
}

/// Worker-side handle
pub struct WorkerEndpoint {
    pub commands: mpsc::Receiver<WorkerCommand>,
    pub signals: mpsc::Sender<WorkerSignal>,
}

/// Create a connected channel pair for a worker implementation
pub fn worker_channel() -> (WorkerChannel, WorkerEndpoint) {
    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let (sig_tx, sig_rx) = mpsc::channel(4);
    (
        WorkerChannel {
            commands: cmd_tx,
            signals: sig_rx,
        },
        WorkerEndpoint {
            commands: cmd_rx,
            signals: sig_tx,
        },
    )
}

/// Process worker failures
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to write torrc: {0}")]
    WriteTorrc(std::io::Error),
    #[error("failed to spawn tor process: {0}")]
    Spawn(std::io::Error),
    #[error("timed out waiting for tor control port")]
    ControlPortTimeout,
}

/// Process-backed worker running a private tor daemon
pub struct TorProcessWorker;

impl TorProcessWorker {
    /// Spawn the worker service task.
    ///
    /// Returns the orchestrator-side channel and the control auth
    /// cookie path the daemon will write, which belongs in
    /// `TorConfig::cookie_path` before the orchestrator connects.
    pub fn launch(config: &TorConfig) -> (WorkerChannel, PathBuf) {
        let runtime_dir = std::env::temp_dir()
            .join("oniondrop")
            .join(crate::util::url_safe_token());
        let cookie_path = runtime_dir.join("control_auth_cookie");

        let (channel, endpoint) = worker_channel();
        tokio::spawn(service_loop(endpoint, config.clone(), runtime_dir));

        (channel, cookie_path)
    }
}

async fn service_loop(mut endpoint: WorkerEndpoint, config: TorConfig, runtime_dir: PathBuf) {
    let mut child: Option<Child> = None;

    loop {
        if let Some(running) = child.as_mut() {
            tokio::select! {
                cmd = endpoint.commands.recv() => match cmd {
                    Some(WorkerCommand::Start) => {
                        // Already running; readiness holds
                        let _ = endpoint.signals.send(WorkerSignal::Ready).await;
                    },
                    Some(WorkerCommand::Stop) => {
                        shutdown(running).await;
                        child = None;
                        let _ = endpoint.signals.send(WorkerSignal::Stopped).await;
                    },
                    None => {
                        shutdown(running).await;
                        break;
                    },
                },
                status = running.wait() => {
                    warn!("tor process exited unsolicited: {:?}", status);
                    child = None;
                    let _ = endpoint.signals.send(WorkerSignal::Stopped).await;
                },
            }
        } else {
            match endpoint.commands.recv().await {
                Some(WorkerCommand::Start) => match launch_daemon(&config, &runtime_dir).await {
                    Ok(c) => {
                        info!("tor daemon ready on control port {}", config.control_port);
                        child = Some(c);
                        let _ = endpoint.signals.send(WorkerSignal::Ready).await;
                    },
                    Err(e) => {
                        let _ = endpoint
                            .signals
                            .send(WorkerSignal::Failed(e.to_string()))
                            .await;
                    },
                },
                Some(WorkerCommand::Stop) => {
                    // Nothing running; confirm anyway so stop always completes
                    let _ = endpoint.signals.send(WorkerSignal::Stopped).await;
                },
                None => break,
            }
        }
    }

    let _ = tokio::fs::remove_dir_all(&runtime_dir).await;
}

async fn launch_daemon(config: &TorConfig, runtime_dir: &Path) -> Result<Child, WorkerError> {
    tokio::fs::create_dir_all(runtime_dir)
        .await
        .map_err(WorkerError::WriteTorrc)?;

    let torrc_path = runtime_dir.join("torrc");
    let torrc = render_torrc(config, runtime_dir);
    tokio::fs::write(&torrc_path, torrc)
        .await
        .map_err(WorkerError::WriteTorrc)?;

    debug!("Spawning {} -f {}", config.binary, torrc_path.display());
    let mut child = Command::new(&config.binary)
        .arg("-f")
        .arg(&torrc_path)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(WorkerError::Spawn)?;

    let addr = format!("{}:{}", config.control_host, config.control_port);
    if let Err(e) = wait_for_tcp(&addr, CONTROL_WAIT).await {
        let _ = child.start_kill();
        let _ = child.wait().await;
        return Err(e);
    }
    Ok(child)
}

fn render_torrc(config: &TorConfig, runtime_dir: &Path) -> String {
    format!(
        "DataDirectory \"{dir}\"\n\
         ControlPort {control}\n\
         CookieAuthentication 1\n\
         CookieAuthFile \"{cookie}\"\n\
         SocksPort 127.0.0.1:{socks}\n\
         AvoidDiskWrites 1\n\
         ClientOnly 1\n\
         Log notice file \"{log}\"\n",
        dir = runtime_dir.display(),
        control = config.control_port,
        cookie = runtime_dir.join("control_auth_cookie").display(),
        socks = config.socks_port,
        log = runtime_dir.join("tor.log").display(),
    )
}

async fn shutdown(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

async fn wait_for_tcp(addr: &str, timeout: Duration) -> Result<(), WorkerError> {
    let deadline = Instant::now() + timeout;
    loop {
        if Instant::now() >= deadline {
            return Err(WorkerError::ControlPortTimeout);
        }
        if TcpStream::connect(addr).await.is_ok() {
            return Ok(());
        }
        sleep(Duration::from_millis(200)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrc_pins_session_directories() {
        let config = TorConfig::default();
        let torrc = render_torrc(&config, Path::new("/tmp/oniondrop/x"));
        assert!(torrc.contains("DataDirectory \"/tmp/oniondrop/x\""));
        assert!(torrc.contains("ControlPort 9151"));
        assert!(torrc.contains("CookieAuthentication 1"));
        assert!(torrc.contains("SocksPort 127.0.0.1:9150"));
    }

    #[tokio::test]
    async fn stop_without_start_still_confirms() {
        let (mut channel, endpoint) = worker_channel();
        tokio::spawn(service_loop(
            endpoint,
            TorConfig::default(),
            std::env::temp_dir().join("oniondrop-test-noop"),
        ));

        channel.commands.send(WorkerCommand::Stop).await.unwrap();
        assert_eq!(channel.signals.recv().await, Some(WorkerSignal::Stopped));
    }
}
