//! Tor orchestration state machine
//!
//! Sequences: worker start -> readiness signal -> transport client ->
//! control session (authenticate, take ownership, subscribe) -> bridge
//! configuration -> ephemeral hidden service -> progress tracking from
//! the event stream. Shutdown runs the sequence in reverse and always
//! reaches `Stopped`.
//!
//! The whole start/stop sequence is serialized behind one async mutex:
//! a `start()` issued while a prior session is active first runs the
//! full stop path, so no two control sessions are ever open
//! concurrently.

use crate::config::{TimeoutConfig, TorConfig, TransportConfig};
use crate::state::{HiddenServiceDescriptor, TorState};
use crate::tor::control::{ControlError, ControlEvent, ControlSession};
use crate::tor::events::{self, TorEvent};
use crate::tor::worker::{WorkerChannel, WorkerCommand, WorkerSignal};
use crate::transport::TransportClient;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Share of total progress attributed to client bootstrap
const BOOTSTRAP_WEIGHT: f64 = 0.7;
/// Progress once the first descriptor upload attempt is seen
const UPLOAD_CHECKPOINT: u8 = 90;
/// Progress once the ephemeral service has been created
const SERVICE_CREATED_PROGRESS: u8 = 10;
/// Bound on the best-effort DEL_ONION during shutdown
const DEL_ONION_TIMEOUT: Duration = Duration::from_secs(5);

/// Event keywords subscribed on the control session. Only
/// STATUS_CLIENT and HS_DESC drive state; the rest are logged.
const EVENT_KEYWORDS: &[&str] = &["CIRC", "STATUS_CLIENT", "HS_DESC", "WARN", "ERR"];

/// Failures of the start sequence. Each is caught at the step that
/// produced it and converted into a full rollback to `Stopped`.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("tor worker failed to start: {0}")]
    WorkerStartup(String),
    #[error("timed out waiting for tor worker readiness")]
    StartupTimeout,
    #[error("control port authentication failed: {0}")]
    Authentication(String),
    #[error("tor rejected configuration: {0}")]
    ConfigurationRejected(String),
    #[error("control protocol error: {0}")]
    Protocol(String),
    #[error("control connection failed: {0}")]
    Connection(#[from] ControlError),
}

/// Resources owned by one active session. Torn down before any
/// restart is allowed.
struct Lifecycle {
    transport: TransportClient,
    session: Option<ControlSession>,
    service: Option<HiddenServiceDescriptor>,
    event_task: Option<JoinHandle<()>>,
    death_watch: Option<JoinHandle<()>>,
}

struct Inner {
    tor_config: TorConfig,
    timeouts: TimeoutConfig,
    /// Local target the onion service's port 80 maps to
    target_port: u16,
    state_tx: watch::Sender<TorState>,
    lifecycle: Mutex<Lifecycle>,
    worker_cmds: mpsc::Sender<WorkerCommand>,
    worker_signals: Mutex<mpsc::Receiver<WorkerSignal>>,
}

/// Drives the Tor side of a share session. Cheap to clone.
#[derive(Clone)]
pub struct TorOrchestrator {
    inner: Arc<Inner>,
}

impl TorOrchestrator {
    /// Collaborators are injected: the worker channel, the transport
    /// configuration, and the control connection settings.
    pub fn new(
        tor_config: TorConfig,
        transport_config: TransportConfig,
        timeouts: TimeoutConfig,
        target_port: u16,
        worker: WorkerChannel,
    ) -> Self {
        let (state_tx, _) = watch::channel(TorState::Stopped);
        Self {
            inner: Arc::new(Inner {
                tor_config,
                timeouts,
                target_port,
                state_tx,
                lifecycle: Mutex::new(Lifecycle {
                    transport: TransportClient::new(transport_config),
                    session: None,
                    service: None,
                    event_task: None,
                    death_watch: None,
                }),
                worker_cmds: worker.commands,
                worker_signals: Mutex::new(worker.signals),
            }),
        }
    }

    /// Observe state transitions. Readers always see the latest value.
    pub fn subscribe(&self) -> watch::Receiver<TorState> {
        self.inner.state_tx.subscribe()
    }

    /// Run the full start sequence.
    ///
    /// If a prior session is active it is stopped first. On failure
    /// the shutdown path runs before the error is surfaced, so the
    /// final state is `Stopped`, never a dangling `Starting`.
    pub async fn start(&self) -> Result<HiddenServiceDescriptor, StartError> {
        let mut lc = self.inner.lifecycle.lock().await;

        if !self.inner.state_tx.borrow().is_stopped() {
            info!("Start requested while active; restarting");
            self.stop_locked(&mut lc).await;
        }

        self.set_state(TorState::Starting {
            progress: 0,
            onion_address: None,
        });

        match self.start_locked(&mut lc).await {
            Ok(service) => Ok(service),
            Err(e) => {
                error!("Tor start failed: {}; rolling back", e);
                self.stop_locked(&mut lc).await;
                Err(e)
            },
        }
    }

    /// Tear the session down. A no-op when already `Stopped`.
    pub async fn stop(&self) {
        let mut lc = self.inner.lifecycle.lock().await;
        if self.inner.state_tx.borrow().is_stopped() {
            debug!("Stop requested while already stopped; nothing to do");
            return;
        }
        self.stop_locked(&mut lc).await;
    }

    async fn start_locked(
        &self,
        lc: &mut MutexGuard<'_, Lifecycle>,
    ) -> Result<HiddenServiceDescriptor, StartError> {
        let inner = &self.inner;

        // 1. Ask the worker to launch the daemon and await readiness
        inner
            .worker_cmds
            .send(WorkerCommand::Start)
            .await
            .map_err(|_| StartError::WorkerStartup("worker channel closed".to_string()))?;
        self.await_worker_ready().await?;

        // 2. Transport client: failure degrades connectivity but is
        //    not fatal to the start attempt
        if let Err(e) = lc.transport.start() {
            warn!("Transport bootstrap failed, continuing without bridge: {}", e);
        }

        // 3. Control session: authenticate, take ownership so the
        //    daemon dies with us, register the listener, then enable
        //    event delivery (this order matters)
        let mut session = ControlSession::connect(&inner.tor_config).await?;
        session
            .authenticate(&inner.tor_config)
            .await
            .map_err(|e| match e {
                ControlError::Auth(msg) => StartError::Authentication(msg),
                other => StartError::Connection(other),
            })?;
        session
            .take_ownership()
            .await
            .map_err(config_rejected)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel::<ControlEvent>();
        session.subscribe(event_tx);
        session
            .set_events(EVENT_KEYWORDS)
            .await
            .map_err(config_rejected)?;

        // 4. Wire the bridge through the transport client
        if lc.transport.enabled() {
            session
                .set_conf(&lc.transport.bridge_conf())
                .await
                .map_err(config_rejected)?;
        }

        // 5. Mint the ephemeral hidden service
        let address = session
            .create_ephemeral_service("127.0.0.1", inner.target_port)
            .await
            .map_err(|e| match e {
                ControlError::Protocol(msg) => StartError::Protocol(msg),
                ControlError::CommandFailed { code, msg } => {
                    StartError::Protocol(format!("ADD_ONION failed with {}: {}", code, msg))
                },
                other => StartError::Connection(other),
            })?;
        info!("Created ephemeral hidden service {}", address);

        let service = HiddenServiceDescriptor {
            address: address.clone(),
            target_port: inner.target_port,
        };
        lc.service = Some(service.clone());
        self.set_state(TorState::Starting {
            progress: SERVICE_CREATED_PROGRESS,
            onion_address: Some(address.clone()),
        });

        // 6. Progress tracking from the event stream
        lc.event_task = Some(tokio::spawn(event_loop(
            event_rx,
            inner.state_tx.clone(),
            address,
        )));
        lc.death_watch = Some(tokio::spawn(death_watch(Arc::clone(&self.inner))));
        lc.session = Some(session);

        Ok(service)
    }

    /// Shutdown path. Errors are logged, never propagated; the state
    /// always reaches `Stopped`.
    async fn stop_locked(&self, lc: &mut MutexGuard<'_, Lifecycle>) {
        self.set_state(TorState::Stopping);

        // The death watch holds the signal receiver while it waits;
        // abort it before draining worker signals ourselves.
        if let Some(task) = lc.death_watch.take() {
            task.abort();
        }
        if let Some(task) = lc.event_task.take() {
            task.abort();
        }

        if let Some(mut session) = lc.session.take() {
            if let Some(service) = lc.service.take() {
                match timeout(DEL_ONION_TIMEOUT, session.del_onion(service.service_id())).await {
                    Ok(Ok(())) => debug!("Removed hidden service {}", service.address),
                    Ok(Err(e)) => debug!("DEL_ONION failed during shutdown: {}", e),
                    Err(_) => debug!("DEL_ONION timed out during shutdown"),
                }
            }
            session.close();
        }
        lc.service = None;

        lc.transport.stop().await;

        if self.inner.worker_cmds.send(WorkerCommand::Stop).await.is_ok() {
            self.await_worker_stopped().await;
        }

        self.set_state(TorState::Stopped);
    }

    async fn await_worker_ready(&self) -> Result<(), StartError> {
        let mut signals = self.inner.worker_signals.lock().await;
        let wait = timeout(self.inner.timeouts.worker_startup(), async {
            loop {
                match signals.recv().await {
                    Some(WorkerSignal::Ready) => return Ok(()),
                    Some(WorkerSignal::Failed(msg)) => {
                        return Err(StartError::WorkerStartup(msg))
                    },
                    // Stale confirmation from an earlier stop
                    Some(WorkerSignal::Stopped) => continue,
                    None => {
                        return Err(StartError::WorkerStartup(
                            "worker signal channel closed".to_string(),
                        ))
                    },
                }
            }
        })
        .await;

        match wait {
            Ok(result) => result,
            Err(_) => Err(StartError::StartupTimeout),
        }
    }

    async fn await_worker_stopped(&self) {
        let mut signals = self.inner.worker_signals.lock().await;
        let wait = timeout(self.inner.timeouts.worker_stop(), async {
            loop {
                match signals.recv().await {
                    Some(WorkerSignal::Stopped) | None => return,
                    Some(other) => debug!("Ignoring worker signal during stop: {:?}", other),
                }
            }
        })
        .await;

        if wait.is_err() {
            warn!("Timed out waiting for worker stopped confirmation");
        }
    }

    fn set_state(&self, state: TorState) {
        let _ = self.inner.state_tx.send(state);
    }
}

fn config_rejected(e: ControlError) -> StartError {
    match e {
        ControlError::CommandFailed { code, msg } => {
            StartError::ConfigurationRejected(format!("{}: {}", code, msg))
        },
        other => StartError::Connection(other),
    }
}

/// Weighted overall progress from a raw bootstrap percentage
fn weighted_progress(percent: u8) -> u8 {
    (f64::from(percent) * BOOTSTRAP_WEIGHT).round() as u8
}

/// Folds parsed notices into state transitions.
///
/// Bootstrap percentages contribute `round(p * 0.7)` until the first
/// upload attempt for the active address, which pins progress at 90.
/// The first acknowledged upload flips the state to `Started`; the
/// service is considered reachable from then on and later uploads are
/// ignored.
struct ProgressTracker {
    /// Full onion address of the active service
    address: String,
    upload_seen: bool,
    started: bool,
}

impl ProgressTracker {
    fn new(address: String) -> Self {
        Self {
            address,
            upload_seen: false,
            started: false,
        }
    }

    fn matches(&self, event_address: &str) -> bool {
        self.address.trim_end_matches(".onion") == event_address
    }

    fn apply(&mut self, event: &TorEvent) -> Option<TorState> {
        if self.started {
            return None;
        }
        match event {
            TorEvent::BootstrapProgress(percent) if !self.upload_seen => {
                Some(TorState::Starting {
                    progress: weighted_progress(*percent),
                    onion_address: Some(self.address.clone()),
                })
            },
            TorEvent::DescriptorUpload { address }
                if !self.upload_seen && self.matches(address) =>
            {
                self.upload_seen = true;
                Some(TorState::Starting {
                    progress: UPLOAD_CHECKPOINT,
                    onion_address: Some(self.address.clone()),
                })
            },
            TorEvent::DescriptorUploaded { address } if self.matches(address) => {
                self.started = true;
                Some(TorState::Started {
                    onion_address: self.address.clone(),
                })
            },
            _ => None,
        }
    }
}

async fn event_loop(
    mut events_rx: mpsc::UnboundedReceiver<ControlEvent>,
    state_tx: watch::Sender<TorState>,
    address: String,
) {
    let mut tracker = ProgressTracker::new(address);

    while let Some(raw) = events_rx.recv().await {
        let event = events::parse(&raw);
        match &event {
            TorEvent::Other { keyword } => {
                debug!("tor notice [{}] {}", keyword, raw.payload);
            },
            parsed => debug!("tor event: {:?}", parsed),
        }
        if let Some(next) = tracker.apply(&event) {
            if state_tx.send(next).is_err() {
                break;
            }
        }
    }
}

/// Watches for unsolicited worker death while a session is active.
///
/// The daemon dying under us is modeled as `Stopping -> Stopped` so
/// the coordinator can cascade a web server shutdown instead of being
/// left with a stale `Started`.
async fn death_watch(inner: Arc<Inner>) {
    let signal = {
        let mut signals = inner.worker_signals.lock().await;
        signals.recv().await
    };

    match signal {
        Some(WorkerSignal::Stopped) | Some(WorkerSignal::Failed(_)) | None => {
            if inner.state_tx.borrow().is_stopped() {
                return;
            }
            warn!("Tor worker exited unexpectedly; tearing session down");
            let _ = inner.state_tx.send(TorState::Stopping);

            let mut lc = inner.lifecycle.lock().await;
            if let Some(task) = lc.event_task.take() {
                task.abort();
            }
            if let Some(mut session) = lc.session.take() {
                session.close();
            }
            lc.service = None;
            lc.transport.stop().await;
            lc.death_watch = None;

            let _ = inner.state_tx.send(TorState::Stopped);
        },
        Some(WorkerSignal::Ready) => {
            // A second readiness signal carries no new information
            debug!("Ignoring duplicate worker readiness signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_progress_is_weighted() {
        for percent in 0..=100u8 {
            let expected = (f64::from(percent) * 0.7).round() as u8;
            assert_eq!(weighted_progress(percent), expected);
        }
        assert_eq!(weighted_progress(50), 35);
        assert_eq!(weighted_progress(100), 70);
    }

    #[test]
    fn tracker_follows_bootstrap_then_upload_then_ack() {
        let mut tracker = ProgressTracker::new("abc123.onion".to_string());

        assert_eq!(
            tracker.apply(&TorEvent::BootstrapProgress(50)),
            Some(TorState::Starting {
                progress: 35,
                onion_address: Some("abc123.onion".to_string()),
            })
        );

        assert_eq!(
            tracker.apply(&TorEvent::DescriptorUpload {
                address: "abc123".to_string()
            }),
            Some(TorState::Starting {
                progress: 90,
                onion_address: Some("abc123.onion".to_string()),
            })
        );

        // Bootstrap notices no longer lower progress once uploading
        assert_eq!(tracker.apply(&TorEvent::BootstrapProgress(80)), None);

        assert_eq!(
            tracker.apply(&TorEvent::DescriptorUploaded {
                address: "abc123".to_string()
            }),
            Some(TorState::Started {
                onion_address: "abc123.onion".to_string(),
            })
        );

        // Service already reachable; further uploads are no-ops
        assert_eq!(
            tracker.apply(&TorEvent::DescriptorUpload {
                address: "abc123".to_string()
            }),
            None
        );
        assert_eq!(
            tracker.apply(&TorEvent::DescriptorUploaded {
                address: "abc123".to_string()
            }),
            None
        );
    }

    #[test]
    fn tracker_ignores_foreign_addresses() {
        let mut tracker = ProgressTracker::new("abc123.onion".to_string());
        assert_eq!(
            tracker.apply(&TorEvent::DescriptorUpload {
                address: "someoneelse".to_string()
            }),
            None
        );
        assert_eq!(
            tracker.apply(&TorEvent::DescriptorUploaded {
                address: "someoneelse".to_string()
            }),
            None
        );
    }

    #[test]
    fn upload_ack_can_arrive_without_prior_upload_notice() {
        let mut tracker = ProgressTracker::new("abc123.onion".to_string());
        assert_eq!(
            tracker.apply(&TorEvent::DescriptorUploaded {
                address: "abc123".to_string()
            }),
            Some(TorState::Started {
                onion_address: "abc123.onion".to_string(),
            })
        );
    }
}
