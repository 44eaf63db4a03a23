//! Share session coordination
//!
//! Ties the two state machines together: the web server comes up
//! first so the hidden service has a live target, then the Tor side
//! is started. The coordinator only reads the two watch channels; it
//! never mutates either state machine directly except by calling the
//! public `stop` paths.

use crate::state::{TorState, WebServerState};
use crate::tor::TorOrchestrator;
use crate::web::WebServer;
use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

/// How a running share session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The single download finished and the web server wound down
    DownloadComplete,
    /// Tor went away while the share was live
    TorExited,
}

/// Observes a running share session through the two state channels.
pub struct SessionCoordinator {
    tor: TorOrchestrator,
    web: WebServer,
    tor_rx: watch::Receiver<TorState>,
    web_rx: watch::Receiver<WebServerState>,
}

impl SessionCoordinator {
    pub fn new(tor: TorOrchestrator, web: WebServer) -> Self {
        let tor_rx = tor.subscribe();
        let web_rx = web.subscribe();
        Self {
            tor,
            web,
            tor_rx,
            web_rx,
        }
    }

    /// Wait until both sides report `Started` and return the public
    /// URL. Bootstrap progress is logged along the way.
    pub async fn wait_ready(&mut self) -> Result<String> {
        self.web_rx
            .wait_for(|s| matches!(s, WebServerState::Started))
            .await
            .context("Web server stopped before becoming ready")?;

        let mut last_progress = None;
        loop {
            match &*self.tor_rx.borrow_and_update() {
                TorState::Started { onion_address } => {
                    return Ok(format!("http://{}", onion_address));
                },
                TorState::Starting { progress, .. } => {
                    if last_progress != Some(*progress) {
                        info!("Connecting to the Tor network: {}%", progress);
                        last_progress = Some(*progress);
                    }
                },
                TorState::Stopped | TorState::Stopping => {
                    anyhow::bail!("Tor stopped before the service became reachable");
                },
            }
            self.tor_rx
                .changed()
                .await
                .context("Tor state channel closed")?;
        }
    }

    /// Block until the session ends on its own.
    ///
    /// A finished download resolves once the web server reaches its
    /// terminal state. Tor dying while the share is live cascades a
    /// web server stop before resolving, so the share address and the
    /// local listener go away together.
    pub async fn wait_finished(&mut self) -> Result<SessionOutcome> {
        loop {
            tokio::select! {
                changed = self.web_rx.changed() => {
                    changed.context("Web state channel closed")?;
                    let state = *self.web_rx.borrow_and_update();
                    if let WebServerState::Stopped { download_complete: true } = state {
                        return Ok(SessionOutcome::DownloadComplete);
                    }
                },
                changed = self.tor_rx.changed() => {
                    changed.context("Tor state channel closed")?;
                    let exited = matches!(
                        *self.tor_rx.borrow_and_update(),
                        TorState::Stopping | TorState::Stopped
                    );
                    if exited {
                        warn!("Tor session ended while the share was live");
                        self.web.stop(false).await;
                        return Ok(SessionOutcome::TorExited);
                    }
                },
            }
        }
    }

    /// Orderly teardown of whatever is still running.
    pub async fn shutdown(&self) {
        self.web.stop(false).await;
        self.tor.stop().await;
    }
}
