//! Embedded share web server
//!
//! One listener per share session. The lifecycle state is published
//! as the listener actually starts and stops, not when the calls
//! return. A completed download triggers `stop(true)` from a monitor
//! task; shutdown honors in-flight work for a grace period that is
//! short for a plain stop and generous when a transfer is finishing.

mod body;
mod pages;
mod routes;

use crate::config::{TimeoutConfig, WebConfig};
use crate::state::{ShareDescriptor, WebServerState};
use anyhow::{Context, Result};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use routes::RouterContext;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Carried from `stop` into `Stopping` and the terminal `Stopped`
#[derive(Debug, Clone, Copy)]
struct StopRequest {
    download_complete: bool,
}

struct WebInner {
    config: WebConfig,
    timeouts: TimeoutConfig,
    state_tx: watch::Sender<WebServerState>,
    stop_tx: Mutex<Option<oneshot::Sender<StopRequest>>>,
}

/// Web server lifecycle handle. Cheap to clone.
#[derive(Clone)]
pub struct WebServer {
    inner: Arc<WebInner>,
}

impl WebServer {
    pub fn new(config: WebConfig, timeouts: TimeoutConfig) -> Self {
        let (state_tx, _) = watch::channel(WebServerState::Stopped {
            download_complete: false,
        });
        Self {
            inner: Arc::new(WebInner {
                config,
                timeouts,
                state_tx,
                stop_tx: Mutex::new(None),
            }),
        }
    }

    /// Observe state transitions. Readers always see the latest value.
    pub fn subscribe(&self) -> watch::Receiver<WebServerState> {
        self.inner.state_tx.subscribe()
    }

    /// Bind the listener and start serving the share.
    ///
    /// Static assets live below a fresh random 128-bit URL-safe path
    /// segment, so asset paths cannot be enumerated. Returns the
    /// actually bound address (the configured port may be 0).
    pub async fn start(&self, share: ShareDescriptor) -> Result<SocketAddr> {
        let mut stop_slot = self.inner.stop_tx.lock().await;
        if stop_slot.is_some() {
            anyhow::bail!("web server is already running");
        }

        let _ = self.inner.state_tx.send(WebServerState::Starting);

        let addr = format!(
            "{}:{}",
            self.inner.config.listen_host, self.inner.config.listen_port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind web server on {}", addr))?;
        let local_addr = listener.local_addr().context("No local address")?;

        let static_prefix = crate::util::url_safe_token();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(RouterContext {
            share,
            static_prefix,
            download_done: done_tx,
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        *stop_slot = Some(stop_tx);
        drop(stop_slot);

        tokio::spawn(serve(
            listener,
            ctx,
            self.inner.state_tx.clone(),
            stop_rx,
            self.inner.timeouts.web_stop_grace(),
            self.inner.timeouts.web_download_grace(),
        ));
        tokio::spawn(download_monitor(done_rx, self.clone()));

        info!("Web server listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Request shutdown and wait for the terminal state.
    ///
    /// `is_finishing_download` selects the long grace period and is
    /// carried into `Stopping`/`Stopped` so observers can tell a clean
    /// finish from a forced stop. Idempotent: stopping a stopped or
    /// already-stopping server does nothing.
    pub async fn stop(&self, is_finishing_download: bool) {
        let sender = self.inner.stop_tx.lock().await.take();
        let Some(sender) = sender else {
            debug!("Web server stop requested but no listener is running");
            return;
        };
        let _ = sender.send(StopRequest {
            download_complete: is_finishing_download,
        });

        // Block until the listener has actually wound down
        let mut rx = self.inner.state_tx.subscribe();
        let _ = rx
            .wait_for(|state| matches!(state, WebServerState::Stopped { .. }))
            .await;
    }
}

/// Accept loop plus graceful wind-down. Publishes `Started` only once
/// the listener is live, and the `Stopping`/`Stopped` transitions as
/// they actually happen.
async fn serve(
    listener: TcpListener,
    ctx: Arc<RouterContext>,
    state_tx: watch::Sender<WebServerState>,
    mut stop_rx: oneshot::Receiver<StopRequest>,
    short_grace: Duration,
    long_grace: Duration,
) {
    let _ = state_tx.send(WebServerState::Started);
    let graceful = GracefulShutdown::new();

    let request = loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    },
                };
                let io = TokioIo::new(stream);
                let ctx = Arc::clone(&ctx);
                let service =
                    service_fn(move |req| routes::handle(req, Arc::clone(&ctx)));
                let conn = http1::Builder::new().serve_connection(io, service);
                let conn = graceful.watch(conn);
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        // Includes work rejected while shutting down;
                        // logged, never propagated
                        debug!("Connection error from {}: {}", peer, e);
                    }
                });
            },
            request = &mut stop_rx => {
                break request.unwrap_or(StopRequest { download_complete: false });
            },
        }
    };

    // No new work once stopping
    drop(listener);

    let download_complete = request.download_complete;
    let _ = state_tx.send(WebServerState::Stopping { download_complete });

    // An unbounded grace period would make the server never stop; the
    // long period is a generous but finite bound on transfer duration.
    let grace = if download_complete { long_grace } else { short_grace };
    match timeout(grace, graceful.shutdown()).await {
        Ok(()) => debug!("All connections drained"),
        Err(_) => warn!(
            "Grace period of {:?} elapsed with connections still active; rejecting remaining work",
            grace
        ),
    }

    let _ = state_tx.send(WebServerState::Stopped { download_complete });
    info!(
        "Web server stopped (download_complete = {})",
        download_complete
    );
}

/// Waits for the download body to finish, then stops the server from
/// a context separate from the connection that served the response.
async fn download_monitor(mut done_rx: mpsc::UnboundedReceiver<()>, server: WebServer) {
    if done_rx.recv().await.is_some() {
        info!("Download complete; shutting the share down");
        server.stop(true).await;
    }
}
