//! oniondrop binary
//!
//! Shares a single file through an ephemeral onion service and exits
//! once the one permitted download completes, tor goes away, or the
//! user interrupts.

use anyhow::{Context, Result};
use clap::Parser;
use oniondrop::config::{self, Config};
use oniondrop::session::{SessionCoordinator, SessionOutcome};
use oniondrop::state::ShareDescriptor;
use oniondrop::tor::{TorOrchestrator, TorProcessWorker};
use oniondrop::web::WebServer;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "oniondrop", version, about = "Share a file anonymously over Tor")]
struct Cli {
    /// File to share
    file: PathBuf,

    /// Configuration file (defaults are searched when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local port for the embedded web server
    #[arg(long)]
    port: Option<u16>,

    /// Connect to Tor directly instead of through the bridge
    #[arg(long)]
    no_bridge: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    oniondrop::logging::init(cli.verbose);

    let mut config = config::load_or_default(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.web.listen_port = port;
    }
    if cli.no_bridge {
        config.transport.enabled = false;
    }

    let share = ShareDescriptor::from_path(&cli.file).await?;
    info!("Sharing {} ({})", share.file_name, share.size_display());

    run(config, share).await
}

async fn run(mut config: Config, share: ShareDescriptor) -> Result<()> {
    // The worker owns its own tor daemon; authentication goes through
    // the cookie file that daemon writes.
    let (worker, cookie_path) = TorProcessWorker::launch(&config.tor);
    config.tor.cookie_path = Some(
        cookie_path
            .to_str()
            .context("Runtime directory path is not valid UTF-8")?
            .to_string(),
    );

    let web = WebServer::new(config.web.clone(), config.timeouts.clone());
    let local_addr = web.start(share).await?;

    let tor = TorOrchestrator::new(
        config.tor.clone(),
        config.transport.clone(),
        config.timeouts.clone(),
        local_addr.port(),
        worker,
    );

    let mut coordinator = SessionCoordinator::new(tor.clone(), web.clone());
    if let Err(e) = tor.start().await {
        coordinator.shutdown().await;
        return Err(e).context("Could not bring the hidden service up");
    }

    let url = match coordinator.wait_ready().await {
        Ok(url) => url,
        Err(e) => {
            coordinator.shutdown().await;
            return Err(e);
        },
    };
    info!("Share is live: {}", url);
    println!("{}", url);
    println!("Give this address to the recipient. It works exactly once.");

    tokio::select! {
        outcome = coordinator.wait_finished() => match outcome? {
            SessionOutcome::DownloadComplete => {
                info!("Download complete; share is closed");
            },
            SessionOutcome::TorExited => {
                warn!("Tor exited; share is closed");
            },
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; shutting down");
        },
    }

    coordinator.shutdown().await;
    Ok(())
}
