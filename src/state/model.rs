//! Lifecycle state and descriptor types

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Tor orchestration state. Mutated only by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorState {
    Stopped,
    Starting {
        /// Weighted progress, 0..=100
        progress: u8,
        /// Set once the ephemeral service has been created
        onion_address: Option<String>,
    },
    Started {
        onion_address: String,
    },
    Stopping,
}

impl TorState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, TorState::Stopped)
    }

    /// Onion address, if one is live. Exists iff the state is
    /// `Starting` with an address or `Started`.
    pub fn onion_address(&self) -> Option<&str> {
        match self {
            TorState::Starting {
                onion_address: Some(addr),
                ..
            } => Some(addr),
            TorState::Started { onion_address } => Some(onion_address),
            _ => None,
        }
    }
}

/// Web server lifecycle state. Mutated only by the web server.
///
/// `download_complete` threads through `Stopping` into the terminal
/// `Stopped` so observers can tell a finished download from an abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebServerState {
    Starting,
    Started,
    Stopping { download_complete: bool },
    Stopped { download_complete: bool },
}

/// A live ephemeral hidden service.
///
/// Exists iff `TorState` is `Starting` with an address or `Started`;
/// invalidated on stop. The private key is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenServiceDescriptor {
    /// Full onion address, with the `.onion` suffix
    pub address: String,
    /// Local port the service's port 80 maps to
    pub target_port: u16,
}

impl HiddenServiceDescriptor {
    /// Service ID as Tor reports it, without the `.onion` suffix
    pub fn service_id(&self) -> &str {
        self.address.trim_end_matches(".onion")
    }
}

/// Metadata for the artifact being shared
#[derive(Debug, Clone)]
pub struct ShareDescriptor {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

impl ShareDescriptor {
    /// Build a descriptor from an existing file on disk
    pub async fn from_path(path: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Cannot read file to share: {}", path.display()))?;
        if !meta.is_file() {
            anyhow::bail!("Not a regular file: {}", path.display());
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("File name is not valid UTF-8")?
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            size_bytes: meta.len(),
        })
    }

    /// Human-readable size for the share page
    pub fn size_display(&self) -> String {
        const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
        let mut size = self.size_bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} {}", self.size_bytes, UNITS[0])
        } else {
            format!("{:.1} {}", size, UNITS[unit])
        }
    }
}
