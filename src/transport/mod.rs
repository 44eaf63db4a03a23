//! Pluggable transport client
//!
//! Starts and stops the local client process for a domain-fronted
//! bridge. The daemon is pointed at the client's SOCKS port through
//! SETCONF, so from Tor's perspective the bridge traffic looks like
//! ordinary HTTPS to the front domain. Failure to start the client is
//! non-fatal: the caller logs it and proceeds without the bridge.

use crate::config::TransportConfig;
use std::io;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Handle to the pluggable transport client process
pub struct TransportClient {
    config: TransportConfig,
    child: Option<Child>,
}

impl TransportClient {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            child: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Launch the client process. Fire-and-forget: the process is not
    /// health-checked beyond having spawned.
    pub fn start(&mut self) -> io::Result<()> {
        if !self.config.enabled || self.child.is_some() {
            return Ok(());
        }

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg("--url")
            .arg(&self.config.url)
            .arg("--front")
            .arg(&self.config.front)
            .arg("--port")
            .arg(self.config.local_port.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn()?;
        info!(
            "Pluggable transport client {} listening on 127.0.0.1:{}",
            self.config.command, self.config.local_port
        );
        self.child = Some(child);
        Ok(())
    }

    /// Kill and reap the client process. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!("Stopping pluggable transport client");
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill transport client: {}", e);
            }
            let _ = child.wait().await;
        }
    }

    /// SETCONF entries wiring the daemon to this client's SOCKS port
    /// and enabling bridge use.
    pub fn bridge_conf(&self) -> Vec<(String, String)> {
        vec![
            (
                "ClientTransportPlugin".to_string(),
                format!("{} socks5 127.0.0.1:{}", self.config.name, self.config.local_port),
            ),
            ("UseBridges".to_string(), "1".to_string()),
            (
                "Bridge".to_string(),
                format!(
                    "{} {} {} url={} front={}",
                    self.config.name,
                    self.config.bridge_addr,
                    self.config.bridge_fingerprint,
                    self.config.url,
                    self.config.front
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_conf_wires_local_port() {
        let client = TransportClient::new(TransportConfig {
            local_port: 41058,
            ..TransportConfig::default()
        });
        let conf = client.bridge_conf();

        assert_eq!(
            conf[0],
            (
                "ClientTransportPlugin".to_string(),
                "meek_lite socks5 127.0.0.1:41058".to_string()
            )
        );
        assert_eq!(conf[1], ("UseBridges".to_string(), "1".to_string()));
        let bridge = &conf[2].1;
        assert!(bridge.starts_with("meek_lite 0.0.2.0:3 "));
        assert!(bridge.contains("front=cdn.sstatic.net"));
    }

    #[test]
    fn disabled_transport_never_spawns() {
        let mut client = TransportClient::new(TransportConfig {
            enabled: false,
            command: "definitely-not-a-binary".to_string(),
            ..TransportConfig::default()
        });
        assert!(client.start().is_ok());
        assert!(client.child.is_none());
    }
}
