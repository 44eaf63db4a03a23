//! Configuration file loading

use super::Config;
use anyhow::{Context, Result};
use std::path::Path;

/// Default config file locations
const CONFIG_PATHS: &[&str] = &["./oniondrop.toml", "/etc/oniondrop/config.toml"];

/// Load configuration from an explicit path, or the first well-known
/// location that exists, or built-in defaults when none is present.
pub fn load_or_default(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return load_from_path(path);
    }

    for path in CONFIG_PATHS {
        let path = Path::new(path);
        if path.exists() {
            return load_from_path(path);
        }
    }

    Ok(Config::default())
}

/// Load and parse config from path
pub fn load_from_path(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file_exists() {
        let config = load_or_default(None).expect("defaults load");
        assert_eq!(config.tor.control_host, "127.0.0.1");
        assert_eq!(config.timeouts.web_stop_grace_ms, 500);
        assert!(config.transport.enabled);
    }

    #[test]
    fn parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[tor]\ncontrol_port = 9051\n\n[transport]\nenabled = false\n",
        )
        .unwrap();

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.tor.control_port, 9051);
        assert!(!config.transport.enabled);
        // Unset sections fall back to defaults
        assert_eq!(config.web.listen_port, 17621);
    }

    #[test]
    fn rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tor]\ncontrol_prot = 9051\n").unwrap();

        assert!(load_from_path(&path).is_err());
    }
}
