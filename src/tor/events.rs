//! Asynchronous notice parsing
//!
//! Turns raw (keyword, payload) pairs from the control port into the
//! small set of events the orchestrator acts on. Everything else is
//! `Other` and only logged.

use super::control::ControlEvent;

/// A parsed daemon notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorEvent {
    /// Client bootstrap progress, 0..=100
    BootstrapProgress(u8),
    /// A descriptor upload attempt has begun for this service
    DescriptorUpload { address: String },
    /// A directory server acknowledged the descriptor upload
    DescriptorUploaded { address: String },
    /// Subscribed but not acted upon
    Other { keyword: String },
}

/// Parse one asynchronous notice
pub fn parse(event: &ControlEvent) -> TorEvent {
    match event.keyword.as_str() {
        "STATUS_CLIENT" => parse_status_client(&event.payload),
        "HS_DESC" => parse_hs_desc(&event.payload),
        _ => TorEvent::Other {
            keyword: event.keyword.clone(),
        },
    }
}

/// `NOTICE BOOTSTRAP PROGRESS=<p> TAG=<t> SUMMARY=<s>`
fn parse_status_client(payload: &str) -> TorEvent {
    let mut tokens = payload.split_whitespace();
    let severity = tokens.next();
    let action = tokens.next();
    if severity != Some("NOTICE") || action != Some("BOOTSTRAP") {
        return other("STATUS_CLIENT");
    }

    for token in tokens {
        if let Some(value) = token.strip_prefix("PROGRESS=") {
            if let Ok(percent) = value.parse::<u8>() {
                if percent <= 100 {
                    return TorEvent::BootstrapProgress(percent);
                }
            }
            return other("STATUS_CLIENT");
        }
    }
    other("STATUS_CLIENT")
}

/// `UPLOAD <address> ...` / `UPLOADED <address> ...`
fn parse_hs_desc(payload: &str) -> TorEvent {
    let mut tokens = payload.split_whitespace();
    let action = tokens.next();
    let address = tokens.next();

    match (action, address) {
        (Some("UPLOAD"), Some(addr)) => TorEvent::DescriptorUpload {
            address: normalize(addr),
        },
        (Some("UPLOADED"), Some(addr)) => TorEvent::DescriptorUploaded {
            address: normalize(addr),
        },
        _ => other("HS_DESC"),
    }
}

/// Addresses in HS_DESC notices come without the .onion suffix
fn normalize(address: &str) -> String {
    address.trim_end_matches(".onion").to_string()
}

fn other(keyword: &str) -> TorEvent {
    TorEvent::Other {
        keyword: keyword.to_string(),
    }
}
