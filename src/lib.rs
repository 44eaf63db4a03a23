//! oniondrop - anonymous single-use file sharing over Tor
//!
//! Exposes a file through an ephemeral onion service that lives for
//! exactly one download. The crate drives an external Tor daemon over
//! its control port, optionally routes it through a domain-fronted
//! pluggable transport, and runs an embedded web server whose
//! lifecycle is tied to the hidden service.
//!
//! # Modules
//!
//! - [`config`] - Configuration loading with TOML
//! - [`state`] - Shared lifecycle state and descriptor types
//! - [`tor`] - Control port client, event parsing, orchestration
//! - [`transport`] - Pluggable transport client process
//! - [`web`] - Embedded share/download web server
//! - [`session`] - Composition of the two lifecycles
//! - [`util`] - Randomization helpers

pub mod config;
pub mod logging;
pub mod session;
pub mod state;
pub mod tor;
pub mod transport;
pub mod util;
pub mod web;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
