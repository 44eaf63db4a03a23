//! Shared lifecycle state
//!
//! Tagged state unions for the two lifecycles plus the descriptor
//! types exchanged between them. State is published through
//! `tokio::sync::watch`: single writer, any number of readers, readers
//! always see the latest value.

pub mod model;

pub use model::{HiddenServiceDescriptor, ShareDescriptor, TorState, WebServerState};
