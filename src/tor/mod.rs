//! Tor daemon interaction
//!
//! Control port client, asynchronous notice parsing, the worker
//! process boundary, and the orchestrator that sequences them. The
//! daemon itself is treated as a black box behind the worker channel.

pub mod control;
pub mod events;
pub mod orchestrator;
pub mod worker;

pub use control::{ControlError, ControlEvent, ControlSession};
pub use events::TorEvent;
pub use orchestrator::{StartError, TorOrchestrator};
pub use worker::{TorProcessWorker, WorkerChannel, WorkerCommand, WorkerSignal};
