//! # vault-engine
//!
//! The protocol engine driving one vaultd device: a command queue that
//! guarantees at-most-one outstanding packet, a job engine multiplexing
//! composite requests, the periodic status poller, typed parameter I/O,
//! the two flash scanners, and the high-level credential/data/MMM
//! operations.
//!
//! The engine is single-threaded and cooperative. The host owns a
//! [`VaultEngine`], feeds inbound frames by calling
//! [`VaultEngine::pump`], and drives the 500 ms status timer through
//! [`VaultEngine::tick`]. All completion callbacks run on the calling
//! thread, between event turns.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod engine;
mod jobs;
mod ops;
mod params;
mod poller;
mod queue;
mod scan;
mod state;

pub use engine::VaultEngine;
pub use jobs::{Job, JobCtx, JobEngine, SubCommand};
pub use ops::Credential;
pub use queue::{CommandOrigin, CommandQueue, Dispatch};
pub use state::{DeviceParams, DeviceState, EngineCore, ProgressFn};
