//! # vault-transport
//!
//! Transport abstraction between the protocol engine and whatever moves
//! 64-byte frames to the physical device (USB HID in production, an
//! emulator in tests).
//!
//! The engine is single-threaded and cooperative: `send` never blocks and
//! `recv` is a non-blocking poll. Reassembly of partial USB reads into
//! whole frames is the transport implementation's concern; every frame is
//! delivered exactly once, in order.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod memory;

pub use memory::LoopbackTransport;

use thiserror::Error;
use vault_proto::Frame;

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors the transport layer can report.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The underlying device link is gone.
    #[error("transport is closed")]
    Closed,
    /// A frame could not be written to the device.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of the failure.
        reason: String,
    },
}

/// Moves 64-byte frames between the engine and the device.
pub trait Transport {
    /// Enqueues one outbound frame.
    fn send(&mut self, frame: Frame) -> TransportResult<()>;

    /// Returns the next inbound frame, if one has arrived.
    fn recv(&mut self) -> Option<Frame>;
}
