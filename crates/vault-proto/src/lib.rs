//! # vault-proto
//!
//! Wire protocol for the vaultd device: the fixed command enumeration, the
//! 64-byte packet codec, and the version-reply parser.
//!
//! Every exchange with the device is a 64-byte frame:
//! byte 0 is the payload length, byte 1 the command code, bytes 2.. the
//! payload. Remaining bytes are don't-care.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod command;
mod packet;
mod version;

pub use command::CommandId;
pub use packet::{Frame, Packet};
pub use version::VersionInfo;
