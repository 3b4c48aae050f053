//! Device status reporting.

use serde::{Deserialize, Serialize};

/// Status of the device as reported by the periodic status probe.
///
/// The status byte is a bitfield (card present, screen state, smartcard
/// unlocked); only the handful of combinations the device actually emits
/// are given names, everything else maps to `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// No status received yet, or an unrecognized status byte.
    #[default]
    Unknown,
    /// No smartcard inserted.
    NoCard,
    /// Card inserted, device locked.
    Locked,
    /// Card inserted, unlock screen showing.
    LockScreen,
    /// Card inserted and unlocked.
    Unlocked,
    /// Inserted card is not known to the device.
    UnknownSmartcard,
}

impl DeviceStatus {
    /// Decodes the status byte of a status reply.
    #[must_use]
    pub fn from_byte(b: u8) -> Self {
        match b {
            0b0000 => Self::NoCard,
            0b0001 => Self::Locked,
            0b0011 => Self::LockScreen,
            0b0101 => Self::Unlocked,
            0b1001 => Self::UnknownSmartcard,
            _ => Self::Unknown,
        }
    }

    /// True when credentials can be queried without unlocking first.
    #[inline]
    #[must_use]
    pub const fn is_unlocked(self) -> bool {
        matches!(self, Self::Unlocked)
    }
}
