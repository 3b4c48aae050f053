//! Core types for the vaultd driver.

mod address;
mod params;
mod status;

pub use address::{Address, FlashLayout, VirtualAddr};
pub use params::{KnockSensitivity, Param};
pub use status::DeviceStatus;
