//! # vault-common
//!
//! Common types, errors, and constants for the vaultd device driver.
//!
//! This crate provides the foundational types used across all vaultd
//! components. It includes:
//!
//! - **Types**: the flash [`Address`](types::Address) locator, flash
//!   geometry, device status, and the device parameter enumeration
//! - **Errors**: unified error handling with [`VaultError`]
//! - **Constants**: wire and flash layout constants
//!
//! ## Example
//!
//! ```rust
//! use vault_common::types::Address;
//! use vault_common::error::VaultResult;
//!
//! fn example() -> VaultResult<()> {
//!     let addr = Address::from_page_and_slot(128, 0);
//!     assert!(addr.is_valid());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{ErrorCode, VaultError, VaultResult};
pub use types::{Address, DeviceStatus, FlashLayout, KnockSensitivity, Param, VirtualAddr};
