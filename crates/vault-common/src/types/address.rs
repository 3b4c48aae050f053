//! Flash address types and geometry.
//!
//! A flash address is a 2-byte little-endian locator: the upper 13 bits
//! select a page, the lower 3 bits select a node slot within the page.
//! `0x0000` is the `EMPTY` sentinel terminating every linked chain.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Flash node locator.
///
/// # Example
///
/// ```rust
/// use vault_common::types::Address;
///
/// let addr = Address::from_page_and_slot(128, 1);
/// assert_eq!(addr.page(), 128);
/// assert_eq!(addr.slot(), 1);
/// assert_eq!(addr.to_bytes(), [0x01, 0x04]);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Address(u16);

impl Address {
    /// The empty sentinel address terminating linked chains.
    pub const EMPTY: Self = Self(0);

    /// Creates an address from its raw u16 value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Creates an address from a page number and an in-page node slot.
    #[inline]
    #[must_use]
    pub const fn from_page_and_slot(page: u16, slot: u8) -> Self {
        Self((page << 3) | (slot as u16 & 0x07))
    }

    /// Returns the raw u16 value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the page this address points into.
    #[inline]
    #[must_use]
    pub const fn page(self) -> u16 {
        self.0 >> 3
    }

    /// Returns the node slot within the page.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> u8 {
        (self.0 & 0x07) as u8
    }

    /// Checks whether this address is non-empty.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Decodes an address from its 2-byte little-endian wire form.
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }

    /// Encodes the address to its 2-byte little-endian wire form.
    #[inline]
    #[must_use]
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::EMPTY {
            write!(f, "Address(EMPTY)")
        } else {
            write!(f, "Address(page {}, slot {})", self.page(), self.slot())
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Transient identifier for a node minted in host memory before a free
/// flash slot has been assigned to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct VirtualAddr(u32);

impl VirtualAddr {
    /// Creates a virtual address from a raw counter value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Flash geometry derived from the device's reported flash size.
///
/// The first pages of flash hold graphics assets and are never scanned;
/// the first node address depends on the flash size the device reports in
/// its version reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLayout {
    flash_mb: u8,
}

impl FlashLayout {
    /// Creates the layout for a device reporting `flash_mb` megabits.
    #[inline]
    #[must_use]
    pub const fn new(flash_mb: u8) -> Self {
        Self { flash_mb }
    }

    /// Flash size in megabits as reported by the device.
    #[inline]
    #[must_use]
    pub const fn flash_mb(self) -> u8 {
        self.flash_mb
    }

    /// Number of node slots per flash page.
    #[must_use]
    pub const fn nodes_per_page(self) -> u8 {
        match self.flash_mb {
            16 => 4,
            _ => 2,
        }
    }

    /// Total number of flash pages.
    #[must_use]
    pub const fn page_count(self) -> u16 {
        match self.flash_mb {
            16 => 256 * self.flash_mb as u16,
            _ => 512 * self.flash_mb as u16,
        }
    }

    /// First node address past the graphics zone.
    #[must_use]
    pub const fn first_node_addr(self) -> Address {
        match self.flash_mb {
            1 | 2 | 32 => Address::from_page_and_slot(128, 0),
            _ => Address::from_page_and_slot(256, 0),
        }
    }

    /// Next node slot after `addr` in raw scan order, or `None` past the
    /// end of flash.
    ///
    /// The 13-bit page field also caps what a pointer can reach: on 32 Mb
    /// parts the flash has more pages than the address format can name,
    /// and the walk stops at the addressable boundary.
    #[must_use]
    pub fn next_node_addr(self, addr: Address) -> Option<Address> {
        let mut slot = addr.slot() + 1;
        let mut page = addr.page();
        if slot == self.nodes_per_page() {
            slot = 0;
            page += 1;
        }
        if page >= self.page_count() || page > 0x1FFF {
            None
        } else {
            Some(Address::from_page_and_slot(page, slot))
        }
    }
}
