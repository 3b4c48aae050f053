//! Flash node records.
//!
//! Every node is a fixed 132-byte flash record, received and written as
//! three packets. The node type lives in bits 14..15 of the little-endian
//! flags word at offset 0; bit 13 set marks an erased/invalid record.
//!
//! Image layout by type (byte offsets):
//! - common: flags u16 @0
//! - parent (cred & data): prev u16 @2, next u16 @4, first_child u16 @6,
//!   service (zero-terminated UTF-8, max 121) @8
//! - cred child: prev_child u16 @2, next_child u16 @4, description (24)
//!   @6, date created (2) @30, date last used (2) @32, ctr (3) @34,
//!   login (63) @37, password ciphertext (32) @100
//! - data child: next_child u16 @2, opaque block (32) @4

use vault_common::types::{Address, VirtualAddr};
use vault_common::{
    CIPHERTEXT_SIZE, MAX_DESCRIPTION_LENGTH, MAX_LOGIN_LENGTH, MAX_SERVICE_LENGTH, NODE_CTR_SIZE,
    NODE_SIZE,
};

const FLAGS_INVALID_BIT: u16 = 0x2000;
const FLAGS_KIND_SHIFT: u16 = 14;

const OFF_PREV: usize = 2;
const OFF_NEXT: usize = 4;
const OFF_FIRST_CHILD: usize = 6;
const OFF_SERVICE: usize = 8;
const OFF_DESCRIPTION: usize = 6;
const OFF_DATE_CREATED: usize = 30;
const OFF_DATE_LAST_USED: usize = 32;
const OFF_CTR: usize = 34;
const OFF_LOGIN: usize = 37;
const OFF_PASSWORD: usize = 100;
const OFF_DATA_NEXT: usize = 2;
const OFF_DATA_BLOCK: usize = 4;

/// Node type tag, bits 14..15 of the flags word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    /// Credential parent (service).
    ParentCred = 0,
    /// Credential child (login + ciphertext).
    ChildCred = 1,
    /// Data-blob parent (service).
    ParentData = 2,
    /// Data-blob child (opaque block).
    ChildData = 3,
}

impl NodeKind {
    /// Decodes the tag bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::ParentCred,
            1 => Self::ChildCred,
            2 => Self::ParentData,
            _ => Self::ChildData,
        }
    }

    /// True for the two parent kinds.
    #[inline]
    #[must_use]
    pub const fn is_parent(self) -> bool {
        matches!(self, Self::ParentCred | Self::ParentData)
    }
}

/// A link to another node: a chain terminator, a physical flash address,
/// or a virtual id for a node not yet placed in flash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// Chain terminator.
    #[default]
    Empty,
    /// Physical flash address.
    Addr(Address),
    /// Node minted in memory, awaiting a free flash slot.
    Virtual(VirtualAddr),
}

impl NodeRef {
    /// Wraps an address, mapping `EMPTY` to the terminator.
    #[must_use]
    pub fn from_addr(addr: Address) -> Self {
        if addr.is_valid() {
            Self::Addr(addr)
        } else {
            Self::Empty
        }
    }

    /// True for the chain terminator.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The physical address, if this link has one.
    #[must_use]
    pub const fn addr(self) -> Option<Address> {
        match self {
            Self::Addr(a) => Some(a),
            _ => None,
        }
    }
}

/// One flash node: its raw 132-byte image plus placement metadata.
///
/// Pointer fields that reference not-yet-placed nodes carry a virtual
/// shadow; the image slot is only authoritative once
/// [`resolve_virtual_addresses`](crate::resolve_virtual_addresses) has run.
#[derive(Debug, Clone)]
pub struct Node {
    addr: NodeRef,
    raw: [u8; NODE_SIZE],
    virt_prev: Option<VirtualAddr>,
    virt_next: Option<VirtualAddr>,
    virt_first_child: Option<VirtualAddr>,
    tagged: bool,
}

impl Node {
    /// Wraps a fully received 132-byte image located at `addr`.
    #[must_use]
    pub fn from_image(addr: Address, raw: [u8; NODE_SIZE]) -> Self {
        Self {
            addr: NodeRef::from_addr(addr),
            raw,
            virt_prev: None,
            virt_next: None,
            virt_first_child: None,
            tagged: false,
        }
    }

    /// Creates a blank in-memory node of the given kind with a virtual
    /// address.
    #[must_use]
    pub fn minted(kind: NodeKind, virt: VirtualAddr) -> Self {
        let mut raw = [0u8; NODE_SIZE];
        let flags = (kind as u16) << FLAGS_KIND_SHIFT;
        raw[0..2].copy_from_slice(&flags.to_le_bytes());
        Self {
            addr: NodeRef::Virtual(virt),
            raw,
            virt_prev: None,
            virt_next: None,
            virt_first_child: None,
            tagged: false,
        }
    }

    /// The node's own link: physical address or virtual id.
    #[inline]
    #[must_use]
    pub const fn self_ref(&self) -> NodeRef {
        self.addr
    }

    /// Physical address, `EMPTY` while the node is virtual.
    #[must_use]
    pub fn addr(&self) -> Address {
        self.addr.addr().unwrap_or(Address::EMPTY)
    }

    /// Assigns the physical address of a previously virtual node.
    pub fn set_addr(&mut self, addr: Address) {
        self.addr = NodeRef::from_addr(addr);
    }

    /// Marks the node's own address as virtual (used by the repair
    /// self-test to simulate freshly minted nodes).
    pub fn set_virtual_addr(&mut self, virt: VirtualAddr) {
        self.addr = NodeRef::Virtual(virt);
    }

    /// Raw 132-byte image.
    #[inline]
    #[must_use]
    pub const fn image(&self) -> &[u8; NODE_SIZE] {
        &self.raw
    }

    /// Raw flags word.
    #[must_use]
    pub fn flags(&self) -> u16 {
        u16::from_le_bytes([self.raw[0], self.raw[1]])
    }

    /// True unless the erased/invalid bit is set.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.flags() & FLAGS_INVALID_BIT == 0
    }

    /// Node type tag.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        NodeKind::from_bits((self.flags() >> FLAGS_KIND_SHIFT) as u8)
    }

    /// Reachability tag used by the integrity checker.
    #[inline]
    #[must_use]
    pub const fn is_tagged(&self) -> bool {
        self.tagged
    }

    /// Sets the reachability tag.
    pub fn set_tagged(&mut self, tagged: bool) {
        self.tagged = tagged;
    }

    fn read_ptr(&self, offset: usize, shadow: Option<VirtualAddr>) -> NodeRef {
        if let Some(v) = shadow {
            return NodeRef::Virtual(v);
        }
        NodeRef::from_addr(Address::from_bytes([self.raw[offset], self.raw[offset + 1]]))
    }

    fn write_ptr(
        &mut self,
        offset: usize,
        value: NodeRef,
    ) -> Option<VirtualAddr> {
        match value {
            NodeRef::Empty => {
                self.raw[offset..offset + 2].copy_from_slice(&Address::EMPTY.to_bytes());
                None
            }
            NodeRef::Addr(a) => {
                self.raw[offset..offset + 2].copy_from_slice(&a.to_bytes());
                None
            }
            NodeRef::Virtual(v) => {
                self.raw[offset..offset + 2].copy_from_slice(&Address::EMPTY.to_bytes());
                Some(v)
            }
        }
    }

    fn next_offset(&self) -> usize {
        if self.kind() == NodeKind::ChildData {
            OFF_DATA_NEXT
        } else {
            OFF_NEXT
        }
    }

    /// Previous link (parent chain, or cred child chain).
    ///
    /// Data children are singly linked and have no previous pointer.
    #[must_use]
    pub fn prev_ref(&self) -> NodeRef {
        debug_assert!(self.kind() != NodeKind::ChildData);
        self.read_ptr(OFF_PREV, self.virt_prev)
    }

    /// Sets the previous link.
    pub fn set_prev_ref(&mut self, value: NodeRef) {
        debug_assert!(self.kind() != NodeKind::ChildData);
        self.virt_prev = self.write_ptr(OFF_PREV, value);
    }

    /// Next link (parent chain or child chain, depending on kind).
    #[must_use]
    pub fn next_ref(&self) -> NodeRef {
        self.read_ptr(self.next_offset(), self.virt_next)
    }

    /// Sets the next link.
    pub fn set_next_ref(&mut self, value: NodeRef) {
        let offset = self.next_offset();
        self.virt_next = self.write_ptr(offset, value);
    }

    /// First-child link of a parent node.
    #[must_use]
    pub fn first_child_ref(&self) -> NodeRef {
        debug_assert!(self.kind().is_parent());
        self.read_ptr(OFF_FIRST_CHILD, self.virt_first_child)
    }

    /// Sets the first-child link of a parent node.
    pub fn set_first_child_ref(&mut self, value: NodeRef) {
        debug_assert!(self.kind().is_parent());
        self.virt_first_child = self.write_ptr(OFF_FIRST_CHILD, value);
    }

    /// Unresolved virtual shadow for each pointer field, in
    /// (prev, next, first_child) order.
    #[must_use]
    pub fn virtual_shadows(
        &self,
    ) -> (Option<VirtualAddr>, Option<VirtualAddr>, Option<VirtualAddr>) {
        (self.virt_prev, self.virt_next, self.virt_first_child)
    }

    fn read_string(&self, offset: usize, max: usize) -> String {
        let region = &self.raw[offset..(offset + max).min(NODE_SIZE)];
        let end = region.iter().position(|&b| b == 0).unwrap_or(region.len());
        String::from_utf8_lossy(&region[..end]).into_owned()
    }

    fn write_string(&mut self, offset: usize, max: usize, value: &str) {
        let bytes = value.as_bytes();
        let len = bytes.len().min(max - 1);
        self.raw[offset..offset + len].copy_from_slice(&bytes[..len]);
        for b in &mut self.raw[offset + len..offset + max] {
            *b = 0;
        }
    }

    /// Service string of a parent node.
    #[must_use]
    pub fn service(&self) -> String {
        debug_assert!(self.kind().is_parent());
        self.read_string(OFF_SERVICE, MAX_SERVICE_LENGTH)
    }

    /// Sets the service string of a parent node.
    pub fn set_service(&mut self, service: &str) {
        debug_assert!(self.kind().is_parent());
        self.write_string(OFF_SERVICE, MAX_SERVICE_LENGTH, service);
    }

    /// Login string of a credential child.
    #[must_use]
    pub fn login(&self) -> String {
        debug_assert_eq!(self.kind(), NodeKind::ChildCred);
        self.read_string(OFF_LOGIN, MAX_LOGIN_LENGTH)
    }

    /// Sets the login string of a credential child.
    pub fn set_login(&mut self, login: &str) {
        debug_assert_eq!(self.kind(), NodeKind::ChildCred);
        self.write_string(OFF_LOGIN, MAX_LOGIN_LENGTH, login);
    }

    /// Description string of a credential child.
    #[must_use]
    pub fn description(&self) -> String {
        debug_assert_eq!(self.kind(), NodeKind::ChildCred);
        self.read_string(OFF_DESCRIPTION, MAX_DESCRIPTION_LENGTH)
    }

    /// Sets the description string of a credential child.
    pub fn set_description(&mut self, description: &str) {
        debug_assert_eq!(self.kind(), NodeKind::ChildCred);
        self.write_string(OFF_DESCRIPTION, MAX_DESCRIPTION_LENGTH, description);
    }

    /// Creation date word of a credential child.
    #[must_use]
    pub fn date_created(&self) -> u16 {
        u16::from_le_bytes([self.raw[OFF_DATE_CREATED], self.raw[OFF_DATE_CREATED + 1]])
    }

    /// Last-used date word of a credential child.
    #[must_use]
    pub fn date_last_used(&self) -> u16 {
        u16::from_le_bytes([self.raw[OFF_DATE_LAST_USED], self.raw[OFF_DATE_LAST_USED + 1]])
    }

    /// CTR bytes of a credential child.
    #[must_use]
    pub fn ctr(&self) -> [u8; NODE_CTR_SIZE] {
        let mut out = [0u8; NODE_CTR_SIZE];
        out.copy_from_slice(&self.raw[OFF_CTR..OFF_CTR + NODE_CTR_SIZE]);
        out
    }

    /// Password ciphertext of a credential child.
    #[must_use]
    pub fn ciphertext(&self) -> [u8; CIPHERTEXT_SIZE] {
        let mut out = [0u8; CIPHERTEXT_SIZE];
        out.copy_from_slice(&self.raw[OFF_PASSWORD..OFF_PASSWORD + CIPHERTEXT_SIZE]);
        out
    }

    /// Sets the password ciphertext of a credential child.
    pub fn set_ciphertext(&mut self, ct: &[u8; CIPHERTEXT_SIZE]) {
        debug_assert_eq!(self.kind(), NodeKind::ChildCred);
        self.raw[OFF_PASSWORD..OFF_PASSWORD + CIPHERTEXT_SIZE].copy_from_slice(ct);
    }

    /// Opaque 32-byte block of a data child.
    #[must_use]
    pub fn data_block(&self) -> [u8; 32] {
        debug_assert_eq!(self.kind(), NodeKind::ChildData);
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.raw[OFF_DATA_BLOCK..OFF_DATA_BLOCK + 32]);
        out
    }

    /// Sets the opaque block of a data child.
    pub fn set_data_block(&mut self, block: &[u8; 32]) {
        debug_assert_eq!(self.kind(), NodeKind::ChildData);
        self.raw[OFF_DATA_BLOCK..OFF_DATA_BLOCK + 32].copy_from_slice(block);
    }
}
