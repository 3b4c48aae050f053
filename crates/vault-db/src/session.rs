//! Memory Management Mode session state.
//!
//! Everything mirrored from the device while MMM is active lives here,
//! together with a byte-for-byte clone of each value captured at scan
//! time. Diffing live state against the clone is what drives the
//! write-back stream. The session is destroyed on MMM exit regardless of
//! success.

use serde::{Deserialize, Serialize};
use vault_common::types::{Address, VirtualAddr};
use vault_common::FAVORITES_COUNT;

use crate::node::{Node, NodeKind, NodeRef};

/// One favorite slot: a (parent, child) address pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteSlot {
    /// Credential parent address.
    pub parent: Address,
    /// Credential child address.
    pub child: Address,
}

impl FavoriteSlot {
    /// An unset favorite.
    pub const EMPTY: Self = Self {
        parent: Address::EMPTY,
        child: Address::EMPTY,
    };

    /// A favorite counts as set when either address is non-empty.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.parent.is_valid() || self.child.is_valid()
    }

    /// Clears both addresses.
    pub fn zero(&mut self) {
        *self = Self::EMPTY;
    }

    /// Decodes the 4-byte wire form (parent LE, child LE).
    #[must_use]
    pub fn from_payload(bytes: &[u8]) -> Self {
        if bytes.len() < 4 {
            return Self::EMPTY;
        }
        Self {
            parent: Address::from_bytes([bytes[0], bytes[1]]),
            child: Address::from_bytes([bytes[2], bytes[3]]),
        }
    }

    /// Encodes the 4-byte wire form.
    #[must_use]
    pub fn to_payload(self) -> [u8; 4] {
        let p = self.parent.to_bytes();
        let c = self.child.to_bytes();
        [p[0], p[1], c[0], c[1]]
    }
}

/// In-memory mirror of the device database for one MMM session.
#[derive(Debug, Default)]
pub struct MmmSession {
    /// CTR value, opaque to the host.
    pub ctr: Vec<u8>,
    /// Per-card CPZ/CTR records, unique by CPZ.
    pub cpz_ctr: Vec<Vec<u8>>,
    /// Favorite slots.
    pub favorites: Vec<FavoriteSlot>,
    /// Root of the credential parent chain.
    pub start_cred: NodeRef,
    /// Root of the data parent chain.
    pub start_data: NodeRef,
    /// Credential parent nodes, in scan order.
    pub cred_parents: Vec<Node>,
    /// Credential child nodes, in scan order.
    pub cred_children: Vec<Node>,
    /// Data parent nodes, in scan order.
    pub data_parents: Vec<Node>,
    /// Data child nodes, in scan order.
    pub data_children: Vec<Node>,

    /// Clone of the CTR captured at scan time.
    pub ctr_clone: Vec<u8>,
    /// Clone of the CPZ/CTR records.
    pub cpz_ctr_clone: Vec<Vec<u8>>,
    /// Clone of the favorites.
    pub favorites_clone: Vec<FavoriteSlot>,
    /// Clone of the credential chain root.
    pub start_cred_clone: NodeRef,
    /// Clone of the data chain root.
    pub start_data_clone: NodeRef,
    /// Clones of the credential parents.
    pub cred_parents_clone: Vec<Node>,
    /// Clones of the credential children.
    pub cred_children_clone: Vec<Node>,
    /// Clones of the data parents.
    pub data_parents_clone: Vec<Node>,
    /// Clones of the data children.
    pub data_children_clone: Vec<Node>,

    /// Free physical slots discovered by the full scan, indexed by the
    /// virtual id they will satisfy.
    pub free_addresses: Vec<Address>,
    next_virtual: u32,
    /// Bytes received during the current scan, for transfer diagnostics.
    pub scan_bytes_received: u64,
    /// Last flash page reported to the progress callback.
    pub last_page_scanned: u16,
}

impl MmmSession {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            favorites: vec![FavoriteSlot::EMPTY; FAVORITES_COUNT],
            favorites_clone: vec![FavoriteSlot::EMPTY; FAVORITES_COUNT],
            start_cred: NodeRef::Empty,
            start_data: NodeRef::Empty,
            start_cred_clone: NodeRef::Empty,
            start_data_clone: NodeRef::Empty,
            ..Self::default()
        }
    }

    /// Clears every live value and every clone.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Mints a new node of `kind` with the next virtual id.
    pub fn mint_node(&mut self, kind: NodeKind) -> Node {
        let node = Node::minted(kind, VirtualAddr::new(self.next_virtual));
        self.next_virtual += 1;
        node
    }

    /// Number of virtual ids handed out so far (free slots needed at
    /// write-back).
    #[must_use]
    pub fn virtual_count(&self) -> u32 {
        self.next_virtual
    }

    /// Records a scanned node in the list its type tag selects, cloning
    /// it byte-for-byte.
    pub fn adopt_scanned(&mut self, node: Node) {
        let clone = node.clone();
        match node.kind() {
            NodeKind::ParentCred => {
                self.cred_parents.push(node);
                self.cred_parents_clone.push(clone);
            }
            NodeKind::ChildCred => {
                self.cred_children.push(node);
                self.cred_children_clone.push(clone);
            }
            NodeKind::ParentData => {
                self.data_parents.push(node);
                self.data_parents_clone.push(clone);
            }
            NodeKind::ChildData => {
                self.data_children.push(node);
                self.data_children_clone.push(clone);
            }
        }
    }

    /// Records a CPZ/CTR packet, ignoring CPZ duplicates.
    pub fn adopt_cpz_ctr(&mut self, record: Vec<u8>) {
        if self.cpz_ctr.contains(&record) {
            tracing::debug!("duplicate CPZ/CTR record ignored");
            return;
        }
        self.cpz_ctr_clone.push(record.clone());
        self.cpz_ctr.push(record);
    }

    /// Sorts both parent lists by service name.
    ///
    /// The on-device order is not guaranteed sorted after repair chains;
    /// the integrity path sorts before checking so orphan insertion keeps
    /// the alphabetical invariant.
    pub fn sort_parents_by_service(&mut self) {
        self.cred_parents.sort_by_key(Node::service);
        self.data_parents.sort_by_key(Node::service);
    }
}
