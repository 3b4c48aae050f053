//! Write-back diff generation.
//!
//! Diffs the live session state against the clone captured at scan time
//! and produces the minimal set of device writes that would turn the
//! on-flash database into the live state.

use tracing::info;
use vault_common::types::Address;
use vault_common::{VaultError, VaultResult, NODE_SIZE};
use vault_proto::{CommandId, Packet};

use crate::node::{Node, NodeRef};
use crate::session::MmmSession;
use crate::store::find_node;

/// Bytes of node image carried per flash-node write packet.
const WRITE_CHUNK: usize = 59;

/// One device write produced by the diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOp {
    /// Write a full node image at an address (new or updated node).
    WriteNode {
        /// Destination slot.
        addr: Address,
        /// The 132-byte image to write.
        image: Box<[u8; NODE_SIZE]>,
    },
    /// Mark a slot erased so the device can reclaim it.
    FreeNode {
        /// The abandoned slot.
        addr: Address,
    },
    /// Rewrite one favorite slot.
    SetFavorite {
        /// Favorite slot index.
        slot: u8,
        /// Parent address.
        parent: Address,
        /// Child address.
        child: Address,
    },
    /// Rewrite the CTR value.
    SetCtr {
        /// Opaque CTR bytes.
        ctr: Vec<u8>,
    },
    /// Rewrite the credential chain root.
    SetStartingParent {
        /// New root address.
        addr: Address,
    },
    /// Rewrite the data chain root.
    SetDataStartingParent {
        /// New root address.
        addr: Address,
    },
    /// Add a CPZ/CTR record (additions only, by design of the device).
    AddCpzCtr {
        /// The raw record.
        record: Vec<u8>,
    },
}

impl SaveOp {
    /// Renders this operation as wire packets.
    ///
    /// A node image spans three write packets, each carrying the
    /// destination address, a sequence byte, and up to 59 image bytes.
    pub fn to_packets(&self) -> VaultResult<Vec<Packet>> {
        match self {
            Self::WriteNode { addr, image } => write_node_packets(*addr, image),
            Self::FreeNode { addr } => {
                // Writing an erased image (all 0xFF) releases the slot.
                write_node_packets(*addr, &[0xFF; NODE_SIZE])
            }
            Self::SetFavorite {
                slot,
                parent,
                child,
            } => {
                let p = parent.to_bytes();
                let c = child.to_bytes();
                Ok(vec![Packet::new(
                    CommandId::SetFavorite,
                    &[*slot, p[0], p[1], c[0], c[1]],
                )?])
            }
            Self::SetCtr { ctr } => Ok(vec![Packet::new(CommandId::SetCtrValue, ctr)?]),
            Self::SetStartingParent { addr } => Ok(vec![Packet::new(
                CommandId::SetStartingParent,
                &addr.to_bytes(),
            )?]),
            Self::SetDataStartingParent { addr } => Ok(vec![Packet::new(
                CommandId::SetDnStartParent,
                &addr.to_bytes(),
            )?]),
            Self::AddCpzCtr { record } => {
                Ok(vec![Packet::new(CommandId::AddCardCpzCtr, record)?])
            }
        }
    }
}

fn write_node_packets(addr: Address, image: &[u8; NODE_SIZE]) -> VaultResult<Vec<Packet>> {
    let bytes = addr.to_bytes();
    image
        .chunks(WRITE_CHUNK)
        .enumerate()
        .map(|(seq, chunk)| {
            let mut payload = Vec::with_capacity(3 + chunk.len());
            payload.extend_from_slice(&bytes);
            payload.push(seq as u8);
            payload.extend_from_slice(chunk);
            Packet::new(CommandId::WriteFlashNode, &payload)
        })
        .collect()
}

fn placed_addr(node: &Node, what: &str) -> VaultResult<Address> {
    let addr = node.addr();
    if !addr.is_valid() {
        return Err(VaultError::internal(format!(
            "{what} still has a virtual address at diff time"
        )));
    }
    Ok(addr)
}

fn root_addr(r: NodeRef, what: &str) -> VaultResult<Address> {
    match r {
        NodeRef::Empty => Ok(Address::EMPTY),
        NodeRef::Addr(a) => Ok(a),
        NodeRef::Virtual(_) => Err(VaultError::internal(format!(
            "{what} root still virtual at diff time"
        ))),
    }
}

fn diff_list(
    live: &[Node],
    clone: &[Node],
    what: &str,
    ops: &mut Vec<SaveOp>,
) -> VaultResult<()> {
    // Pass one: nodes that changed or appeared.
    for node in live {
        let addr = placed_addr(node, what)?;
        match find_node(clone, NodeRef::Addr(addr)) {
            None => {
                info!(%addr, what, "write for new node");
                ops.push(SaveOp::WriteNode {
                    addr,
                    image: Box::new(*node.image()),
                });
            }
            Some(i) if clone[i].image() != node.image() => {
                info!(%addr, what, "write for updated node");
                ops.push(SaveOp::WriteNode {
                    addr,
                    image: Box::new(*node.image()),
                });
            }
            Some(_) => {}
        }
    }
    // Pass two: nodes that disappeared.
    for node in clone {
        let addr = node.addr();
        if find_node(live, NodeRef::Addr(addr)).is_none() {
            info!(%addr, what, "slot release for deleted node");
            ops.push(SaveOp::FreeNode { addr });
        }
    }
    Ok(())
}

/// Produces the device writes turning the clone state into the live
/// state.
///
/// Requires every virtual address to have been resolved first.
pub fn generate_save_ops(session: &MmmSession) -> VaultResult<Vec<SaveOp>> {
    let mut ops = Vec::new();

    diff_list(
        &session.cred_parents,
        &session.cred_parents_clone,
        "credential parent",
        &mut ops,
    )?;
    diff_list(
        &session.cred_children,
        &session.cred_children_clone,
        "credential child",
        &mut ops,
    )?;
    diff_list(
        &session.data_parents,
        &session.data_parents_clone,
        "data parent",
        &mut ops,
    )?;
    diff_list(
        &session.data_children,
        &session.data_children_clone,
        "data child",
        &mut ops,
    )?;

    for (i, (live, clone)) in session
        .favorites
        .iter()
        .zip(session.favorites_clone.iter())
        .enumerate()
    {
        if live != clone {
            info!(slot = i, "favorite update");
            ops.push(SaveOp::SetFavorite {
                slot: i as u8,
                parent: live.parent,
                child: live.child,
            });
        }
    }

    if session.ctr != session.ctr_clone {
        info!("CTR update");
        ops.push(SaveOp::SetCtr {
            ctr: session.ctr.clone(),
        });
    }

    if session.start_cred != session.start_cred_clone {
        info!("credential root update");
        ops.push(SaveOp::SetStartingParent {
            addr: root_addr(session.start_cred, "credential")?,
        });
    }
    if session.start_data != session.start_data_clone {
        info!("data root update");
        ops.push(SaveOp::SetDataStartingParent {
            addr: root_addr(session.start_data, "data")?,
        });
    }

    // CPZ/CTR records can only be added.
    for record in &session.cpz_ctr {
        if !session.cpz_ctr_clone.contains(record) {
            info!("CPZ/CTR addition");
            ops.push(SaveOp::AddCpzCtr {
                record: record.clone(),
            });
        }
    }

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use crate::session::FavoriteSlot;
    use crate::testutil::build_clean_session;

    #[test]
    fn test_clean_session_diffs_empty() {
        let session = build_clean_session(3, 2);
        assert!(generate_save_ops(&session).unwrap().is_empty());
    }

    #[test]
    fn test_modified_node_is_written() {
        let mut session = build_clean_session(2, 1);
        session.cred_children[0].set_login("changed");
        let ops = generate_save_ops(&session).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], SaveOp::WriteNode { addr, .. }
            if *addr == session.cred_children[0].addr()));
    }

    #[test]
    fn test_deleted_node_frees_slot() {
        let mut session = build_clean_session(2, 0);
        let gone = session.cred_parents.pop().unwrap();
        // the surviving parent's next pointer changes too
        session.cred_parents[0].set_next_ref(NodeRef::Empty);
        let ops = generate_save_ops(&session).unwrap();
        assert!(ops
            .iter()
            .any(|op| matches!(op, SaveOp::FreeNode { addr } if *addr == gone.addr())));
        assert!(ops
            .iter()
            .any(|op| matches!(op, SaveOp::WriteNode { .. })));
    }

    #[test]
    fn test_favorite_ctr_and_roots_diffed() {
        let mut session = build_clean_session(2, 1);
        session.favorites[3] = FavoriteSlot {
            parent: session.cred_parents[0].addr(),
            child: session.cred_children[0].addr(),
        };
        session.ctr = vec![1, 2, 3];
        session.ctr_clone = vec![0, 0, 0];
        session.start_cred = session.cred_parents[1].self_ref();

        let ops = generate_save_ops(&session).unwrap();
        assert!(ops
            .iter()
            .any(|op| matches!(op, SaveOp::SetFavorite { slot: 3, .. })));
        assert!(ops.iter().any(|op| matches!(op, SaveOp::SetCtr { .. })));
        assert!(ops
            .iter()
            .any(|op| matches!(op, SaveOp::SetStartingParent { .. })));
    }

    #[test]
    fn test_cpz_additions_only() {
        let mut session = build_clean_session(0, 0);
        session.adopt_cpz_ctr(vec![1, 1]);
        session.cpz_ctr.push(vec![2, 2]);
        let ops = generate_save_ops(&session).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], SaveOp::AddCpzCtr { record } if record == &vec![2, 2]));
    }

    #[test]
    fn test_unresolved_virtual_rejected() {
        let mut session = build_clean_session(1, 0);
        let minted = session.mint_node(NodeKind::ParentCred);
        session.cred_parents.push(minted);
        assert!(generate_save_ops(&session).is_err());
    }

    #[test]
    fn test_applying_ops_to_clone_reproduces_live_state() {
        let mut session = build_clean_session(3, 2);
        session.cred_children[1].set_login("renamed");
        session.cred_parents[2].set_service("svc99");
        let gone = session.cred_children.pop().unwrap();
        // the popped child was its parent's chain tail
        session.cred_children[4].set_next_ref(NodeRef::Empty);

        // replay the ops onto the clone's node map
        let mut replayed: std::collections::BTreeMap<u16, [u8; NODE_SIZE]> = session
            .cred_parents_clone
            .iter()
            .chain(session.cred_children_clone.iter())
            .map(|n| (n.addr().as_u16(), *n.image()))
            .collect();
        for op in generate_save_ops(&session).unwrap() {
            match op {
                SaveOp::WriteNode { addr, image } => {
                    replayed.insert(addr.as_u16(), *image);
                }
                SaveOp::FreeNode { addr } => {
                    replayed.remove(&addr.as_u16());
                }
                _ => {}
            }
        }

        let live: std::collections::BTreeMap<u16, [u8; NODE_SIZE]> = session
            .cred_parents
            .iter()
            .chain(session.cred_children.iter())
            .map(|n| (n.addr().as_u16(), *n.image()))
            .collect();
        assert_eq!(replayed, live);
        assert!(!replayed.contains_key(&gone.addr().as_u16()));
    }

    #[test]
    fn test_node_write_spans_three_packets() {
        let session = {
            let mut s = build_clean_session(1, 0);
            s.cred_parents[0].set_service("renamed");
            s
        };
        let ops = generate_save_ops(&session).unwrap();
        assert_eq!(ops.len(), 1);
        let packets = ops[0].to_packets().unwrap();
        assert_eq!(packets.len(), 3);
        for (seq, pkt) in packets.iter().enumerate() {
            assert_eq!(pkt.command().unwrap(), CommandId::WriteFlashNode);
            assert_eq!(pkt.payload()[2], seq as u8);
        }
        // 59 + 59 + 14 = 132 image bytes
        assert_eq!(packets[2].len(), 3 + 14);
    }
}
