//! Virtual-to-physical address resolution.
//!
//! Nodes minted in memory carry virtual ids instead of flash addresses.
//! Before the write-back diff runs, every virtual id is mapped to one of
//! the free physical slots collected during the full scan, and every
//! pointer field still referencing a virtual id is rewritten.

use tracing::debug;
use vault_common::types::Address;
use vault_common::{VaultError, VaultResult};

use crate::node::{Node, NodeRef};
use crate::session::MmmSession;

fn free_addr(free: &[Address], r: NodeRef) -> VaultResult<Option<Address>> {
    let NodeRef::Virtual(v) = r else {
        return Ok(None);
    };
    free.get(v.as_u32() as usize).copied().map(Some).ok_or_else(|| {
        VaultError::internal(format!(
            "virtual id {} has no free slot (only {} collected)",
            v.as_u32(),
            free.len()
        ))
    })
}

fn resolve_node(free: &[Address], node: &mut Node) -> VaultResult<()> {
    if let Some(addr) = free_addr(free, node.self_ref())? {
        debug!(%addr, "placing minted node");
        node.set_addr(addr);
    }

    let (prev, next, first_child) = node.virtual_shadows();
    if let Some(v) = prev {
        let addr = free_addr(free, NodeRef::Virtual(v))?.unwrap_or(Address::EMPTY);
        node.set_prev_ref(NodeRef::from_addr(addr));
    }
    if let Some(v) = next {
        let addr = free_addr(free, NodeRef::Virtual(v))?.unwrap_or(Address::EMPTY);
        node.set_next_ref(NodeRef::from_addr(addr));
    }
    if let Some(v) = first_child {
        let addr = free_addr(free, NodeRef::Virtual(v))?.unwrap_or(Address::EMPTY);
        node.set_first_child_ref(NodeRef::from_addr(addr));
    }
    Ok(())
}

/// Rewrites every virtual reference in the session to the free physical
/// address its id maps to (by position in the free list).
pub fn resolve_virtual_addresses(session: &mut MmmSession) -> VaultResult<()> {
    let free = session.free_addresses.clone();

    for node in session
        .cred_parents
        .iter_mut()
        .chain(session.cred_children.iter_mut())
        .chain(session.data_parents.iter_mut())
        .chain(session.data_children.iter_mut())
    {
        resolve_node(&free, node)?;
    }

    if let Some(addr) = free_addr(&free, session.start_cred)? {
        session.start_cred = NodeRef::from_addr(addr);
    }
    if let Some(addr) = free_addr(&free, session.start_data)? {
        session.start_data = NodeRef::from_addr(addr);
    }
    Ok(())
}
