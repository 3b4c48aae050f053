//! Orphan re-insertion.
//!
//! After tagging, any untagged node is an orphan. Orphan parents are
//! spliced back into their list at the position keeping services in
//! ascending order; orphan credential children are re-homed under a
//! synthetic recovery parent.

use tracing::{error, info};
use vault_common::RECOVERED_SERVICE_NAME;

use crate::check::tag_pointed_nodes;
use crate::node::{NodeKind, NodeRef};
use crate::session::MmmSession;
use crate::store::{find_node, find_service};

/// Inserts the untagged parent at `orphan_idx` into its chain at the
/// position maintaining ascending service order.
///
/// Exactly two neighboring prev/next pairs are rewritten (or the chain
/// root, for a head insertion). Returns false on an inconsistency that
/// indicates a bug in the caller (the chain is expected to be valid when
/// this runs).
pub fn add_orphan_parent(session: &mut MmmSession, is_data: bool, orphan_idx: usize) -> bool {
    let (parents, start) = if is_data {
        (&mut session.data_parents, &mut session.start_data)
    } else {
        (&mut session.cred_parents, &mut session.start_cred)
    };

    let orphan_ref = parents[orphan_idx].self_ref();
    let orphan_service = parents[orphan_idx].service();
    info!(service = %orphan_service, "re-inserting orphan parent");

    if parents[orphan_idx].is_tagged() {
        error!(service = %orphan_service, "orphan parent is already part of the chain");
        return true;
    }

    // The chain is valid here (the tagger ran first), so walking the list
    // in load order over tagged nodes visits the chain's members.
    let mut last_tagged: Option<usize> = None;
    for i in 0..parents.len() {
        if !parents[i].is_tagged() {
            continue;
        }
        last_tagged = Some(i);

        if parents[i].service() > orphan_service {
            // One slot too far: insert right before node i.
            let prev_ref = parents[i].prev_ref();
            if prev_ref.is_empty() {
                info!(service = %orphan_service, "orphan parent becomes the new chain root");
                *start = orphan_ref;
                parents[orphan_idx].set_prev_ref(NodeRef::Empty);
            } else {
                let Some(prev_idx) = find_node(parents, prev_ref) else {
                    error!("previous parent missing from a chain the tagger validated");
                    return false;
                };
                let prev_self = parents[prev_idx].self_ref();
                parents[prev_idx].set_next_ref(orphan_ref);
                parents[orphan_idx].set_prev_ref(prev_self);
            }
            let next_self = parents[i].self_ref();
            parents[i].set_prev_ref(orphan_ref);
            parents[orphan_idx].set_next_ref(next_self);

            // Re-tag so the orphan's own children join the chain.
            tag_pointed_nodes(session, true);
            return true;
        }
    }

    // Last spot.
    match last_tagged {
        None => {
            info!(service = %orphan_service, "empty chain, orphan parent becomes the root");
            *start = orphan_ref;
            parents[orphan_idx].set_prev_ref(NodeRef::Empty);
            parents[orphan_idx].set_next_ref(NodeRef::Empty);
        }
        Some(p) => {
            let prev_self = parents[p].self_ref();
            parents[p].set_next_ref(orphan_ref);
            parents[orphan_idx].set_prev_ref(prev_self);
            parents[orphan_idx].set_next_ref(NodeRef::Empty);
        }
    }

    tag_pointed_nodes(session, true);
    true
}

/// Creates a new credential service parent in memory with a virtual
/// address and splices it into the chain.
///
/// Returns the parent's index in the credential parent list, or `None` if
/// the service already exists.
pub fn add_new_service(session: &mut MmmSession, service: &str) -> Option<usize> {
    if find_service(&session.cred_parents, service).is_some() {
        error!(service, "service already exists");
        return None;
    }

    let mut node = session.mint_node(NodeKind::ParentCred);
    node.set_service(service);
    session.cred_parents.push(node);
    let idx = session.cred_parents.len() - 1;
    add_orphan_parent(session, false, idx);
    Some(idx)
}

/// Re-homes the untagged credential child at `child_idx` under the
/// synthetic recovery parent, appending at the end of its child chain in
/// insertion order.
pub fn add_orphan_child(session: &mut MmmSession, child_idx: usize) -> bool {
    let login = session.cred_children[child_idx].login();
    info!(login = %login, "re-homing orphan credential child");

    if session.cred_children[child_idx].is_tagged() {
        error!(login = %login, "orphan child is already part of a chain");
        return true;
    }

    if find_service(&session.cred_parents, RECOVERED_SERVICE_NAME).is_none() {
        info!("creating the recovery service parent");
        if add_new_service(session, RECOVERED_SERVICE_NAME).is_none() {
            return false;
        }
    }
    let Some(parent_idx) = find_service(&session.cred_parents, RECOVERED_SERVICE_NAME) else {
        return false;
    };

    let child_ref = session.cred_children[child_idx].self_ref();

    // Walk to the tail of the recovery parent's child chain.
    let mut cur = session.cred_parents[parent_idx].first_child_ref();
    let mut last: Option<usize> = None;
    let mut hops = 0;
    while !cur.is_empty() {
        let Some(idx) = find_node(&session.cred_children, cur) else {
            error!("recovery parent's child chain is broken");
            return false;
        };
        last = Some(idx);
        cur = session.cred_children[idx].next_ref();
        hops += 1;
        if hops > session.cred_children.len() {
            error!("recovery parent's child chain loops");
            return false;
        }
    }

    match last {
        None => {
            session.cred_parents[parent_idx].set_first_child_ref(child_ref);
            session.cred_children[child_idx].set_prev_ref(NodeRef::Empty);
        }
        Some(tail) => {
            let tail_ref = session.cred_children[tail].self_ref();
            session.cred_children[tail].set_next_ref(child_ref);
            session.cred_children[child_idx].set_prev_ref(tail_ref);
        }
    }
    session.cred_children[child_idx].set_next_ref(NodeRef::Empty);

    tag_pointed_nodes(session, true);
    true
}
