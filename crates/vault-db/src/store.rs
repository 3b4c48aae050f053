//! Node list lookups.
//!
//! The in-memory graph is pointer-logically cyclic but physically a flat
//! list per node kind; all traversal goes through index lookups so chain
//! walks never hold more than one mutable borrow.

use crate::node::{Node, NodeRef};

/// Finds the index of the node a link points at.
///
/// Placed nodes match by physical address, minted nodes by virtual id,
/// mirroring how a link can only carry one of the two.
#[must_use]
pub fn find_node(list: &[Node], target: NodeRef) -> Option<usize> {
    if target.is_empty() {
        return None;
    }
    list.iter().position(|node| node.self_ref() == target)
}

/// Finds the index of the parent node carrying `service`.
#[must_use]
pub fn find_service(parents: &[Node], service: &str) -> Option<usize> {
    parents.iter().position(|node| node.service() == service)
}
