//! Integrity checking of the linked node chains.
//!
//! [`tag_pointed_nodes`] walks the canonical chains and tags every node it
//! can reach, reporting (and optionally repairing) pointer violations.
//! [`check_loaded_nodes`] runs the tagger, re-homes whatever stayed
//! untagged, and scrubs dangling favorites.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::node::{Node, NodeRef};
use crate::repair::{add_orphan_child, add_orphan_parent};
use crate::session::MmmSession;
use crate::store::find_node;

/// Outcome of one chain walk.
struct ChainWalk {
    /// No violations observed.
    ok: bool,
    /// The walk had to stop early (missing node or loop).
    broken: bool,
}

/// Counters produced by a full database check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    /// True when the database needed no correction at all.
    pub ok: bool,
    /// Untagged credential parents found.
    pub orphan_cred_parents: u32,
    /// Untagged credential children found.
    pub orphan_cred_children: u32,
    /// Untagged data parents found.
    pub orphan_data_parents: u32,
    /// Untagged data children found.
    pub orphan_data_children: u32,
    /// Favorite slots pointing at missing nodes.
    pub dangling_favorites: u32,
}

fn detag(session: &mut MmmSession) {
    for node in session
        .cred_parents
        .iter_mut()
        .chain(session.cred_children.iter_mut())
        .chain(session.data_parents.iter_mut())
        .chain(session.data_children.iter_mut())
    {
        node.set_tagged(false);
    }
}

/// Walks one parent chain and its child chains, tagging reachable nodes.
///
/// `doubly_linked_children` selects the credential child layout; data
/// children only have their forward pointer checked.
fn tag_chain(
    parents: &mut [Node],
    children: &mut [Node],
    start: &mut NodeRef,
    doubly_linked_children: bool,
    repair: bool,
    label: &str,
) -> ChainWalk {
    let mut ok = true;
    let mut cur = *start;
    let mut prev_parent: Option<usize> = None;

    while !cur.is_empty() {
        let Some(idx) = find_node(parents, cur) else {
            error!(chain = label, target = ?cur, "chain points at a parent missing from the scan");
            if repair {
                match prev_parent {
                    None => *start = NodeRef::Empty,
                    Some(p) => parents[p].set_next_ref(NodeRef::Empty),
                }
            }
            return ChainWalk { ok: false, broken: true };
        };

        if parents[idx].is_tagged() {
            error!(chain = label, target = ?cur, "parent chain loop detected");
            if repair {
                match prev_parent {
                    None => *start = NodeRef::Empty,
                    Some(p) => parents[p].set_next_ref(NodeRef::Empty),
                }
            }
            return ChainWalk { ok: false, broken: true };
        }

        let expected_prev = match prev_parent {
            None => NodeRef::Empty,
            Some(p) => parents[p].self_ref(),
        };
        if parents[idx].prev_ref() != expected_prev {
            warn!(
                chain = label,
                service = %parents[idx].service(),
                found = ?parents[idx].prev_ref(),
                expected = ?expected_prev,
                "parent has an incorrect previous pointer"
            );
            if repair {
                parents[idx].set_prev_ref(expected_prev);
            }
            ok = false;
        }

        parents[idx].set_tagged(true);

        let mut child_cur = parents[idx].first_child_ref();
        let mut prev_child: Option<usize> = None;
        while !child_cur.is_empty() {
            let Some(cidx) = find_node(children, child_cur) else {
                warn!(chain = label, target = ?child_cur, "child chain points at a node missing from the scan");
                ok = false;
                if repair {
                    match prev_child {
                        None => parents[idx].set_first_child_ref(NodeRef::Empty),
                        Some(pc) => children[pc].set_next_ref(NodeRef::Empty),
                    }
                }
                break;
            };

            if children[cidx].is_tagged() {
                error!(chain = label, target = ?child_cur, "child chain loop detected");
                if repair {
                    match prev_child {
                        None => parents[idx].set_first_child_ref(NodeRef::Empty),
                        Some(pc) => children[pc].set_next_ref(NodeRef::Empty),
                    }
                }
                return ChainWalk { ok: false, broken: true };
            }

            if doubly_linked_children {
                let expected = match prev_child {
                    None => NodeRef::Empty,
                    Some(pc) => children[pc].self_ref(),
                };
                if children[cidx].prev_ref() != expected {
                    warn!(
                        chain = label,
                        login = %children[cidx].login(),
                        found = ?children[cidx].prev_ref(),
                        expected = ?expected,
                        "child has an incorrect previous pointer"
                    );
                    if repair {
                        children[cidx].set_prev_ref(expected);
                    }
                    ok = false;
                }
            }

            children[cidx].set_tagged(true);
            prev_child = Some(cidx);
            child_cur = children[cidx].next_ref();
        }

        prev_parent = Some(idx);
        cur = parents[idx].next_ref();
    }

    ChainWalk { ok, broken: false }
}

/// Tags every node reachable from the chain roots and reports violations.
///
/// With `repair` set, violations are fixed in memory as they are found.
/// Returns true iff no violation was observed; callers re-run with
/// `repair = false` to confirm convergence.
pub fn tag_pointed_nodes(session: &mut MmmSession, repair: bool) -> bool {
    detag(session);

    let cred = tag_chain(
        &mut session.cred_parents,
        &mut session.cred_children,
        &mut session.start_cred,
        true,
        repair,
        "credentials",
    );
    if cred.broken {
        return false;
    }

    let data = tag_chain(
        &mut session.data_parents,
        &mut session.data_children,
        &mut session.start_data,
        false,
        repair,
        "data",
    );
    if data.broken {
        return false;
    }

    cred.ok && data.ok
}

/// Full database check: tag, re-home orphans, scrub favorites.
///
/// With `repair` set, every correctable violation is fixed in memory and a
/// verification pass (`repair = false`) is run afterwards; that pass
/// failing indicates a bug in the repair code itself.
pub fn check_loaded_nodes(session: &mut MmmSession, repair: bool) -> CheckReport {
    info!("checking database");

    let mut report = CheckReport {
        ok: tag_pointed_nodes(session, repair),
        ..CheckReport::default()
    };

    let mut idx = 0;
    while idx < session.cred_parents.len() {
        if !session.cred_parents[idx].is_tagged() {
            warn!(
                service = %session.cred_parents[idx].service(),
                addr = %session.cred_parents[idx].addr(),
                "orphan credential parent"
            );
            if repair {
                add_orphan_parent(session, false, idx);
            }
            report.orphan_cred_parents += 1;
        }
        idx += 1;
    }

    let mut idx = 0;
    while idx < session.cred_children.len() {
        if !session.cred_children[idx].is_tagged() {
            warn!(
                login = %session.cred_children[idx].login(),
                addr = %session.cred_children[idx].addr(),
                "orphan credential child"
            );
            if repair {
                add_orphan_child(session, idx);
            }
            report.orphan_cred_children += 1;
        }
        idx += 1;
    }

    let mut idx = 0;
    while idx < session.data_parents.len() {
        if !session.data_parents[idx].is_tagged() {
            warn!(
                service = %session.data_parents[idx].service(),
                addr = %session.data_parents[idx].addr(),
                "orphan data parent"
            );
            if repair {
                add_orphan_parent(session, true, idx);
            }
            report.orphan_data_parents += 1;
        }
        idx += 1;
    }

    // Data-child orphans carry no parent context; report only.
    for child in &session.data_children {
        if !child.is_tagged() {
            warn!(addr = %child.addr(), "orphan data child");
            report.orphan_data_children += 1;
        }
    }

    info!(
        cred_parents = report.orphan_cred_parents,
        cred_children = report.orphan_cred_children,
        data_parents = report.orphan_data_parents,
        data_children = report.orphan_data_children,
        "orphan totals"
    );

    // Favorites last: a slot counts as set when either address is
    // non-empty.
    for i in 0..session.favorites.len() {
        let fav = session.favorites[i];
        if !fav.is_set() {
            continue;
        }
        let parent_found =
            find_node(&session.cred_parents, NodeRef::from_addr(fav.parent)).is_some();
        let child_found =
            find_node(&session.cred_children, NodeRef::from_addr(fav.child)).is_some();
        if !parent_found || !child_found {
            error!(slot = i, "favorite points at a missing node");
            report.dangling_favorites += 1;
            if repair {
                session.favorites[i].zero();
            }
        }
    }

    let orphan_total = report.orphan_cred_parents
        + report.orphan_cred_children
        + report.orphan_data_parents
        + report.orphan_data_children;
    if orphan_total != 0 || report.dangling_favorites != 0 {
        report.ok = false;
    }

    if report.ok {
        info!("database check passed");
    } else if repair {
        info!("database was repaired, verifying");
        let verify = check_loaded_nodes(session, false);
        if verify.ok {
            info!("repairs verified");
        } else {
            error!("verification after repair failed");
        }
    } else {
        info!("database check found errors");
    }

    report
}
