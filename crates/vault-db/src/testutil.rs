//! Builders for in-memory sessions used across the crate's tests.

use vault_common::types::Address;

use crate::node::{Node, NodeKind, NodeRef};
use crate::session::MmmSession;

/// Builds a clean, fully linked session: `parents` credential parents in
/// alphabetical order, each with `children_per` doubly-linked children.
/// Clones are captured after linking, so a freshly built session diffs
/// empty.
pub fn build_clean_session(parents: usize, children_per: usize) -> MmmSession {
    let mut session = MmmSession::new();

    let parent_addr = |i: usize| Address::from_page_and_slot(128 + i as u16, 0);
    let child_addr = |i: usize, j: usize| Address::from_page_and_slot(300 + i as u16, 1 + j as u8);

    let mut parent_nodes = Vec::new();
    let mut child_nodes = Vec::new();

    for i in 0..parents {
        let mut p = Node::minted(NodeKind::ParentCred, vault_common::types::VirtualAddr::new(0));
        p.set_addr(parent_addr(i));
        p.set_service(&format!("svc{i:02}"));
        if i > 0 {
            p.set_prev_ref(NodeRef::Addr(parent_addr(i - 1)));
        }
        if i + 1 < parents {
            p.set_next_ref(NodeRef::Addr(parent_addr(i + 1)));
        }
        if children_per > 0 {
            p.set_first_child_ref(NodeRef::Addr(child_addr(i, 0)));
        }
        parent_nodes.push(p);

        for j in 0..children_per {
            let mut c =
                Node::minted(NodeKind::ChildCred, vault_common::types::VirtualAddr::new(0));
            c.set_addr(child_addr(i, j));
            c.set_login(&format!("user{i}-{j}"));
            if j > 0 {
                c.set_prev_ref(NodeRef::Addr(child_addr(i, j - 1)));
            }
            if j + 1 < children_per {
                c.set_next_ref(NodeRef::Addr(child_addr(i, j + 1)));
            }
            child_nodes.push(c);
        }
    }

    if parents > 0 {
        session.start_cred = NodeRef::Addr(parent_addr(0));
        session.start_cred_clone = session.start_cred;
    }
    for node in parent_nodes {
        session.adopt_scanned(node);
    }
    for node in child_nodes {
        session.adopt_scanned(node);
    }
    session
}

/// Appends a clean data tree (`parents` data parents, each with
/// `children_per` singly-linked children) to a session.
pub fn add_data_chain(session: &mut MmmSession, parents: usize, children_per: usize) {
    let parent_addr = |i: usize| Address::from_page_and_slot(600 + i as u16, 0);
    let child_addr = |i: usize, j: usize| Address::from_page_and_slot(700 + i as u16, 1 + j as u8);

    for i in 0..parents {
        let mut p = Node::minted(NodeKind::ParentData, vault_common::types::VirtualAddr::new(0));
        p.set_addr(parent_addr(i));
        p.set_service(&format!("data{i:02}"));
        if i > 0 {
            p.set_prev_ref(NodeRef::Addr(parent_addr(i - 1)));
        }
        if i + 1 < parents {
            p.set_next_ref(NodeRef::Addr(parent_addr(i + 1)));
        }
        if children_per > 0 {
            p.set_first_child_ref(NodeRef::Addr(child_addr(i, 0)));
        }
        session.adopt_scanned(p);

        for j in 0..children_per {
            let mut c =
                Node::minted(NodeKind::ChildData, vault_common::types::VirtualAddr::new(0));
            c.set_addr(child_addr(i, j));
            c.set_data_block(&[i as u8; 32]);
            if j + 1 < children_per {
                c.set_next_ref(NodeRef::Addr(child_addr(i, j + 1)));
            }
            session.adopt_scanned(c);
        }
    }

    if parents > 0 {
        session.start_data = NodeRef::Addr(parent_addr(0));
        session.start_data_clone = session.start_data;
    }
}
