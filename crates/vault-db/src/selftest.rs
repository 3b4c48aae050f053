//! Repair-code self-test.
//!
//! Corrupts a cleanly scanned database in memory in a fixed grid of ways,
//! runs the repair pass after each, and asserts that the diff against the
//! clone comes out empty, i.e. repair restored exactly what was on flash.
//! Run from the integrity-check path on demand.

use tracing::info;
use vault_common::types::{Address, VirtualAddr};
use vault_common::{VaultError, VaultResult};

use crate::check::check_loaded_nodes;
use crate::diff::generate_save_ops;
use crate::node::NodeRef;
use crate::resolve_virtual_addresses;
use crate::session::MmmSession;

fn verify_clean(session: &mut MmmSession, step: &str) -> VaultResult<()> {
    check_loaded_nodes(session, true);
    let ops = generate_save_ops(session)?;
    if ops.is_empty() {
        info!(step, "self-test step passed");
        Ok(())
    } else {
        Err(VaultError::internal(format!(
            "self-test step '{step}' left {} writes behind",
            ops.len()
        )))
    }
}

fn corrupt_parent_chain(session: &mut MmmSession, is_data: bool) -> VaultResult<()> {
    // An address inside the graphics zone can never be in the lists.
    let invalid = Address::from_page_and_slot(64, 0);
    let label = if is_data { "data" } else { "credential" };

    macro_rules! parents {
        () => {
            if is_data {
                &mut session.data_parents
            } else {
                &mut session.cred_parents
            }
        };
    }

    if parents!().len() < 7 {
        return Err(VaultError::input_invalid(format!(
            "self-test needs at least 7 {label} parents"
        )));
    }

    info!(label, "skipping one parent link in the chain");
    let skip_to = parents!()[3].self_ref();
    parents!()[1].set_next_ref(skip_to);
    verify_clean(session, "skip one parent link")?;

    info!(label, "skipping the first parent");
    let second = parents!()[1].self_ref();
    if is_data {
        session.start_data = second;
    } else {
        session.start_cred = second;
    }
    parents!()[1].set_prev_ref(NodeRef::Empty);
    verify_clean(session, "skip first parent")?;

    info!(label, "skipping the last parent");
    let idx = parents!().len() - 2;
    parents!()[idx].set_next_ref(NodeRef::Empty);
    verify_clean(session, "skip last parent")?;

    info!(label, "setting an invalid chain root");
    if is_data {
        session.start_data = NodeRef::Addr(invalid);
    } else {
        session.start_cred = NodeRef::Addr(invalid);
    }
    verify_clean(session, "invalid chain root")?;

    info!(label, "creating a backward pointer loop");
    let second = parents!()[2].self_ref();
    parents!()[5].set_prev_ref(second);
    verify_clean(session, "parent loop")?;

    info!(label, "breaking the linked list outright");
    parents!()[5].set_prev_ref(NodeRef::Addr(invalid));
    parents!()[5].set_next_ref(NodeRef::Addr(invalid));
    verify_clean(session, "broken linked list")?;

    info!(label, "swapping a valid address for a virtual one");
    let victim_addr = parents!()[1].addr();
    session.free_addresses = vec![Address::EMPTY, victim_addr];
    let virt = NodeRef::Virtual(VirtualAddr::new(1));
    parents!()[1].set_virtual_addr(VirtualAddr::new(1));
    parents!()[0].set_next_ref(virt);
    parents!()[2].set_prev_ref(virt);
    resolve_virtual_addresses(session)?;
    session.free_addresses.clear();
    verify_clean(session, "virtual address swap")?;

    Ok(())
}

/// Runs the corruption/repair grid against a cleanly scanned session.
///
/// The session must hold at least seven parents in each list and diff
/// empty on entry.
pub fn test_clean_db_changes(session: &mut MmmSession) -> VaultResult<()> {
    info!("running repair self-test on the scanned database");

    corrupt_parent_chain(session, false)?;
    info!("credential parent corruption grid passed");

    corrupt_parent_chain(session, true)?;
    info!("data parent corruption grid passed");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{add_data_chain, build_clean_session};

    #[test]
    fn test_selftest_passes_on_clean_db() {
        let mut session = build_clean_session(8, 1);
        add_data_chain(&mut session, 8, 1);
        test_clean_db_changes(&mut session).unwrap();
    }

    #[test]
    fn test_selftest_rejects_small_db() {
        let mut session = build_clean_session(3, 0);
        assert!(test_clean_db_changes(&mut session).is_err());
    }
}
