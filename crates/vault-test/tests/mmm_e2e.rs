//! End-to-end tests for Memory Management Mode: chain scan, full scan,
//! in-memory repair, and the diff against the scan-time clones.

use vault_common::types::Address;
use vault_db::{check_loaded_nodes, generate_save_ops, tag_pointed_nodes};
use vault_proto::CommandId;
use vault_test::{capture, result_slot, taken, unlocked_engine};

#[test]
fn test_chain_follow_scan() {
    let mut engine = unlocked_engine(1, "v1.2");
    engine.transport_mut().install_cred_tree(&[
        ("gmail", &["alice"]),
        ("github", &["bob"]),
        ("hn", &["carol"]),
    ]);
    engine.transport_mut().add_cpz_record(vec![7; 8]);

    let result = result_slot();
    engine.start_mmm(None, capture(&result));
    engine.pump();
    taken(&result).expect("MMM entry should succeed");
    assert!(engine.state().read().mem_mgmt_mode);

    let session = engine.session_mut();
    assert_eq!(session.cred_parents.len(), 3);
    assert_eq!(session.cred_children.len(), 3);
    assert_eq!(session.cpz_ctr.len(), 1);

    // the linked structure is intact as scanned
    assert!(tag_pointed_nodes(session, false));

    // sorting by service yields the alphabetical order
    let mut services: Vec<String> = session.cred_parents.iter().map(|p| p.service()).collect();
    services.sort();
    assert_eq!(services, vec!["github", "gmail", "hn"]);

    // every parsed node was cloned byte-for-byte
    for (live, clone) in session
        .cred_parents
        .iter()
        .zip(session.cred_parents_clone.iter())
    {
        assert_eq!(live.image(), clone.image());
    }
}

#[test]
fn test_scan_progress_reported() {
    let mut engine = unlocked_engine(1, "v1.2");
    engine
        .transport_mut()
        .install_cred_tree(&[("gmail", &["alice"])]);

    let calls = std::rc::Rc::new(std::cell::RefCell::new(0usize));
    let sink = calls.clone();
    let result = result_slot();
    engine.start_mmm(
        Some(Box::new(move |_, _| *sink.borrow_mut() += 1)),
        capture(&result),
    );
    engine.pump();
    taken(&result).expect("MMM entry should succeed");
    assert!(*calls.borrow() > 0);
}

#[test]
fn test_mmm_entry_failure_forces_exit() {
    let mut engine = unlocked_engine(1, "v1.2");
    engine.transport_mut().refuse(CommandId::GetCtrValue);

    let result = result_slot();
    engine.start_mmm(None, capture(&result));
    engine.pump();
    taken(&result).expect_err("refused CTR read must fail the entry");

    assert!(!engine.state().read().mem_mgmt_mode);
    assert!(engine.session_mut().cred_parents.is_empty());
    // the engine forced an exit on the device
    assert!(engine
        .transport_mut()
        .wire_log()
        .iter()
        .any(|p| p.cmd_byte() == CommandId::EndMemoryMgmt.as_u8()));
}

#[test]
fn test_exit_mmm_clears_session() {
    let mut engine = unlocked_engine(1, "v1.2");
    engine
        .transport_mut()
        .install_cred_tree(&[("gmail", &["alice"])]);

    let entered = result_slot();
    engine.start_mmm(None, capture(&entered));
    engine.pump();
    taken(&entered).expect("MMM entry");

    let exited = result_slot();
    engine.exit_mmm(true, capture(&exited));
    engine.pump();
    taken(&exited).expect("MMM exit");

    assert!(!engine.state().read().mem_mgmt_mode);
    assert!(engine.session_mut().cred_parents.is_empty());
    assert!(engine.session_mut().ctr.is_empty());
}

#[test]
fn test_loop_repair_emits_no_writes() {
    let mut engine = unlocked_engine(1, "v1.2");
    // seven alphabetical parents, one child each
    let tree: Vec<(String, &str)> = (0..7).map(|i| (format!("svc{i:02}"), "user")).collect();
    let entries: Vec<(&str, &[&str])> = tree
        .iter()
        .map(|(s, l)| (s.as_str(), std::slice::from_ref(l)))
        .collect();
    engine.transport_mut().install_cred_tree(&entries);

    let result = result_slot();
    engine.start_mmm(None, capture(&result));
    engine.pump();
    taken(&result).expect("MMM entry");

    let session = engine.session_mut();
    // corrupt a backward pointer in memory
    let bad = session.cred_parents[2].self_ref();
    session.cred_parents[5].set_prev_ref(bad);
    assert!(!tag_pointed_nodes(session, false));

    // repair fixes it and converges
    check_loaded_nodes(session, true);
    assert!(tag_pointed_nodes(session, false));

    // the on-flash original was correct, so the diff is empty
    assert!(generate_save_ops(session).unwrap().is_empty());
}

#[test]
fn test_full_scan_covers_all_nodes_and_free_slots() {
    let mut engine = unlocked_engine(1, "v1.2");
    engine.transport_mut().install_cred_tree(&[
        ("gmail", &["alice"]),
        ("github", &["bob"]),
        ("hn", &["carol"]),
    ]);
    engine
        .transport_mut()
        .install_data_tree(&[("backup", 2)]);

    let result = result_slot();
    engine.start_integrity_check(false, None, capture(&result));
    engine.pump();
    let report = taken(&result).expect("integrity check should run");
    assert!(report.ok, "clean database must check out: {report:?}");

    let session = engine.session_mut();
    let union = session.cred_parents.len()
        + session.cred_children.len()
        + session.data_parents.len()
        + session.data_children.len();
    assert_eq!(union, 9);

    // 1 Mb flash: pages 128..512, two slots per page, minus the nodes
    let total_slots = (512 - 128) * 2;
    assert_eq!(session.free_addresses.len(), total_slots - union);

    // every pointer resolves within the scanned union or is EMPTY
    assert!(tag_pointed_nodes(session, false));
}

#[test]
fn test_full_scan_geometry_on_32mb_flash() {
    let mut engine = unlocked_engine(32, "v1.2");
    engine
        .transport_mut()
        .install_cred_tree(&[("gmail", &["alice"])]);

    let result = result_slot();
    engine.start_integrity_check(false, None, capture(&result));
    engine.pump();
    let report = taken(&result).expect("integrity check should run");
    assert!(report.ok, "clean database must check out: {report:?}");

    let session = engine.session_mut();
    assert_eq!(session.cred_parents.len(), 1);
    assert_eq!(session.cred_children.len(), 1);
    // 32 Mb parts use two slots per page; the scan walks the 13-bit
    // addressable page space past the graphics zone
    let scanned_slots = (0x2000 - 128) * 2;
    assert_eq!(session.free_addresses.len(), scanned_slots - 2);
}

#[test]
fn test_integrity_check_zeroes_dangling_favorite() {
    let mut engine = unlocked_engine(1, "v1.2");
    engine
        .transport_mut()
        .install_cred_tree(&[("gmail", &["alice"])]);
    engine.transport_mut().set_favorite(
        0,
        Address::from_page_and_slot(260, 0),
        Address::from_page_and_slot(260, 1),
    );

    let result = result_slot();
    engine.start_integrity_check(false, None, capture(&result));
    engine.pump();
    let report = taken(&result).expect("integrity check should run");

    assert!(!report.ok);
    assert_eq!(report.dangling_favorites, 1);
    assert!(!engine.session_mut().favorites[0].is_set());
}

#[test]
fn test_integrity_check_with_selftest() {
    let mut engine = unlocked_engine(1, "v1.2");
    let tree: Vec<String> = (0..8).map(|i| format!("svc{i:02}")).collect();
    let entries: Vec<(&str, &[&str])> =
        tree.iter().map(|s| (s.as_str(), &["user"][..])).collect();
    engine.transport_mut().install_cred_tree(&entries);
    let data: Vec<(String, usize)> = (0..8).map(|i| (format!("data{i:02}"), 1)).collect();
    let data_entries: Vec<(&str, usize)> =
        data.iter().map(|(s, n)| (s.as_str(), *n)).collect();
    engine.transport_mut().install_data_tree(&data_entries);

    let result = result_slot();
    engine.start_integrity_check(true, None, capture(&result));
    engine.pump();
    let report = taken(&result).expect("self-test must pass on a clean database");
    assert!(report.ok);
}

#[test]
fn test_orphaned_parent_recovered_by_full_scan() {
    let mut engine = unlocked_engine(1, "v1.2");
    engine.transport_mut().install_cred_tree(&[
        ("aaa", &["u1"]),
        ("bbb", &["u2"]),
        ("ccc", &["u3"]),
    ]);

    // break the chain on flash: aaa now skips straight to ccc
    let a = Address::from_page_and_slot(130, 0);
    let b = Address::from_page_and_slot(131, 0);
    let c = Address::from_page_and_slot(132, 0);
    {
        let flash = engine.transport_mut().flash_mut();
        let img_a = flash.get_mut(&a.as_u16()).unwrap();
        img_a[4..6].copy_from_slice(&c.to_bytes());
        let img_c = flash.get_mut(&c.as_u16()).unwrap();
        img_c[2..4].copy_from_slice(&a.to_bytes());
        let _ = b;
    }

    let result = result_slot();
    engine.start_integrity_check(false, None, capture(&result));
    engine.pump();
    let report = taken(&result).expect("integrity check should run");
    assert!(!report.ok);
    assert_eq!(report.orphan_cred_parents, 1);

    // after repair the chain is whole again and alphabetical
    let session = engine.session_mut();
    assert!(tag_pointed_nodes(session, false));
    let mut services = Vec::new();
    let mut cur = session.start_cred;
    while let Some(idx) = vault_db::find_node(&session.cred_parents, cur) {
        services.push(session.cred_parents[idx].service());
        cur = session.cred_parents[idx].next_ref();
    }
    assert_eq!(services, vec!["aaa", "bbb", "ccc"]);

    // the repair re-linked bbb, so exactly its neighbors changed
    let ops = generate_save_ops(session).unwrap();
    assert!(!ops.is_empty());
}

#[test]
fn test_second_mmm_entry_scans_fresh() {
    let mut engine = unlocked_engine(1, "v1.2");
    engine
        .transport_mut()
        .install_cred_tree(&[("gmail", &["alice"])]);

    for _ in 0..2 {
        let entered = result_slot();
        engine.start_mmm(None, capture(&entered));
        engine.pump();
        taken(&entered).expect("MMM entry");
        assert_eq!(engine.session_mut().cred_parents.len(), 1);

        let exited = result_slot();
        engine.exit_mmm(false, capture(&exited));
        engine.pump();
        taken(&exited).expect("MMM exit");
    }
}
