//! Memory Management Mode entry/exit and the integrity check.

use tracing::{error, info, warn};
use vault_db::{check_loaded_nodes, test_clean_db_changes, CheckReport};
use vault_proto::CommandId;

use crate::jobs::{Job, SubCommand};
use crate::ops::{fire, shared, Completion};
use crate::scan;
use crate::state::{EngineCore, ProgressFn};

/// Builds the MMM entry job: put the device in management mode and
/// mirror the flash database with the chain-follow scan.
pub fn start_mmm_job(progress: Option<ProgressFn>, cb: Completion<()>) -> Job {
    let mut job = Job::new("starting memory management mode").with_progress(progress);

    job.append(SubCommand::new(CommandId::StartMemoryMgmt));
    scan::append_mmm_read(&mut job, false);

    let done = shared(cb);
    let failed = done.clone();
    job.on_finished(move |core, _, _| {
        info!("memory management mode enabled");
        core.state.write().mem_mgmt_mode = true;
        fire(&done, Ok(()));
    });
    job.on_failed(move |core, err| {
        error!(%err, "entering memory management mode failed");
        core.session.clear();
        core.enqueue_followup(forced_exit_job());
        fire(&failed, Err(err));
    });
    job
}

/// Leaves MMM after a failed entry; both outcomes drop the session.
fn forced_exit_job() -> Job {
    let mut job = Job::new("leaving memory management mode after failure");
    job.append(SubCommand::new(CommandId::EndMemoryMgmt));
    job.on_finished(|core, _, _| clear_mmm(core));
    job.on_failed(|core, _| clear_mmm(core));
    job
}

fn clear_mmm(core: &mut EngineCore) {
    core.session.clear();
    core.state.write().mem_mgmt_mode = false;
}

/// Builds the MMM exit job.
///
/// With `check_first`, the loaded database is verified (no repairs)
/// before leaving. Session state is dropped on both outcomes; an exit
/// failure is logged but still surfaces through the callback.
pub fn exit_mmm_job(check_first: bool, cb: Completion<()>) -> Job {
    let mut job = Job::new("exiting memory management mode");

    if check_first {
        job.append(SubCommand::new(CommandId::EndMemoryMgmt).transform(|ctx, _| {
            let report = check_loaded_nodes(&mut ctx.core.session, false);
            if !report.ok {
                warn!("database check on exit found errors");
            }
            true
        }));
    } else {
        job.append(SubCommand::new(CommandId::EndMemoryMgmt));
    }

    let done = shared(cb);
    let failed = done.clone();
    job.on_finished(move |core, _, _| {
        info!("memory management mode exit ok");
        clear_mmm(core);
        fire(&done, Ok(()));
    });
    job.on_failed(move |core, err| {
        warn!(%err, "failed to exit memory management mode");
        clear_mmm(core);
        fire(&failed, Err(err));
    });
    job
}

/// Builds the integrity-check job: full flash scan, sort, check and
/// repair in memory, optionally the repair self-test, then leave MMM.
pub fn integrity_check_job(
    run_selftest: bool,
    progress: Option<ProgressFn>,
    cb: Completion<CheckReport>,
) -> Job {
    let mut job = Job::new("starting integrity check").with_progress(progress);

    job.append(SubCommand::new(CommandId::StartMemoryMgmt));
    scan::append_mmm_read(&mut job, true);

    let done = shared(cb);
    let failed = done.clone();
    job.on_finished(move |core, _, _| {
        info!(
            bytes = core.session.scan_bytes_received,
            "finished loading the flash contents"
        );

        // The on-device order is not guaranteed sorted; orphan
        // re-insertion relies on the alphabetical invariant.
        core.session.sort_parents_by_service();

        let report = check_loaded_nodes(&mut core.session, true);
        if run_selftest {
            if let Err(err) = test_clean_db_changes(&mut core.session) {
                error!(%err, "repair self-test failed");
                core.enqueue_followup(finish_integrity_job(done.clone(), Err(err)));
                return;
            }
        }
        core.enqueue_followup(finish_integrity_job(done.clone(), Ok(report)));
    });
    job.on_failed(move |core, err| {
        error!(%err, "scanning the flash memory failed");
        core.session.clear();
        fire(&failed, Err(err));
    });
    job
}

/// Final leg of the integrity check: leave MMM and report the outcome.
fn finish_integrity_job(
    done: crate::ops::SharedCompletion<CheckReport>,
    outcome: vault_common::VaultResult<CheckReport>,
) -> Job {
    let mut job = Job::new("checking memory contents done, leaving MMM");
    job.append(SubCommand::new(CommandId::EndMemoryMgmt));

    let failed = done.clone();
    // The session is left in place for the host to inspect; the next
    // scan starts from a cleared session either way.
    job.on_finished(move |_, _, _| {
        info!("finished checking memory contents");
        fire(&done, outcome);
    });
    job.on_failed(move |_, err| {
        error!(%err, "couldn't leave memory management mode");
        fire(&failed, Err(err));
    });
    job
}
