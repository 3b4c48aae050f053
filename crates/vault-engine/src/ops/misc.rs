//! Small one-command jobs: random bytes, UID query, ping.

use tracing::{debug, info};
use vault_common::VaultError;
use vault_proto::CommandId;

use crate::jobs::{Job, SubCommand};
use crate::ops::{fire, shared, Completion};

/// Builds the random-number job; the device returns 32 bytes.
pub fn get_random_job(cb: Completion<Vec<u8>>) -> Job {
    let mut job = Job::new("get random bytes from device");
    job.append(SubCommand::new(CommandId::GetRandomNumber).check(|_, _| true));

    let done = shared(cb);
    let failed = done.clone();
    job.on_finished(move |_, reply, _| {
        info!("random bytes generated");
        fire(&done, Ok(reply.payload().to_vec()));
    });
    job.on_failed(move |_, err| fire(&failed, Err(err)));
    job
}

/// Builds the UID query job; `key` authenticates the request.
pub fn get_uid_job(key: [u8; 16], cb: Completion<u64>) -> Job {
    let mut job = Job::new("query device UID");
    job.append(
        SubCommand::new(CommandId::GetUid)
            .payload(key.to_vec())
            .check(|ctx, reply| {
                if reply.len() == 1 {
                    ctx.set_error(VaultError::refused("UID query"));
                    return false;
                }
                let payload = reply.payload();
                if payload.len() < 8 {
                    ctx.set_error(VaultError::protocol("UID reply shorter than 8 bytes"));
                    return false;
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&payload[..8]);
                let uid = u64::from_be_bytes(bytes);
                debug!(uid, "UID read");
                ctx.core.state.write().uid = Some(uid);
                true
            }),
    );

    let done = shared(cb);
    let failed = done.clone();
    job.on_finished(move |core, _, _| {
        let uid = core.state.read().uid.unwrap_or_default();
        fire(&done, Ok(uid));
    });
    job.on_failed(move |core, err| {
        core.state.write().uid = None;
        fire(&failed, Err(err));
    });
    job
}

/// Builds a ping job; the device echoes the frame.
pub fn ping_job(cb: Completion<()>) -> Job {
    let mut job = Job::new("ping device");
    job.append(SubCommand::new(CommandId::Ping).check(|_, _| true));

    let done = shared(cb);
    let failed = done.clone();
    job.on_finished(move |_, _, _| fire(&done, Ok(())));
    job.on_failed(move |_, err| fire(&failed, Err(err)));
    job
}
