//! Data-node streaming jobs.
//!
//! Data blobs move in 32-byte blocks. On the wire a stored blob is
//! prefixed with its big-endian 32-bit size; readers strip the prefix and
//! hand the caller exactly that many bytes.

use tracing::{debug, warn};
use vault_common::{VaultError, DATA_BLOCK_SIZE, DATA_HEADER_SIZE};
use vault_proto::CommandId;

use crate::jobs::{Job, SubCommand};
use crate::ops::credentials::splice_add_context;
use crate::ops::{context_bytes, fire, shared, Completion};
use crate::state::ProgressFn;

const STREAM_KEY: &str = "stream";
const DATA_KEY: &str = "data";

/// Builds the streaming read job for a data service.
pub fn get_data_node_job(
    service: String,
    fallback_service: String,
    reqid: &str,
    progress: Option<ProgressFn>,
    cb: Completion<(String, Vec<u8>)>,
) -> Job {
    let mut job = Job::new(format!(
        "get data node for service: {service} fallback: {fallback_service}"
    ))
    .with_request_id(reqid)
    .with_progress(progress);

    let svc = service.clone();
    job.append(
        SubCommand::new(CommandId::SetDataService)
            .payload(context_bytes(&service))
            .check(move |ctx, reply| {
                if !reply.is_ack() {
                    if !fallback_service.is_empty() {
                        let fb = fallback_service.clone();
                        ctx.prepend(
                            SubCommand::new(CommandId::SetDataService)
                                .payload(context_bytes(&fallback_service))
                                .check(move |ctx, reply| {
                                    if !reply.is_ack() {
                                        ctx.set_error(VaultError::refused(
                                            "data context selection (fallback included)",
                                        ));
                                        return false;
                                    }
                                    ctx.set_str("service", &fb);
                                    true
                                }),
                        );
                        return true;
                    }
                    ctx.set_error(VaultError::refused("data context selection"));
                    return false;
                }
                ctx.set_str("service", &svc);
                true
            }),
    );

    job.append(read_block_sub());

    let done = shared(cb);
    let failed = done.clone();
    job.on_finished(move |_, _, user_data| {
        let service = user_data
            .get("service")
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let stream = user_data.get(DATA_KEY).cloned().unwrap_or_default();
        if stream.len() < DATA_HEADER_SIZE {
            fire(
                &done,
                Err(VaultError::protocol("data stream shorter than its header")),
            );
            return;
        }
        let size =
            u32::from_be_bytes([stream[0], stream[1], stream[2], stream[3]]) as usize;
        if stream.len() < DATA_HEADER_SIZE + size {
            fire(
                &done,
                Err(VaultError::protocol(format!(
                    "data stream truncated: header claims {size} bytes, got {}",
                    stream.len() - DATA_HEADER_SIZE
                ))),
            );
            return;
        }
        debug!(size, "data node read");
        let bytes = stream[DATA_HEADER_SIZE..DATA_HEADER_SIZE + size].to_vec();
        fire(&done, Ok((service, bytes)));
    });
    job.on_failed(move |_, err| fire(&failed, Err(err)));
    job
}

/// One streaming read step; splices the next step until the device
/// signals end-of-data.
fn read_block_sub() -> SubCommand {
    SubCommand::new(CommandId::Read32BInDn).check(|ctx, reply| {
        if reply.len() == 1 && reply.first_payload_byte() == 0 {
            // End of data.
            if ctx.get_bytes(DATA_KEY).is_none() {
                ctx.set_error(VaultError::refused("data read (no data at all)"));
                return false;
            }
            return true;
        }

        if !reply.is_empty() {
            ctx.extend_bytes(DATA_KEY, reply.payload());
            let received = ctx.get_bytes(DATA_KEY).map_or(0, Vec::len);
            let total = ctx
                .get_bytes(DATA_KEY)
                .filter(|d| d.len() >= DATA_HEADER_SIZE)
                .map_or(0, |d| {
                    u32::from_be_bytes([d[0], d[1], d[2], d[3]]) as usize
                });
            ctx.report_progress(total, received.saturating_sub(DATA_HEADER_SIZE));
            ctx.append(read_block_sub());
        }
        true
    })
}

/// Builds the streaming write job for a data service.
pub fn set_data_node_job(
    service: String,
    data: Vec<u8>,
    reqid: &str,
    progress: Option<ProgressFn>,
    cb: Completion<()>,
) -> Job {
    let mut job = Job::new(format!("set data node for service: {service}"))
        .with_request_id(reqid)
        .with_progress(progress);

    // The stored stream carries its size up front.
    let mut stream = (data.len() as u32).to_be_bytes().to_vec();
    stream.extend_from_slice(&data);
    job.seed_bytes(STREAM_KEY, stream);

    let svc = service.clone();
    job.append(
        SubCommand::new(CommandId::SetDataService)
            .payload(context_bytes(&service))
            .check(move |ctx, reply| {
                if !reply.is_ack() {
                    warn!(service = %svc, "data context does not exist, creating it");
                    splice_add_context(ctx, &svc, true);
                } else {
                    debug!(service = %svc, "data context selected");
                }
                true
            }),
    );

    job.append(write_block_sub(0));

    let done = shared(cb);
    let failed = done.clone();
    job.on_finished(move |_, _, _| fire(&done, Ok(())));
    job.on_failed(move |_, err| fire(&failed, Err(err)));
    job
}

/// One streaming write step: sends `[eod, block]` for the 32-byte block
/// at `offset`, splicing the next step while data remains.
fn write_block_sub(offset: usize) -> SubCommand {
    SubCommand::new(CommandId::Write32BInDn)
        .transform(move |ctx, payload| {
            let stream = ctx.get_bytes(STREAM_KEY).cloned().unwrap_or_default();
            let end = (offset + DATA_BLOCK_SIZE).min(stream.len());
            let eod = u8::from(end >= stream.len());
            let mut block = vec![eod];
            block.extend_from_slice(&stream[offset.min(stream.len())..end]);
            block.resize(DATA_BLOCK_SIZE + 1, 0);
            *payload = block;
            true
        })
        .check(move |ctx, reply| {
            if reply.first_payload_byte() == 0 {
                ctx.set_error(VaultError::refused("data write"));
                return false;
            }
            let stream_len = ctx.get_bytes(STREAM_KEY).map_or(0, Vec::len);
            let next = offset + DATA_BLOCK_SIZE;
            if next < stream_len {
                ctx.report_progress(stream_len - DATA_HEADER_SIZE, next);
                ctx.append(write_block_sub(next));
            }
            true
        })
}
