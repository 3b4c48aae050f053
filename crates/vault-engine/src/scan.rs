//! Flash scanning.
//!
//! Two strategies populate the MMM session: chain-follow (walk the linked
//! lists the device advertises) and full-page scan (read every node slot
//! from the first non-graphics address to the end of flash). Both record
//! a byte-for-byte clone of every parsed node for the write-back diff.
//!
//! The device streams each node as three packets; the per-node
//! accumulation lives in the sub-command's check closure, and the "read
//! the next node" recursion of the original is expressed by splicing
//! follow-up sub-commands into the running job.

use tracing::{debug, info};
use vault_common::types::{Address, FlashLayout};
use vault_common::{VaultError, FAVORITES_COUNT, NODE_SIZE, PACKET_SIZE};
use vault_db::{FavoriteSlot, Node, NodeRef};
use vault_proto::CommandId;

use crate::jobs::{Job, JobCtx, SubCommand};

/// Appends the flash-read sequence to an MMM job: CTR, CPZ/CTR records,
/// favorites, then the chain roots. With `full_scan` the roots only seed
/// the session and every node slot is read instead.
pub(crate) fn append_mmm_read(job: &mut Job, full_scan: bool) {
    job.append(SubCommand::new(CommandId::GetCtrValue).check(|ctx, reply| {
        if reply.len() == 1 {
            ctx.set_error(VaultError::refused("CTR value read"));
            return false;
        }
        let ctr = reply.payload().to_vec();
        debug!(len = ctr.len(), "CTR value loaded");
        ctx.core.session.ctr.clone_from(&ctr);
        ctx.core.session.ctr_clone = ctr;

        ctx.core.progress_total = 200 + FAVORITES_COUNT;
        ctx.core.progress_current = 0;
        ctx.core.progress_login = 0;
        ctx.core.progress_data = 0;
        let (t, c) = (ctx.core.progress_total, ctx.core.progress_current);
        ctx.report_progress(t, c);
        true
    }));

    // The device answers with CPZ/CTR packets, then a terminating frame
    // carrying the original command byte.
    job.append(SubCommand::new(CommandId::GetCardCpzCtr).check(|ctx, reply| {
        if reply.cmd_byte() == CommandId::CardCpzCtrPacket.as_u8() {
            ctx.core.session.adopt_cpz_ctr(reply.payload().to_vec());
            ctx.keep_waiting();
            true
        } else if reply.cmd_byte() == CommandId::GetCardCpzCtr.as_u8() {
            debug!("all CPZ/CTR records received");
            true
        } else {
            ctx.set_error(VaultError::protocol(format!(
                "unexpected command {:#04x} in the CPZ/CTR stream",
                reply.cmd_byte()
            )));
            false
        }
    }));

    for i in 0..FAVORITES_COUNT {
        job.append(
            SubCommand::new(CommandId::GetFavorite)
                .payload(vec![i as u8])
                .check(move |ctx, reply| {
                    if i == 0 {
                        info!("loading favorites");
                    }
                    if reply.len() == 1 {
                        ctx.set_error(VaultError::refused("favorite read"));
                        return false;
                    }
                    let slot = FavoriteSlot::from_payload(reply.payload());
                    ctx.core.session.favorites[i] = slot;
                    ctx.core.session.favorites_clone[i] = slot;
                    ctx.core.progress_current += 1;
                    let (t, c) = (ctx.core.progress_total, ctx.core.progress_current);
                    ctx.report_progress(t, c);
                    true
                }),
        );
    }

    job.append(SubCommand::new(CommandId::GetStartingParent).check(move |ctx, reply| {
        if reply.len() == 1 {
            ctx.set_error(VaultError::refused("starting parent read"));
            return false;
        }
        let addr = match reply.payload_addr(0) {
            Ok(a) => a,
            Err(err) => {
                ctx.set_error(err);
                return false;
            }
        };
        debug!(%addr, "credential chain root");
        ctx.core.session.start_cred = NodeRef::from_addr(addr);
        ctx.core.session.start_cred_clone = NodeRef::from_addr(addr);
        if addr.is_valid() && !full_scan {
            info!("loading credential parent nodes");
            ctx.append(load_cred_parent_sub(addr));
        }
        true
    }));

    job.append(SubCommand::new(CommandId::GetDnStartParent).check(move |ctx, reply| {
        if reply.len() == 1 {
            ctx.set_error(VaultError::refused("data starting parent read"));
            return false;
        }
        let addr = match reply.payload_addr(0) {
            Ok(a) => a,
            Err(err) => {
                ctx.set_error(err);
                return false;
            }
        };
        debug!(%addr, "data chain root");
        ctx.core.session.start_data = NodeRef::from_addr(addr);
        ctx.core.session.start_data_clone = NodeRef::from_addr(addr);
        if addr.is_valid() && !full_scan {
            // Data children are streamed on demand; only the parents are
            // needed for their service names.
            info!("loading data parent nodes");
            ctx.append(load_data_parent_sub(addr));
        }
        if full_scan {
            let layout = FlashLayout::new(ctx.core.state.read().flash_mb());
            info!(
                pages = layout.page_count(),
                "starting full flash scan"
            );
            ctx.append(scan_slot_sub(layout, layout.first_node_addr()));
        }
        true
    }));
}

/// Per-letter progress heuristic used by the chain scan.
fn letter_share(service: &str) -> Option<usize> {
    let first = service.chars().next()?.to_ascii_lowercase();
    let letter = (first as u8).min(b'z') as usize;
    Some(letter * 100 / b'z' as usize)
}

fn node_read_failed(ctx: &mut JobCtx<'_>, what: &str) -> bool {
    ctx.set_error(VaultError::corrupt(format!(
        "couldn't read {what}, card removed or database corrupted"
    )));
    false
}

fn load_cred_parent_sub(addr: Address) -> SubCommand {
    let mut acc: Vec<u8> = Vec::new();
    SubCommand::new(CommandId::ReadFlashNode)
        .payload(addr.to_bytes().to_vec())
        .check(move |ctx, reply| {
            if reply.len() == 1 {
                return node_read_failed(ctx, "parent node");
            }
            acc.extend_from_slice(reply.payload());
            if acc.len() < NODE_SIZE {
                ctx.keep_waiting();
                return true;
            }
            let mut image = [0u8; NODE_SIZE];
            image.copy_from_slice(&acc[..NODE_SIZE]);
            let node = Node::from_image(addr, image);

            let service = node.service();
            debug!(%addr, service = %service, "parent node loaded");
            if let Some(share) = letter_share(&service) {
                ctx.core.progress_login = share;
                ctx.core.progress_current =
                    ctx.core.progress_data + ctx.core.progress_login + FAVORITES_COUNT;
                let (t, c) = (ctx.core.progress_total, ctx.core.progress_current);
                ctx.report_progress(t, c);
            }

            let first_child = node.first_child_ref();
            let next = node.next_ref();
            ctx.core.session.adopt_scanned(node);

            if let NodeRef::Addr(child) = first_child {
                debug!(service = %service, "loading child nodes");
                ctx.prepend(load_cred_child_sub(child));
            }
            if let NodeRef::Addr(next) = next {
                ctx.append(load_cred_parent_sub(next));
            }
            true
        })
}

fn load_cred_child_sub(addr: Address) -> SubCommand {
    let mut acc: Vec<u8> = Vec::new();
    SubCommand::new(CommandId::ReadFlashNode)
        .payload(addr.to_bytes().to_vec())
        .check(move |ctx, reply| {
            if reply.len() == 1 {
                return node_read_failed(ctx, "child node");
            }
            acc.extend_from_slice(reply.payload());
            if acc.len() < NODE_SIZE {
                ctx.keep_waiting();
                return true;
            }
            let mut image = [0u8; NODE_SIZE];
            image.copy_from_slice(&acc[..NODE_SIZE]);
            let node = Node::from_image(addr, image);
            debug!(%addr, login = %node.login(), "child node loaded");

            let next = node.next_ref();
            ctx.core.session.adopt_scanned(node);
            if let NodeRef::Addr(next) = next {
                ctx.prepend(load_cred_child_sub(next));
            }
            true
        })
}

fn load_data_parent_sub(addr: Address) -> SubCommand {
    let mut acc: Vec<u8> = Vec::new();
    SubCommand::new(CommandId::ReadFlashNode)
        .payload(addr.to_bytes().to_vec())
        .check(move |ctx, reply| {
            if reply.len() == 1 {
                return node_read_failed(ctx, "data node");
            }
            acc.extend_from_slice(reply.payload());
            if acc.len() < NODE_SIZE {
                ctx.keep_waiting();
                return true;
            }
            let mut image = [0u8; NODE_SIZE];
            image.copy_from_slice(&acc[..NODE_SIZE]);
            let node = Node::from_image(addr, image);

            let service = node.service();
            debug!(%addr, service = %service, "data parent node loaded");
            if let Some(share) = letter_share(&service) {
                ctx.core.progress_data = share;
                ctx.core.progress_current =
                    ctx.core.progress_data + ctx.core.progress_login + FAVORITES_COUNT;
                let (t, c) = (ctx.core.progress_total, ctx.core.progress_current);
                ctx.report_progress(t, c);
            }

            let next = node.next_ref();
            ctx.core.session.adopt_scanned(node);
            if let NodeRef::Addr(next) = next {
                ctx.append(load_data_parent_sub(next));
            }
            true
        })
}

fn scan_slot_sub(layout: FlashLayout, addr: Address) -> SubCommand {
    let mut acc: Vec<u8> = Vec::new();
    SubCommand::new(CommandId::ReadFlashNode)
        .payload(addr.to_bytes().to_vec())
        .check(move |ctx, reply| {
            if addr.page() != ctx.core.session.last_page_scanned {
                ctx.core.session.last_page_scanned = addr.page();
                ctx.report_progress(layout.page_count() as usize, addr.page() as usize);
            }

            if reply.len() == 1 {
                // Not allowed to read: the slot is free.
                ctx.core.session.free_addresses.push(addr);
                ctx.core.session.scan_bytes_received += PACKET_SIZE as u64;
                if let Some(next) = layout.next_node_addr(addr) {
                    ctx.prepend(scan_slot_sub(layout, next));
                }
                return true;
            }

            acc.extend_from_slice(reply.payload());
            if acc.len() < NODE_SIZE {
                ctx.keep_waiting();
                return true;
            }
            ctx.core.session.scan_bytes_received += 3 * PACKET_SIZE as u64;

            let mut image = [0u8; NODE_SIZE];
            image.copy_from_slice(&acc[..NODE_SIZE]);
            let node = Node::from_image(addr, image);
            if node.is_valid() {
                debug!(%addr, kind = ?node.kind(), "node classified");
                ctx.core.session.adopt_scanned(node);
            }

            if let Some(next) = layout.next_node_addr(addr) {
                ctx.prepend(scan_slot_sub(layout, next));
            }
            true
        })
}
