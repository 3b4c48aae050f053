//! The packet-level command queue.
//!
//! A FIFO of single-packet commands with at-most-one outstanding command:
//! only the head has been written to the transport, and the next inbound
//! frame belongs to it. Multi-packet replies keep the head in place until
//! its handler declares itself done.

use std::collections::VecDeque;

use tracing::{debug, warn};
use vault_proto::{CommandId, Frame, Packet};

/// Who gets the reply to a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin {
    /// The running job's current sub-command.
    Job,
    /// The periodic status poller.
    StatusPoll,
}

struct PendingCommand {
    packet: Packet,
    origin: CommandOrigin,
    running: bool,
}

/// Routing decision for one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Deliver to the head's origin. `ok` is false when the reply's
    /// command byte does not match the outstanding command.
    Deliver {
        /// Reply consumer.
        origin: CommandOrigin,
        /// False on a transport mismatch.
        ok: bool,
    },
    /// Logged and dropped; queue state does not advance.
    Ignored,
}

/// FIFO of packet commands with one-outstanding discipline.
#[derive(Default)]
pub struct CommandQueue {
    items: VecDeque<PendingCommand>,
}

impl CommandQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued commands, including the outstanding head.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Command byte of the outstanding head, if any.
    #[must_use]
    pub fn head_cmd(&self) -> Option<u8> {
        self.items.front().map(|c| c.packet.cmd_byte())
    }

    /// Enqueues a command. Returns the frame to write when the command
    /// became the running head.
    pub fn enqueue(&mut self, packet: Packet, origin: CommandOrigin) -> Option<Frame> {
        self.items.push_back(PendingCommand {
            packet,
            origin,
            running: false,
        });
        let head = self.items.front_mut()?;
        if head.running {
            return None;
        }
        head.running = true;
        Some(*head.packet.frame())
    }

    /// Routes one inbound frame.
    pub fn route(&mut self, reply: &Packet) -> Dispatch {
        let Some(head) = self.items.front() else {
            warn!(
                len = reply.len(),
                cmd = format_args!("{:#04x}", reply.cmd_byte()),
                "inbound frame with an empty command queue, dropping"
            );
            return Dispatch::Ignored;
        };

        if reply.cmd_byte() == CommandId::PleaseRetry.as_u8() {
            debug!("device asked for a retry");
            return Dispatch::Ignored;
        }
        if reply.cmd_byte() == CommandId::Debug.as_u8() {
            warn!(payload = %reply.payload_string(), "device debug message");
        }

        let head_multi = CommandId::from_u8(head.packet.cmd_byte())
            .map(CommandId::is_multi_packet)
            .unwrap_or(false);
        let mismatch = reply.cmd_byte() != head.packet.cmd_byte()
            && reply.cmd_byte() != CommandId::Debug.as_u8()
            && !head_multi;
        if mismatch {
            warn!(
                sent = format_args!("{:#04x}", head.packet.cmd_byte()),
                received = format_args!("{:#04x}", reply.cmd_byte()),
                "reply carries an unexpected command byte"
            );
        }

        Dispatch::Deliver {
            origin: head.origin,
            ok: !mismatch,
        }
    }

    /// Dequeues the completed head. Returns the next frame to write when
    /// another command was waiting.
    pub fn complete_head(&mut self) -> Option<Frame> {
        self.items.pop_front();
        let next = self.items.front_mut()?;
        next.running = true;
        Some(*next.packet.frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(cmd: CommandId, payload: &[u8]) -> Packet {
        Packet::new(cmd, payload).unwrap()
    }

    #[test]
    fn test_one_outstanding_command() {
        let mut q = CommandQueue::new();
        // first command is written immediately
        assert!(q.enqueue(pkt(CommandId::Version, &[]), CommandOrigin::Job).is_some());
        // second one waits
        assert!(q
            .enqueue(pkt(CommandId::Status, &[]), CommandOrigin::StatusPoll)
            .is_none());
        assert_eq!(q.len(), 2);

        // completing the head releases the next command
        let next = q.complete_head().unwrap();
        assert_eq!(next[1], CommandId::Status.as_u8());
        assert!(q.complete_head().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_route_empty_queue_drops() {
        let mut q = CommandQueue::new();
        assert_eq!(q.route(&pkt(CommandId::Status, &[5])), Dispatch::Ignored);
    }

    #[test]
    fn test_route_matching_reply() {
        let mut q = CommandQueue::new();
        q.enqueue(pkt(CommandId::GetLogin, &[]), CommandOrigin::Job);
        assert_eq!(
            q.route(&pkt(CommandId::GetLogin, b"bob\0")),
            Dispatch::Deliver {
                origin: CommandOrigin::Job,
                ok: true
            }
        );
    }

    #[test]
    fn test_route_mismatch() {
        let mut q = CommandQueue::new();
        q.enqueue(pkt(CommandId::GetLogin, &[]), CommandOrigin::Job);
        assert_eq!(
            q.route(&pkt(CommandId::Status, &[5])),
            Dispatch::Deliver {
                origin: CommandOrigin::Job,
                ok: false
            }
        );
    }

    #[test]
    fn test_route_multi_packet_exemption() {
        let mut q = CommandQueue::new();
        q.enqueue(pkt(CommandId::GetCardCpzCtr, &[]), CommandOrigin::Job);
        // continuation packets carry a different command byte
        assert_eq!(
            q.route(&pkt(CommandId::CardCpzCtrPacket, &[1, 2, 3])),
            Dispatch::Deliver {
                origin: CommandOrigin::Job,
                ok: true
            }
        );
    }

    #[test]
    fn test_please_retry_does_not_advance() {
        let mut q = CommandQueue::new();
        q.enqueue(pkt(CommandId::GetLogin, &[]), CommandOrigin::Job);
        assert_eq!(q.route(&pkt(CommandId::PleaseRetry, &[])), Dispatch::Ignored);
        assert_eq!(q.len(), 1);
        assert_eq!(q.head_cmd(), Some(CommandId::GetLogin.as_u8()));
    }

    #[test]
    fn test_debug_passed_to_head() {
        let mut q = CommandQueue::new();
        q.enqueue(pkt(CommandId::GetLogin, &[]), CommandOrigin::Job);
        assert_eq!(
            q.route(&pkt(CommandId::Debug, b"oops\0")),
            Dispatch::Deliver {
                origin: CommandOrigin::Job,
                ok: true
            }
        );
    }
}
