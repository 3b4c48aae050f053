//! 64-byte packet framing.
//!
//! Layout:
//! - byte 0: payload length `L` in `[0, 62]`
//! - byte 1: command code
//! - bytes `[2..2 + L)`: payload
//! - remaining bytes: don't-care

use bytes::BufMut;
use vault_common::types::Address;
use vault_common::{
    VaultError, VaultResult, CMD_FIELD_INDEX, LEN_FIELD_INDEX, MAX_PAYLOAD_SIZE, PACKET_SIZE,
    PAYLOAD_FIELD_INDEX,
};

use crate::command::CommandId;

/// Raw 64-byte frame as moved by the transport.
pub type Frame = [u8; PACKET_SIZE];

/// A framed device packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    frame: Frame,
}

impl Packet {
    /// Builds a packet for `cmd` carrying `payload`.
    ///
    /// Fails with `ProtocolInvariant` if the payload exceeds 62 bytes.
    pub fn new(cmd: CommandId, payload: &[u8]) -> VaultResult<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(VaultError::protocol(format!(
                "payload of {} bytes exceeds the {} byte frame capacity",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        let mut frame = [0u8; PACKET_SIZE];
        let mut cursor = &mut frame[..];
        cursor.put_u8(payload.len() as u8);
        cursor.put_u8(cmd.as_u8());
        cursor.put_slice(payload);
        Ok(Self { frame })
    }

    /// Builds a payload-less packet for `cmd`.
    pub fn bare(cmd: CommandId) -> Self {
        let mut frame = [0u8; PACKET_SIZE];
        frame[CMD_FIELD_INDEX] = cmd.as_u8();
        Self { frame }
    }

    /// Wraps a raw frame without validation.
    #[inline]
    #[must_use]
    pub const fn from_frame(frame: Frame) -> Self {
        Self { frame }
    }

    /// Returns the raw frame.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Consumes the packet, returning the raw frame.
    #[inline]
    #[must_use]
    pub const fn into_frame(self) -> Frame {
        self.frame
    }

    /// Declared payload length, clamped to the frame capacity.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        (self.frame[LEN_FIELD_INDEX] as usize).min(MAX_PAYLOAD_SIZE)
    }

    /// True when the declared payload length is zero.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frame[LEN_FIELD_INDEX] == 0
    }

    /// Raw command byte.
    #[inline]
    #[must_use]
    pub const fn cmd_byte(&self) -> u8 {
        self.frame[CMD_FIELD_INDEX]
    }

    /// Decoded command, failing on bytes outside the command table.
    pub fn command(&self) -> VaultResult<CommandId> {
        CommandId::from_u8(self.cmd_byte())
    }

    /// Payload bytes, as declared by the length field.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.frame[PAYLOAD_FIELD_INDEX..PAYLOAD_FIELD_INDEX + self.len()]
    }

    /// First payload byte, or 0 for an empty payload.
    #[inline]
    #[must_use]
    pub fn first_payload_byte(&self) -> u8 {
        self.frame[PAYLOAD_FIELD_INDEX]
    }

    /// True for the single-byte refusal reply (payload `[0x00]`).
    #[must_use]
    pub fn is_refusal(&self) -> bool {
        self.frame[LEN_FIELD_INDEX] == 1 && self.first_payload_byte() == 0
    }

    /// True for the single-byte acknowledgement reply (payload `[0x01]`).
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.frame[LEN_FIELD_INDEX] == 1 && self.first_payload_byte() == 1
    }

    /// Payload interpreted as a UTF-8 string up to its zero terminator.
    ///
    /// Invalid UTF-8 is replaced, matching how the device's own strings
    /// are always host-generated and valid in practice.
    #[must_use]
    pub fn payload_string(&self) -> String {
        let payload = self.payload();
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        String::from_utf8_lossy(&payload[..end]).into_owned()
    }

    /// Decodes a little-endian address at `offset` within the payload.
    pub fn payload_addr(&self, offset: usize) -> VaultResult<Address> {
        let payload = self.payload();
        if offset + 2 > payload.len() {
            return Err(VaultError::protocol(format!(
                "address at payload offset {offset} exceeds payload of {} bytes",
                payload.len()
            )));
        }
        Ok(Address::from_bytes([payload[offset], payload[offset + 1]]))
    }
}

/// Appends a zero-terminated UTF-8 string to a payload buffer.
pub fn put_string(payload: &mut Vec<u8>, s: &str) {
    payload.extend_from_slice(s.as_bytes());
    payload.push(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_layout() {
        let pkt = Packet::new(CommandId::Context, b"gmail\0").unwrap();
        assert_eq!(pkt.frame()[0], 6);
        assert_eq!(pkt.frame()[1], 0xA3);
        assert_eq!(pkt.payload(), b"gmail\0");
        assert_eq!(pkt.payload_string(), "gmail");
    }

    #[test]
    fn test_packet_oversized_payload() {
        let payload = [0u8; 63];
        assert!(Packet::new(CommandId::Context, &payload).is_err());
        let payload = [0u8; 62];
        assert!(Packet::new(CommandId::Context, &payload).is_ok());
    }

    #[test]
    fn test_refusal_and_ack() {
        let refusal = Packet::new(CommandId::GetLogin, &[0]).unwrap();
        assert!(refusal.is_refusal());
        assert!(!refusal.is_ack());

        let ack = Packet::new(CommandId::Context, &[1]).unwrap();
        assert!(ack.is_ack());
        assert!(!ack.is_refusal());
    }

    #[test]
    fn test_payload_addr() {
        let pkt = Packet::new(CommandId::GetStartingParent, &[0x00, 0x04]).unwrap();
        let addr = pkt.payload_addr(0).unwrap();
        assert_eq!(addr.page(), 128);
        assert!(pkt.payload_addr(1).is_err());
    }

    #[test]
    fn test_length_clamped() {
        let mut frame = [0u8; PACKET_SIZE];
        frame[0] = 0xFF; // lies about its length
        frame[1] = CommandId::Debug.as_u8();
        let pkt = Packet::from_frame(frame);
        assert_eq!(pkt.len(), MAX_PAYLOAD_SIZE);
    }
}
