//! System-wide constants and limits.

/// Size of every frame exchanged with the device, in bytes.
pub const PACKET_SIZE: usize = 64;

/// Index of the payload-length field within a frame.
pub const LEN_FIELD_INDEX: usize = 0;

/// Index of the command field within a frame.
pub const CMD_FIELD_INDEX: usize = 1;

/// Index of the first payload byte within a frame.
pub const PAYLOAD_FIELD_INDEX: usize = 2;

/// Maximum payload length a frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = PACKET_SIZE - PAYLOAD_FIELD_INDEX;

/// Size of a flash node record, in bytes.
pub const NODE_SIZE: usize = 132;

/// Size of a flash address on the wire, in bytes.
pub const ADDRESS_SIZE: usize = 2;

/// Number of favorite slots on the device.
pub const FAVORITES_COUNT: usize = 14;

/// Size of one data-node streaming block.
pub const DATA_BLOCK_SIZE: usize = 32;

/// Size of the big-endian length header prepended to data-node streams.
pub const DATA_HEADER_SIZE: usize = 4;

/// Maximum service string length, including the zero terminator's slot.
pub const MAX_SERVICE_LENGTH: usize = 121;

/// Maximum login string length.
pub const MAX_LOGIN_LENGTH: usize = 63;

/// Maximum description string length.
pub const MAX_DESCRIPTION_LENGTH: usize = 24;

/// Size of the password ciphertext carried by a credential child node.
pub const CIPHERTEXT_SIZE: usize = 32;

/// Size of the CTR value carried by a credential child node.
pub const NODE_CTR_SIZE: usize = 3;

/// Interval between two status probes, in milliseconds.
pub const STATUS_POLL_INTERVAL_MS: u64 = 500;

/// Maximum consecutive retries for the unlock-time setup jobs
/// (parameter reload, date set, change numbers).
pub const SETUP_JOB_MAX_RETRIES: u32 = 3;

/// Service name under which orphaned credential children are rehomed.
pub const RECOVERED_SERVICE_NAME: &str = "_recovered_";
