//! Version reply parsing.

use serde::{Deserialize, Serialize};
use vault_common::{VaultError, VaultResult};

use crate::packet::Packet;

/// Parsed contents of a version reply.
///
/// The payload is `[flash_mb, hw_version...]` where the hardware version
/// looks like `v1.2` or `v1.2_mini`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Flash size in megabits.
    pub flash_mb: u8,
    /// Raw hardware version string.
    pub hw_version: String,
    /// True for firmware v1.2 or later.
    pub is_fw_1_2: bool,
    /// True for the mini hardware variant.
    pub is_mini: bool,
}

impl VersionInfo {
    /// Parses a version reply packet.
    pub fn parse(reply: &Packet) -> VaultResult<Self> {
        let payload = reply.payload();
        if payload.is_empty() {
            return Err(VaultError::protocol("version reply carried no payload"));
        }
        let flash_mb = payload[0];
        let hw_version = String::from_utf8_lossy(&payload[1..])
            .trim_end_matches('\0')
            .to_string();

        let (is_fw_1_2, is_mini) = parse_hw_version(&hw_version);
        Ok(Self {
            flash_mb,
            hw_version,
            is_fw_1_2,
            is_mini,
        })
    }
}

/// Extracts the firmware flags from a `v<major>.<minor><suffix>` string.
fn parse_hw_version(hw: &str) -> (bool, bool) {
    let Some(rest) = hw.strip_prefix('v') else {
        return (false, false);
    };
    let mut parts = rest.splitn(2, '.');
    let Some(major) = parts.next().and_then(|p| p.parse::<u32>().ok()) else {
        return (false, false);
    };
    let Some(tail) = parts.next() else {
        return (false, false);
    };
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    let Ok(minor) = digits.parse::<u32>() else {
        return (false, false);
    };
    let suffix = &tail[digits.len()..];
    (major * 10 + minor >= 12, suffix == "_mini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandId;

    fn version_reply(flash_mb: u8, hw: &str) -> Packet {
        let mut payload = vec![flash_mb];
        payload.extend_from_slice(hw.as_bytes());
        Packet::new(CommandId::Version, &payload).unwrap()
    }

    #[test]
    fn test_version_mini_fw12() {
        let info = VersionInfo::parse(&version_reply(4, "v1.2_mini")).unwrap();
        assert_eq!(info.flash_mb, 4);
        assert_eq!(info.hw_version, "v1.2_mini");
        assert!(info.is_fw_1_2);
        assert!(info.is_mini);
    }

    #[test]
    fn test_version_old_firmware() {
        let info = VersionInfo::parse(&version_reply(8, "v1.1")).unwrap();
        assert!(!info.is_fw_1_2);
        assert!(!info.is_mini);
    }

    #[test]
    fn test_version_newer_firmware() {
        let info = VersionInfo::parse(&version_reply(16, "v2.0")).unwrap();
        assert!(info.is_fw_1_2);
        assert!(!info.is_mini);
    }

    #[test]
    fn test_version_garbage_suffix_tolerated() {
        let info = VersionInfo::parse(&version_reply(1, "v1.0_emul")).unwrap();
        assert!(!info.is_fw_1_2);
        assert!(!info.is_mini);
        assert_eq!(info.hw_version, "v1.0_emul");
    }

    #[test]
    fn test_version_empty_payload_rejected() {
        let pkt = Packet::new(CommandId::Version, &[]).unwrap();
        assert!(VersionInfo::parse(&pkt).is_err());
    }
}
