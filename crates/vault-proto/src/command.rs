//! Device command enumeration.

use vault_common::{VaultError, VaultResult};

/// One-byte command codes understood by the device.
///
/// The full firmware command space is carried here; the protocol engine
/// only gives guarantees for the credential, data-node, parameter and
/// memory-management commands. Flash/EEPROM import-export, keystroke
/// injection and card cloning exist in the enumeration only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum CommandId {
    ExportFlashStart = 0x8A,
    ExportFlash = 0x8B,
    ExportFlashEnd = 0x8C,
    ImportFlashBegin = 0x8D,
    ImportFlash = 0x8E,
    ImportFlashEnd = 0x8F,
    ExportEepromStart = 0x90,
    ExportEeprom = 0x91,
    ExportEepromEnd = 0x92,
    ImportEepromBegin = 0x93,
    ImportEeprom = 0x94,
    ImportEepromEnd = 0x95,
    EraseEeprom = 0x96,
    EraseFlash = 0x97,
    EraseSmartcard = 0x98,
    DrawBitmap = 0x99,
    SetFont = 0x9A,
    UsbKeyboardPress = 0x9B,
    StackFree = 0x9C,
    CloneSmartcard = 0x9D,
    Debug = 0xA0,
    Ping = 0xA1,
    Version = 0xA2,
    Context = 0xA3,
    GetLogin = 0xA4,
    GetPassword = 0xA5,
    SetLogin = 0xA6,
    SetPassword = 0xA7,
    CheckPassword = 0xA8,
    AddContext = 0xA9,
    SetBootloaderPwd = 0xAA,
    JumpToBootloader = 0xAB,
    GetRandomNumber = 0xAC,
    StartMemoryMgmt = 0xAD,
    ImportMediaStart = 0xAE,
    ImportMedia = 0xAF,
    ImportMediaEnd = 0xB0,
    SetParam = 0xB1,
    GetParam = 0xB2,
    ResetCard = 0xB3,
    ReadCardLogin = 0xB4,
    ReadCardPass = 0xB5,
    SetCardLogin = 0xB6,
    SetCardPass = 0xB7,
    AddUnknownCard = 0xB8,
    Status = 0xB9,
    FunctionalTestRes = 0xBA,
    SetDate = 0xBB,
    SetUid = 0xBC,
    GetUid = 0xBD,
    SetDataService = 0xBE,
    AddDataService = 0xBF,
    Write32BInDn = 0xC0,
    Read32BInDn = 0xC1,
    CancelUserRequest = 0xC3,
    PleaseRetry = 0xC4,
    ReadFlashNode = 0xC5,
    WriteFlashNode = 0xC6,
    GetFavorite = 0xC7,
    SetFavorite = 0xC8,
    GetStartingParent = 0xC9,
    SetStartingParent = 0xCA,
    GetCtrValue = 0xCB,
    SetCtrValue = 0xCC,
    AddCardCpzCtr = 0xCD,
    GetCardCpzCtr = 0xCE,
    CardCpzCtrPacket = 0xCF,
    Get30FreeSlots = 0xD0,
    GetDnStartParent = 0xD1,
    SetDnStartParent = 0xD2,
    EndMemoryMgmt = 0xD3,
    SetUserChangeNb = 0xD4,
    GetDescription = 0xD5,
    GetUserChangeNb = 0xD6,
    SetDescription = 0xD8,
    LockDevice = 0xD9,
    GetSerial = 0xDA,
}

impl CommandId {
    /// Returns the command byte.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a command byte, failing on values outside the table.
    pub fn from_u8(value: u8) -> VaultResult<Self> {
        use CommandId::*;
        Ok(match value {
            0x8A => ExportFlashStart,
            0x8B => ExportFlash,
            0x8C => ExportFlashEnd,
            0x8D => ImportFlashBegin,
            0x8E => ImportFlash,
            0x8F => ImportFlashEnd,
            0x90 => ExportEepromStart,
            0x91 => ExportEeprom,
            0x92 => ExportEepromEnd,
            0x93 => ImportEepromBegin,
            0x94 => ImportEeprom,
            0x95 => ImportEepromEnd,
            0x96 => EraseEeprom,
            0x97 => EraseFlash,
            0x98 => EraseSmartcard,
            0x99 => DrawBitmap,
            0x9A => SetFont,
            0x9B => UsbKeyboardPress,
            0x9C => StackFree,
            0x9D => CloneSmartcard,
            0xA0 => Debug,
            0xA1 => Ping,
            0xA2 => Version,
            0xA3 => Context,
            0xA4 => GetLogin,
            0xA5 => GetPassword,
            0xA6 => SetLogin,
            0xA7 => SetPassword,
            0xA8 => CheckPassword,
            0xA9 => AddContext,
            0xAA => SetBootloaderPwd,
            0xAB => JumpToBootloader,
            0xAC => GetRandomNumber,
            0xAD => StartMemoryMgmt,
            0xAE => ImportMediaStart,
            0xAF => ImportMedia,
            0xB0 => ImportMediaEnd,
            0xB1 => SetParam,
            0xB2 => GetParam,
            0xB3 => ResetCard,
            0xB4 => ReadCardLogin,
            0xB5 => ReadCardPass,
            0xB6 => SetCardLogin,
            0xB7 => SetCardPass,
            0xB8 => AddUnknownCard,
            0xB9 => Status,
            0xBA => FunctionalTestRes,
            0xBB => SetDate,
            0xBC => SetUid,
            0xBD => GetUid,
            0xBE => SetDataService,
            0xBF => AddDataService,
            0xC0 => Write32BInDn,
            0xC1 => Read32BInDn,
            0xC3 => CancelUserRequest,
            0xC4 => PleaseRetry,
            0xC5 => ReadFlashNode,
            0xC6 => WriteFlashNode,
            0xC7 => GetFavorite,
            0xC8 => SetFavorite,
            0xC9 => GetStartingParent,
            0xCA => SetStartingParent,
            0xCB => GetCtrValue,
            0xCC => SetCtrValue,
            0xCD => AddCardCpzCtr,
            0xCE => GetCardCpzCtr,
            0xCF => CardCpzCtrPacket,
            0xD0 => Get30FreeSlots,
            0xD1 => GetDnStartParent,
            0xD2 => SetDnStartParent,
            0xD3 => EndMemoryMgmt,
            0xD4 => SetUserChangeNb,
            0xD5 => GetDescription,
            0xD6 => GetUserChangeNb,
            0xD8 => SetDescription,
            0xD9 => LockDevice,
            0xDA => GetSerial,
            other => {
                return Err(VaultError::protocol(format!(
                    "unknown command byte {other:#04x}"
                )))
            }
        })
    }

    /// True for commands whose reply legitimately spans several packets
    /// with differing command bytes or repeated frames.
    #[must_use]
    pub const fn is_multi_packet(self) -> bool {
        matches!(
            self,
            Self::GetCardCpzCtr | Self::ReadFlashNode | Self::Read32BInDn
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_roundtrip() {
        for byte in 0x8A..=0xDA {
            if let Ok(cmd) = CommandId::from_u8(byte) {
                assert_eq!(cmd.as_u8(), byte);
            }
        }
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(CommandId::Status.as_u8(), 0xB9);
        assert_eq!(CommandId::PleaseRetry.as_u8(), 0xC4);
        assert_eq!(CommandId::Debug.as_u8(), 0xA0);
        assert_eq!(CommandId::GetSerial.as_u8(), 0xDA);
    }

    #[test]
    fn test_gaps_rejected() {
        // 0xC2 and 0xD7 are unassigned in the firmware command space
        assert!(CommandId::from_u8(0xC2).is_err());
        assert!(CommandId::from_u8(0xD7).is_err());
        assert!(CommandId::from_u8(0x00).is_err());
    }

    #[test]
    fn test_multi_packet_commands() {
        assert!(CommandId::GetCardCpzCtr.is_multi_packet());
        assert!(CommandId::ReadFlashNode.is_multi_packet());
        assert!(CommandId::Read32BInDn.is_multi_packet());
        assert!(!CommandId::GetLogin.is_multi_packet());
    }
}
