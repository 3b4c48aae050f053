//! Device parameter enumeration.
//!
//! Parameter ids are a fixed byte space shared with the device firmware;
//! the historical touch-tuning entries are kept so the ids of everything
//! after them stay correct.

use serde::{Deserialize, Serialize};

/// Identifier of a device parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Param {
    UserInitKey = 0,
    KeyboardLayout = 1,
    UserInterTimeout = 2,
    LockTimeoutEnable = 3,
    LockTimeout = 4,
    TouchDi = 5,
    TouchWheelOsOld = 6,
    TouchProxOs = 7,
    OfflineMode = 8,
    Screensaver = 9,
    TouchChargeTime = 10,
    TouchWheelOs0 = 11,
    TouchWheelOs1 = 12,
    TouchWheelOs2 = 13,
    FlashScreen = 14,
    UserRequestCancel = 15,
    TutorialEnabled = 16,
    ScreenSaverSpeed = 17,
    LutBootPopulating = 18,
    KeyAfterLoginSendEnable = 19,
    KeyAfterLoginSend = 20,
    KeyAfterPassSendEnable = 21,
    KeyAfterPassSend = 22,
    DelayAfterKeyEntryEnable = 23,
    DelayAfterKeyEntry = 24,
    InvertedScreenAtBoot = 25,
    MiniOledContrast = 26,
    MiniLedAnimMask = 27,
    MiniKnockDetectEnable = 28,
    MiniKnockThres = 29,
    LockUnlockFeature = 30,
    HashDisplayFeature = 31,
    RandomInitPin = 32,
}

impl Param {
    /// Returns the parameter id byte.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Knock detector sensitivity, as exposed to the host.
///
/// The firmware stores a raw accelerometer threshold; lower thresholds
/// trigger more easily.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnockSensitivity {
    /// Raw threshold 11.
    Low,
    /// Raw threshold 8.
    #[default]
    Medium,
    /// Raw threshold 5.
    High,
}

impl KnockSensitivity {
    /// Maps a raw firmware threshold to a sensitivity level.
    ///
    /// Unrecognized thresholds map to `Medium`.
    #[must_use]
    pub fn from_threshold(raw: u8) -> Self {
        match raw {
            11 => Self::Low,
            5 => Self::High,
            _ => Self::Medium,
        }
    }

    /// Raw firmware threshold for this sensitivity level.
    #[must_use]
    pub const fn threshold(self) -> u8 {
        match self {
            Self::Low => 11,
            Self::Medium => 8,
            Self::High => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_ids_stable() {
        assert_eq!(Param::KeyboardLayout.as_u8(), 1);
        assert_eq!(Param::FlashScreen.as_u8(), 14);
        assert_eq!(Param::MiniKnockThres.as_u8(), 29);
        assert_eq!(Param::RandomInitPin.as_u8(), 32);
    }

    #[test]
    fn test_knock_mapping() {
        assert_eq!(KnockSensitivity::from_threshold(11), KnockSensitivity::Low);
        assert_eq!(KnockSensitivity::from_threshold(8), KnockSensitivity::Medium);
        assert_eq!(KnockSensitivity::from_threshold(5), KnockSensitivity::High);
        // unknown raw values fall back to medium
        assert_eq!(KnockSensitivity::from_threshold(7), KnockSensitivity::Medium);

        assert_eq!(KnockSensitivity::Low.threshold(), 11);
        assert_eq!(KnockSensitivity::Medium.threshold(), 8);
        assert_eq!(KnockSensitivity::High.threshold(), 5);
    }
}
