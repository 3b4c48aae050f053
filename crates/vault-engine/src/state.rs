//! Observable device state and the engine-internal core shared with job
//! callbacks.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use vault_common::types::{DeviceStatus, KnockSensitivity};
use vault_db::MmmSession;
use vault_proto::VersionInfo;

use crate::jobs::Job;

/// Progress callback: `(total, current)`.
pub type ProgressFn = Box<dyn FnMut(usize, usize)>;

/// Snapshot of the device parameters the engine mirrors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct DeviceParams {
    pub keyboard_layout: u8,
    pub lock_timeout_enabled: bool,
    pub lock_timeout: u8,
    pub screensaver: bool,
    pub user_request_cancel: bool,
    pub user_interaction_timeout: u8,
    pub flash_screen: bool,
    pub offline_mode: bool,
    pub tutorial_enabled: bool,
    pub screensaver_speed: u8,
    pub inverted_screen: bool,
    pub screen_brightness: u8,
    pub led_anim_mask: u8,
    pub knock_enabled: bool,
    pub knock_sensitivity: KnockSensitivity,
    pub random_starting_pin: bool,
    pub hash_display: bool,
    pub lock_unlock_mode: u8,
    pub key_after_login_enabled: bool,
    pub key_after_login: u8,
    pub key_after_pass_enabled: bool,
    pub key_after_pass: u8,
    pub delay_after_key_enabled: bool,
    pub delay_after_key: u8,
}

/// Observable state of the attached device.
///
/// Host threads read this through the shared handle returned by
/// [`VaultEngine::state`](crate::VaultEngine::state); the engine is the
/// only writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceState {
    /// Last polled device status.
    pub status: DeviceStatus,
    /// Version reply contents, once loaded.
    pub version: Option<VersionInfo>,
    /// Serial number (mini devices on firmware 1.2+).
    pub serial: Option<u32>,
    /// UID, when queried.
    pub uid: Option<u64>,
    /// Mirrored parameter values.
    pub params: DeviceParams,
    /// True while a Memory Management Mode session is active.
    pub mem_mgmt_mode: bool,
    /// Credentials database change number (firmware 1.2+).
    pub cred_change_number: u8,
    /// Data database change number (firmware 1.2+).
    pub data_change_number: u8,
}

impl DeviceState {
    /// True for firmware v1.2 or later.
    #[must_use]
    pub fn is_fw_1_2(&self) -> bool {
        self.version.as_ref().is_some_and(|v| v.is_fw_1_2)
    }

    /// True for the mini hardware variant.
    #[must_use]
    pub fn is_mini(&self) -> bool {
        self.version.as_ref().is_some_and(|v| v.is_mini)
    }

    /// Reported flash size in megabits, defaulting to the largest
    /// geometry class when the version is not loaded yet.
    #[must_use]
    pub fn flash_mb(&self) -> u8 {
        self.version.as_ref().map_or(8, |v| v.flash_mb)
    }
}

/// Engine internals exposed to job callbacks.
///
/// Sub-command checks receive `&mut EngineCore` through their
/// [`JobCtx`](crate::JobCtx): the observable state, the MMM session, the
/// scan progress plumbing, and a follow-up list for jobs a callback wants
/// enqueued after the current dispatch.
pub struct EngineCore {
    /// Observable device state (engine is the only writer).
    pub state: Arc<RwLock<DeviceState>>,
    /// MMM session state, populated by the scanners.
    pub session: MmmSession,
    /// Jobs to enqueue once the current dispatch finishes.
    pub followups: Vec<Job>,
    /// Progress denominator.
    pub progress_total: usize,
    /// Progress numerator.
    pub progress_current: usize,
    /// Per-letter progress share contributed by the credential scan.
    pub progress_login: usize,
    /// Per-letter progress share contributed by the data scan.
    pub progress_data: usize,
    /// Consecutive parameter-reload failures.
    pub param_retries: u32,
    /// Consecutive date-set failures.
    pub date_retries: u32,
    /// Consecutive change-number failures.
    pub change_nb_retries: u32,
}

impl EngineCore {
    /// Creates a core with fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(DeviceState::default())),
            session: MmmSession::new(),
            followups: Vec::new(),
            progress_total: 0,
            progress_current: 0,
            progress_login: 0,
            progress_data: 0,
            param_retries: 0,
            date_retries: 0,
            change_nb_retries: 0,
        }
    }

    /// Enqueues a job to run after the current dispatch.
    pub fn enqueue_followup(&mut self, job: Job) {
        self.followups.push(job);
    }
}

impl Default for EngineCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_mb_default() {
        let state = DeviceState::default();
        assert_eq!(state.flash_mb(), 8);
        assert!(!state.is_fw_1_2());
    }

    #[test]
    fn test_followups_collected() {
        let mut core = EngineCore::new();
        core.enqueue_followup(Job::new("later"));
        assert_eq!(core.followups.len(), 1);
        assert_eq!(core.followups[0].label(), "later");
    }
}
