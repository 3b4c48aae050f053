//! Parameter I/O and the unlock-time setup jobs.
//!
//! `load_parameters_job` mirrors the device's option bytes into the
//! observable state, one `GET_PARAM` per option, after reading the
//! version reply. The setup jobs re-queue themselves on failure, bounded
//! by a retry cap so a dead device cannot pile retries onto the queue.

use chrono::{Datelike, Local, NaiveDate};
use tracing::{debug, error, info, warn};
use vault_common::types::{KnockSensitivity, Param};
use vault_common::{VaultError, SETUP_JOB_MAX_RETRIES};
use vault_proto::{CommandId, VersionInfo};

use crate::jobs::{Job, SubCommand};
use crate::state::DeviceParams;

fn get_param_sub(param: Param, apply: impl Fn(&mut DeviceParams, u8) + 'static) -> SubCommand {
    SubCommand::new(CommandId::GetParam)
        .payload(vec![param.as_u8()])
        .check(move |ctx, reply| {
            let value = reply.first_payload_byte();
            debug!(?param, value, "parameter loaded");
            apply(&mut ctx.core.state.write().params, value);
            true
        })
}

/// Builds the parameter-reload job: version first, then every mirrored
/// option byte.
pub fn load_parameters_job() -> Job {
    let mut job = Job::new("loading device parameters");

    job.append(SubCommand::new(CommandId::Version).check(|ctx, reply| {
        match VersionInfo::parse(reply) {
            Ok(info) => {
                debug!(flash_mb = info.flash_mb, hw = %info.hw_version, "version loaded");
                ctx.core.state.write().version = Some(info);
                true
            }
            Err(err) => {
                ctx.set_error(err);
                false
            }
        }
    }));

    job.append(get_param_sub(Param::KeyboardLayout, |p, v| {
        p.keyboard_layout = v;
    }));
    job.append(get_param_sub(Param::LockTimeoutEnable, |p, v| {
        p.lock_timeout_enabled = v != 0;
    }));
    job.append(get_param_sub(Param::LockTimeout, |p, v| p.lock_timeout = v));
    job.append(get_param_sub(Param::Screensaver, |p, v| {
        p.screensaver = v != 0;
    }));
    job.append(get_param_sub(Param::UserRequestCancel, |p, v| {
        p.user_request_cancel = v != 0;
    }));
    job.append(get_param_sub(Param::UserInterTimeout, |p, v| {
        p.user_interaction_timeout = v;
    }));
    job.append(get_param_sub(Param::FlashScreen, |p, v| {
        p.flash_screen = v != 0;
    }));
    job.append(get_param_sub(Param::OfflineMode, |p, v| {
        p.offline_mode = v != 0;
    }));
    job.append(get_param_sub(Param::TutorialEnabled, |p, v| {
        p.tutorial_enabled = v != 0;
    }));
    job.append(get_param_sub(Param::ScreenSaverSpeed, |p, v| {
        p.screensaver_speed = v;
    }));
    job.append(get_param_sub(Param::InvertedScreenAtBoot, |p, v| {
        p.inverted_screen = v != 0;
    }));
    job.append(get_param_sub(Param::MiniOledContrast, |p, v| {
        p.screen_brightness = v;
    }));
    job.append(get_param_sub(Param::MiniLedAnimMask, |p, v| {
        p.led_anim_mask = v;
    }));
    job.append(get_param_sub(Param::MiniKnockDetectEnable, |p, v| {
        p.knock_enabled = v != 0;
    }));
    job.append(get_param_sub(Param::MiniKnockThres, |p, v| {
        p.knock_sensitivity = KnockSensitivity::from_threshold(v);
    }));
    job.append(get_param_sub(Param::RandomInitPin, |p, v| {
        p.random_starting_pin = v != 0;
    }));
    job.append(get_param_sub(Param::HashDisplayFeature, |p, v| {
        p.hash_display = v != 0;
    }));
    job.append(get_param_sub(Param::LockUnlockFeature, |p, v| {
        p.lock_unlock_mode = v;
    }));
    job.append(get_param_sub(Param::KeyAfterLoginSendEnable, |p, v| {
        p.key_after_login_enabled = v != 0;
    }));
    job.append(get_param_sub(Param::KeyAfterLoginSend, |p, v| {
        p.key_after_login = v;
    }));
    job.append(get_param_sub(Param::KeyAfterPassSendEnable, |p, v| {
        p.key_after_pass_enabled = v != 0;
    }));
    job.append(get_param_sub(Param::KeyAfterPassSend, |p, v| {
        p.key_after_pass = v;
    }));
    job.append(get_param_sub(Param::DelayAfterKeyEntryEnable, |p, v| {
        p.delay_after_key_enabled = v != 0;
    }));
    job.append(get_param_sub(Param::DelayAfterKeyEntry, |p, v| {
        p.delay_after_key = v;
    }));

    job.on_finished(|core, _, _| {
        info!("finished loading device options");
        core.param_retries = 0;
        let (fw12, mini) = {
            let state = core.state.read();
            (state.is_fw_1_2(), state.is_mini())
        };
        if fw12 && mini {
            info!("mini on firmware 1.2+, requesting serial number");
            core.enqueue_followup(get_serial_job());
        }
    });
    job.on_failed(|core, err| {
        error!(%err, "loading options failed");
        if core.param_retries < SETUP_JOB_MAX_RETRIES {
            core.param_retries += 1;
            core.enqueue_followup(load_parameters_job());
        } else {
            error!("giving up on parameter reload until the next unlock");
        }
    });
    job
}

/// Builds the serial-number query job (mini, firmware 1.2+).
pub fn get_serial_job() -> Job {
    let mut job = Job::new("loading device serial number");
    job.append(SubCommand::new(CommandId::GetSerial).check(|ctx, reply| {
        let payload = reply.payload();
        if payload.len() < 4 {
            ctx.set_error(VaultError::protocol("serial reply shorter than 4 bytes"));
            return false;
        }
        let serial = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        debug!(serial, "serial number loaded");
        ctx.core.state.write().serial = Some(serial);
        true
    }));
    job.on_finished(|_, _, _| info!("finished loading serial number"));
    job.on_failed(|core, err| {
        error!(%err, "loading serial number failed");
        if core.param_retries < SETUP_JOB_MAX_RETRIES {
            core.param_retries += 1;
            core.enqueue_followup(load_parameters_job());
        }
    });
    job
}

/// Encodes a date the way the device stores them: a 16-bit big-endian
/// word of `(year - 2010) << 9 | month << 5 | day`.
#[must_use]
pub fn encode_device_date(date: NaiveDate) -> [u8; 2] {
    let year = (date.year() - 2010).clamp(0, 127) as u16;
    let word = (year << 9) | ((date.month() as u16) << 5) | date.day() as u16;
    word.to_be_bytes()
}

/// Builds the date-set job.
pub fn set_current_date_job() -> Job {
    let mut job = Job::new("send date to device");
    job.append(
        SubCommand::new(CommandId::SetDate)
            .transform(|_, payload| {
                let encoded = encode_device_date(Local::now().date_naive());
                debug!(
                    "sending current date: {:#04x} {:#04x}",
                    encoded[0], encoded[1]
                );
                *payload = encoded.to_vec();
                true
            })
            .check(|_, _| true),
    );
    job.on_finished(|core, _, _| {
        info!("date set");
        core.date_retries = 0;
        if core.state.read().is_fw_1_2() {
            info!("firmware 1.2+, requesting change numbers");
            core.enqueue_followup(get_change_numbers_job());
        }
    });
    job.on_failed(|core, err| {
        warn!(%err, "failed to set the date");
        if core.date_retries < SETUP_JOB_MAX_RETRIES {
            core.date_retries += 1;
            core.enqueue_followup(set_current_date_job());
        }
    });
    job
}

/// Builds the change-number query job (firmware 1.2+).
pub fn get_change_numbers_job() -> Job {
    let mut job = Job::new("loading db change numbers");
    job.append(SubCommand::new(CommandId::GetUserChangeNb).check(|ctx, reply| {
        let payload = reply.payload();
        if payload.first() == Some(&0) || payload.len() < 3 {
            warn!("device could not provide change numbers");
        } else {
            let mut state = ctx.core.state.write();
            state.cred_change_number = payload[1];
            state.data_change_number = payload[2];
            debug!(
                cred = state.cred_change_number,
                data = state.data_change_number,
                "change numbers loaded"
            );
        }
        true
    }));
    job.on_finished(|core, _, _| {
        core.change_nb_retries = 0;
        info!("finished loading change numbers");
    });
    job.on_failed(|core, err| {
        error!(%err, "loading change numbers failed");
        if core.change_nb_retries < SETUP_JOB_MAX_RETRIES {
            core.change_nb_retries += 1;
            core.enqueue_followup(get_change_numbers_job());
        }
    });
    job
}

/// Builds a parameter-update job.
pub fn update_param_job(param: Param, value: u8) -> Job {
    let mut job = Job::new(format!("updating {param:?} to {value}"));
    job.append(SubCommand::new(CommandId::SetParam).payload(vec![param.as_u8(), value]));
    job.on_finished(move |_, _, _| info!(?param, value, "parameter updated"));
    job.on_failed(move |_, err| warn!(?param, %err, "failed to update parameter"));
    job
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_device_date() {
        let date = NaiveDate::from_ymd_opt(2016, 3, 7).unwrap();
        let bytes = encode_device_date(date);
        let word = u16::from_be_bytes(bytes);
        assert_eq!(word >> 9, 6);
        assert_eq!((word >> 5) & 0x0F, 3);
        assert_eq!(word & 0x1F, 7);
    }

    #[test]
    fn test_load_parameters_job_shape() {
        let job = load_parameters_job();
        assert_eq!(job.label(), "loading device parameters");
        // version + 24 parameters
        assert_eq!(job.subs.len(), 25);
        assert_eq!(job.subs[0].command(), CommandId::Version);
        assert!(job.subs[1..]
            .iter()
            .all(|s| s.command() == CommandId::GetParam));
    }

    #[test]
    fn test_update_param_payload() {
        let job = update_param_job(Param::MiniKnockThres, 11);
        assert_eq!(job.subs.len(), 1);
        assert_eq!(job.subs[0].payload, vec![Param::MiniKnockThres.as_u8(), 11]);
    }
}
