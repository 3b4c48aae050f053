//! The engine facade.
//!
//! Owns the transport, the command queue, the job engine, and the MMM
//! session. The host drives it by calling [`VaultEngine::pump`] whenever
//! inbound frames may be available and [`VaultEngine::tick`] on a timer;
//! everything else happens through the high-level operation methods.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use vault_common::types::{DeviceStatus, KnockSensitivity, Param};
use vault_common::{VaultError, VaultResult};
use vault_db::CheckReport;
use vault_proto::{CommandId, Frame, Packet};
use vault_transport::Transport;

use crate::jobs::{Job, JobCtx, JobEngine};
use crate::ops::{self, Credential};
use crate::params;
use crate::poller::StatusPoller;
use crate::queue::{CommandOrigin, CommandQueue, Dispatch};
use crate::state::{DeviceState, EngineCore, ProgressFn};

fn clamp_byte(value: i32) -> u8 {
    value.clamp(0, 0xFF) as u8
}

/// Protocol engine for one attached device.
pub struct VaultEngine<T: Transport> {
    transport: T,
    queue: CommandQueue,
    jobs: JobEngine,
    core: EngineCore,
    poller: StatusPoller,
}

impl<T: Transport> VaultEngine<T> {
    /// Creates an engine over the given transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            queue: CommandQueue::new(),
            jobs: JobEngine::new(),
            core: EngineCore::new(),
            poller: StatusPoller::new(),
        }
    }

    /// Shared handle to the observable device state.
    #[must_use]
    pub fn state(&self) -> Arc<RwLock<DeviceState>> {
        self.core.state.clone()
    }

    /// Last polled device status.
    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        self.core.state.read().status
    }

    /// True while a job is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.jobs.is_busy()
    }

    /// Access to the transport, mainly for tests driving an emulator.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Drains and processes every inbound frame the transport has.
    pub fn pump(&mut self) {
        while self.pump_one() {}
    }

    /// Processes at most one inbound frame. Returns false when the
    /// transport had nothing; useful for tests stepping the engine.
    pub fn pump_one(&mut self) -> bool {
        match self.transport.recv() {
            Some(frame) => {
                self.on_frame(frame);
                true
            }
            None => false,
        }
    }

    /// Drives the periodic status probe.
    pub fn tick(&mut self, now: Instant) {
        if self.poller.poll_due(now) {
            self.send_command(Packet::bare(CommandId::Status), CommandOrigin::StatusPoll);
        }
    }

    fn write_frame(&mut self, frame: Frame) {
        if let Err(err) = self.transport.send(frame) {
            warn!(%err, "transport write failed");
        }
    }

    fn send_command(&mut self, packet: Packet, origin: CommandOrigin) {
        if let Some(frame) = self.queue.enqueue(packet, origin) {
            self.write_frame(frame);
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        let reply = Packet::from_frame(frame);
        match self.queue.route(&reply) {
            Dispatch::Ignored => {}
            Dispatch::Deliver { origin, ok } => {
                let done = match origin {
                    CommandOrigin::Job => self.deliver_to_job(ok, &reply),
                    CommandOrigin::StatusPoll => self.deliver_to_poller(ok, &reply),
                };
                if done {
                    if let Some(next) = self.queue.complete_head() {
                        self.write_frame(next);
                    }
                }
                self.after_dispatch();
            }
        }
    }

    /// Routes a reply to the running job's current sub-command. Returns
    /// true when the outstanding command is complete.
    fn deliver_to_job(&mut self, ok: bool, reply: &Packet) -> bool {
        let Some(job) = self.jobs.current.as_mut() else {
            warn!("job reply arrived with no running job");
            return true;
        };

        if job.cancelled {
            let job = self.jobs.current.take().expect("running job");
            job.fail(&mut self.core, VaultError::Cancelled);
            return true;
        }

        let cursor = job.cursor;
        if cursor >= job.subs.len() {
            warn!("job reply arrived past the last sub-command");
            return true;
        }

        if !ok {
            let sent = job.subs[cursor].cmd.as_u8();
            let job = self.jobs.current.take().expect("running job");
            job.fail(
                &mut self.core,
                VaultError::TransportMismatch {
                    sent,
                    received: reply.cmd_byte(),
                },
            );
            return true;
        }

        let mut check = job.subs[cursor].check.take();
        let (passed, more, splices) = {
            let mut ctx = JobCtx {
                core: &mut self.core,
                user_data: &mut job.user_data,
                error: &mut job.error,
                progress: &mut job.progress,
                splices: Vec::new(),
                more: false,
            };
            let passed = match check.as_mut() {
                Some(f) => f(&mut ctx, reply),
                None => reply.is_ack(),
            };
            (passed, ctx.more, ctx.splices)
        };
        job.subs[cursor].check = check;

        if !passed {
            let err = job.error.take().unwrap_or_else(|| {
                VaultError::refused(format!("command {:#04x}", job.subs[cursor].cmd.as_u8()))
            });
            let job = self.jobs.current.take().expect("running job");
            job.fail(&mut self.core, err);
            return true;
        }

        job.apply_splices(splices);
        if more {
            // Multi-packet reply: the command stays outstanding.
            return false;
        }

        job.cursor += 1;
        job.awaiting_reply = false;
        if job.cursor >= job.subs.len() {
            let job = self.jobs.current.take().expect("running job");
            job.finish(&mut self.core, reply);
        }
        true
    }

    /// Handles a status probe reply; edge-triggers the unlock-time setup
    /// jobs.
    fn deliver_to_poller(&mut self, ok: bool, reply: &Packet) -> bool {
        if !ok {
            return true;
        }
        if reply.cmd_byte() == CommandId::Status.as_u8() {
            let status = DeviceStatus::from_byte(reply.first_payload_byte());
            let old = self.core.state.read().status;
            if status != old || status == DeviceStatus::Unknown {
                debug!(?status, ?old, "device status changed");
                if status == DeviceStatus::Unlocked || old == DeviceStatus::Unknown {
                    self.core.enqueue_followup(params::load_parameters_job());
                    self.core.enqueue_followup(params::set_current_date_job());
                }
            }
            self.core.state.write().status = status;
        }
        true
    }

    fn after_dispatch(&mut self) {
        loop {
            self.drain_followups();
            self.advance_jobs();
            // a job failing before its first send may have queued
            // follow-ups of its own
            if self.core.followups.is_empty() {
                return;
            }
        }
    }

    fn drain_followups(&mut self) {
        while !self.core.followups.is_empty() {
            let jobs: Vec<Job> = self.core.followups.drain(..).collect();
            for job in jobs {
                self.jobs.enqueue(job);
            }
        }
    }

    fn advance_jobs(&mut self) {
        loop {
            match self.jobs.current.as_ref().map(|j| j.awaiting_reply) {
                Some(true) => return,
                Some(false) => {
                    if self.send_current_sub() {
                        return;
                    }
                    // the job failed before sending; try the next one
                }
                None => {
                    let Some(job) = self.jobs.pop_next() else { return };
                    debug!(job = %job.label(), "starting job");
                    self.jobs.current = Some(job);
                }
            }
        }
    }

    /// Sends the running job's current sub-command. Returns true when a
    /// command went out and the job awaits its reply.
    fn send_current_sub(&mut self) -> bool {
        let Some(job) = self.jobs.current.as_mut() else {
            return false;
        };

        if job.cursor >= job.subs.len() {
            let job = self.jobs.current.take().expect("running job");
            let empty = Packet::bare(CommandId::Debug);
            job.finish(&mut self.core, &empty);
            return false;
        }

        let cursor = job.cursor;
        let mut payload = std::mem::take(&mut job.subs[cursor].payload);
        let mut transform = job.subs[cursor].transform.take();
        let mut passed = true;
        let mut splices = Vec::new();
        if let Some(f) = transform.as_mut() {
            let mut ctx = JobCtx {
                core: &mut self.core,
                user_data: &mut job.user_data,
                error: &mut job.error,
                progress: &mut job.progress,
                splices: Vec::new(),
                more: false,
            };
            passed = f(&mut ctx, &mut payload);
            splices = ctx.splices;
        }
        job.subs[cursor].transform = transform;
        job.subs[cursor].payload.clone_from(&payload);

        if !passed {
            let err = job
                .error
                .take()
                .unwrap_or_else(|| VaultError::internal("pre-send transform failed"));
            let job = self.jobs.current.take().expect("running job");
            job.fail(&mut self.core, err);
            return false;
        }
        job.apply_splices(splices);

        let packet = match Packet::new(job.subs[cursor].cmd, &payload) {
            Ok(p) => p,
            Err(err) => {
                let job = self.jobs.current.take().expect("running job");
                job.fail(&mut self.core, err);
                return false;
            }
        };
        job.awaiting_reply = true;
        self.send_command(packet, CommandOrigin::Job);
        true
    }

    fn enqueue_job(&mut self, job: Job) {
        self.jobs.enqueue(job);
        self.after_dispatch();
    }

    // ------------------------------------------------------------------
    // High-level operations
    // ------------------------------------------------------------------

    /// Retrieves a credential; the device may prompt the user.
    pub fn get_credential(
        &mut self,
        service: &str,
        login: &str,
        fallback_service: &str,
        reqid: &str,
        cb: impl FnOnce(VaultResult<Credential>) + 'static,
    ) {
        if service.is_empty() {
            cb(Err(VaultError::input_invalid("service is empty")));
            return;
        }
        let job = ops::credentials::get_credential_job(
            service.to_string(),
            login.to_string(),
            fallback_service.to_string(),
            reqid,
            Box::new(cb),
        );
        self.enqueue_job(job);
    }

    /// Stores or updates a credential.
    pub fn set_credential(
        &mut self,
        service: &str,
        login: &str,
        password: &str,
        description: &str,
        set_description: bool,
        cb: impl FnOnce(VaultResult<()>) + 'static,
    ) {
        if service.is_empty() || login.is_empty() {
            warn!("service or login is empty");
            cb(Err(VaultError::input_invalid("service or login is empty")));
            return;
        }
        let fw_1_2 = self.core.state.read().is_fw_1_2();
        let job = ops::credentials::set_credential_job(
            service.to_string(),
            login.to_string(),
            password.to_string(),
            description.to_string(),
            set_description,
            fw_1_2,
            Box::new(cb),
        );
        self.enqueue_job(job);
    }

    /// Streams a data blob out of the device.
    pub fn get_data_node(
        &mut self,
        service: &str,
        fallback_service: &str,
        reqid: &str,
        progress: Option<ProgressFn>,
        cb: impl FnOnce(VaultResult<(String, Vec<u8>)>) + 'static,
    ) {
        if service.is_empty() {
            cb(Err(VaultError::input_invalid("service is empty")));
            return;
        }
        let job = ops::data::get_data_node_job(
            service.to_string(),
            fallback_service.to_string(),
            reqid,
            progress,
            Box::new(cb),
        );
        self.enqueue_job(job);
    }

    /// Streams a data blob into the device.
    pub fn set_data_node(
        &mut self,
        service: &str,
        data: &[u8],
        reqid: &str,
        progress: Option<ProgressFn>,
        cb: impl FnOnce(VaultResult<()>) + 'static,
    ) {
        if service.is_empty() {
            cb(Err(VaultError::input_invalid("service is empty")));
            return;
        }
        let job = ops::data::set_data_node_job(
            service.to_string(),
            data.to_vec(),
            reqid,
            progress,
            Box::new(cb),
        );
        self.enqueue_job(job);
    }

    /// Asks the device for 32 random bytes.
    pub fn get_random(&mut self, cb: impl FnOnce(VaultResult<Vec<u8>>) + 'static) {
        self.enqueue_job(ops::misc::get_random_job(Box::new(cb)));
    }

    /// Queries the device UID with the given key.
    pub fn get_uid(&mut self, key: [u8; 16], cb: impl FnOnce(VaultResult<u64>) + 'static) {
        self.enqueue_job(ops::misc::get_uid_job(key, Box::new(cb)));
    }

    /// Pings the device.
    pub fn ping(&mut self, cb: impl FnOnce(VaultResult<()>) + 'static) {
        self.enqueue_job(ops::misc::ping_job(Box::new(cb)));
    }

    /// Cancels a request by id.
    ///
    /// A running request gets a cancel packet sent out-of-band, past the
    /// command queue, since the blocked command is holding it; the job
    /// then fails on its next reply. A queued request is removed and
    /// failed immediately.
    pub fn cancel_request(&mut self, reqid: &str) {
        if !self.core.state.read().is_fw_1_2() {
            debug!("cancel not supported below firmware 1.2");
            return;
        }
        info!(reqid, "cancel user request");

        if self.jobs.current_matches(reqid) {
            info!("request is running, sending the cancel out-of-band");
            let packet = Packet::bare(CommandId::CancelUserRequest);
            self.write_frame(*packet.frame());
            if let Some(job) = self.jobs.current.as_mut() {
                job.cancelled = true;
            }
            return;
        }

        if let Some(job) = self.jobs.remove_queued(reqid) {
            info!("removing queued request");
            job.fail(&mut self.core, VaultError::Cancelled);
            return;
        }
        warn!(reqid, "no request found to cancel");
    }

    /// Enters Memory Management Mode and mirrors the flash database.
    pub fn start_mmm(
        &mut self,
        progress: Option<ProgressFn>,
        cb: impl FnOnce(VaultResult<()>) + 'static,
    ) {
        if self.core.state.read().mem_mgmt_mode {
            info!("already in memory management mode");
            cb(Ok(()));
            return;
        }
        self.core.session.clear();
        self.enqueue_job(ops::mmm::start_mmm_job(progress, Box::new(cb)));
    }

    /// Leaves Memory Management Mode, optionally verifying the loaded
    /// database first. Session state is dropped either way.
    pub fn exit_mmm(&mut self, check_first: bool, cb: impl FnOnce(VaultResult<()>) + 'static) {
        self.enqueue_job(ops::mmm::exit_mmm_job(check_first, Box::new(cb)));
    }

    /// Runs the full-scan integrity check, repairing in memory, and
    /// optionally the repair self-test.
    pub fn start_integrity_check(
        &mut self,
        run_selftest: bool,
        progress: Option<ProgressFn>,
        cb: impl FnOnce(VaultResult<CheckReport>) + 'static,
    ) {
        self.core.session.clear();
        self.enqueue_job(ops::mmm::integrity_check_job(
            run_selftest,
            progress,
            Box::new(cb),
        ));
    }

    /// Access to the MMM session, for hosts editing the mirrored
    /// database between enter and exit.
    pub fn session_mut(&mut self) -> &mut vault_db::MmmSession {
        &mut self.core.session
    }

    /// Reloads the device parameters.
    pub fn load_parameters(&mut self) {
        self.enqueue_job(params::load_parameters_job());
    }

    // ------------------------------------------------------------------
    // Parameter setters
    // ------------------------------------------------------------------

    fn update_param(&mut self, param: Param, value: u8) {
        self.enqueue_job(params::update_param_job(param, value));
    }

    /// Sets the keyboard layout id.
    pub fn update_keyboard_layout(&mut self, layout: u8) {
        self.update_param(Param::KeyboardLayout, layout);
    }

    /// Enables or disables the lock timeout.
    pub fn update_lock_timeout_enabled(&mut self, enabled: bool) {
        self.update_param(Param::LockTimeoutEnable, enabled.into());
    }

    /// Sets the lock timeout, clamped to a byte.
    pub fn update_lock_timeout(&mut self, timeout: i32) {
        self.update_param(Param::LockTimeout, clamp_byte(timeout));
    }

    /// Enables or disables the screensaver.
    pub fn update_screensaver(&mut self, enabled: bool) {
        self.update_param(Param::Screensaver, enabled.into());
    }

    /// Enables or disables user request cancellation on the device.
    pub fn update_user_request_cancel(&mut self, enabled: bool) {
        self.update_param(Param::UserRequestCancel, enabled.into());
    }

    /// Sets the user interaction timeout, clamped to a byte.
    pub fn update_user_interaction_timeout(&mut self, timeout: i32) {
        self.update_param(Param::UserInterTimeout, clamp_byte(timeout));
    }

    /// Enables or disables the flash-screen feature.
    pub fn update_flash_screen(&mut self, enabled: bool) {
        self.update_param(Param::FlashScreen, enabled.into());
    }

    /// Enables or disables offline mode.
    pub fn update_offline_mode(&mut self, enabled: bool) {
        self.update_param(Param::OfflineMode, enabled.into());
    }

    /// Enables or disables the tutorial.
    pub fn update_tutorial_enabled(&mut self, enabled: bool) {
        self.update_param(Param::TutorialEnabled, enabled.into());
    }

    /// Sets the OLED contrast, clamped to a byte.
    pub fn update_screen_brightness(&mut self, brightness: i32) {
        self.update_param(Param::MiniOledContrast, clamp_byte(brightness));
    }

    /// Enables or disables knock detection.
    pub fn update_knock_enabled(&mut self, enabled: bool) {
        self.update_param(Param::MiniKnockDetectEnable, enabled.into());
    }

    /// Sets the knock sensitivity.
    pub fn update_knock_sensitivity(&mut self, sensitivity: KnockSensitivity) {
        self.update_param(Param::MiniKnockThres, sensitivity.threshold());
    }

    /// Enables or disables the key press after login output.
    pub fn update_key_after_login_enabled(&mut self, enabled: bool) {
        self.update_param(Param::KeyAfterLoginSendEnable, enabled.into());
    }

    /// Sets the key sent after login output.
    pub fn update_key_after_login(&mut self, key: i32) {
        self.update_param(Param::KeyAfterLoginSend, clamp_byte(key));
    }

    /// Enables or disables the key press after password output.
    pub fn update_key_after_pass_enabled(&mut self, enabled: bool) {
        self.update_param(Param::KeyAfterPassSendEnable, enabled.into());
    }

    /// Sets the key sent after password output.
    pub fn update_key_after_pass(&mut self, key: i32) {
        self.update_param(Param::KeyAfterPassSend, clamp_byte(key));
    }

    /// Enables or disables the delay between key entries.
    pub fn update_delay_after_key_enabled(&mut self, enabled: bool) {
        self.update_param(Param::DelayAfterKeyEntryEnable, enabled.into());
    }

    /// Sets the delay between key entries, clamped to a byte.
    pub fn update_delay_after_key(&mut self, delay: i32) {
        self.update_param(Param::DelayAfterKeyEntry, clamp_byte(delay));
    }

    /// Enables or disables the inverted screen at boot.
    pub fn update_inverted_screen(&mut self, enabled: bool) {
        self.update_param(Param::InvertedScreenAtBoot, enabled.into());
    }

    /// Sets the LED animation mask, clamped to a byte.
    pub fn update_led_anim_mask(&mut self, mask: i32) {
        self.update_param(Param::MiniLedAnimMask, clamp_byte(mask));
    }

    /// Sets the screensaver speed, clamped to a byte.
    pub fn update_screensaver_speed(&mut self, speed: i32) {
        self.update_param(Param::ScreenSaverSpeed, clamp_byte(speed));
    }

    /// Enables or disables the random starting PIN.
    pub fn update_random_starting_pin(&mut self, enabled: bool) {
        self.update_param(Param::RandomInitPin, enabled.into());
    }

    /// Enables or disables the hash display feature.
    pub fn update_hash_display(&mut self, enabled: bool) {
        self.update_param(Param::HashDisplayFeature, enabled.into());
    }

    /// Sets the lock/unlock feature mode, clamped to a byte.
    pub fn update_lock_unlock_mode(&mut self, mode: i32) {
        self.update_param(Param::LockUnlockFeature, clamp_byte(mode));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use vault_transport::LoopbackTransport;

    fn reply(cmd: CommandId, payload: &[u8]) -> Frame {
        Packet::new(cmd, payload).unwrap().into_frame()
    }

    fn engine() -> VaultEngine<LoopbackTransport> {
        VaultEngine::new(LoopbackTransport::new())
    }

    #[test]
    fn test_subcommands_strictly_serial() {
        let mut engine = engine();
        let order = Rc::new(RefCell::new(Vec::new()));

        let mut job = Job::new("serial");
        let o1 = order.clone();
        job.append(
            crate::jobs::SubCommand::new(CommandId::Ping)
                .check(move |_, _| {
                    o1.borrow_mut().push(1);
                    true
                }),
        );
        let o2 = order.clone();
        job.append(
            crate::jobs::SubCommand::new(CommandId::Version)
                .check(move |_, _| {
                    o2.borrow_mut().push(2);
                    true
                }),
        );
        engine.enqueue_job(job);

        // only the first command was written
        let t = engine.transport_mut();
        let first = t.take_sent().unwrap();
        assert_eq!(first[1], CommandId::Ping.as_u8());
        assert!(t.take_sent().is_none());

        // its reply releases the second command
        t.push_inbound(reply(CommandId::Ping, &[1]));
        engine.pump();
        let t = engine.transport_mut();
        let second = t.take_sent().unwrap();
        assert_eq!(second[1], CommandId::Version.as_u8());
        t.push_inbound(reply(CommandId::Version, &[4]));
        engine.pump();

        assert_eq!(&*order.borrow(), &[1, 2]);
        assert!(!engine.is_busy());
    }

    #[test]
    fn test_jobs_run_one_at_a_time() {
        let mut engine = engine();
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["a", "b"] {
            let mut job = Job::new(name);
            let l = log.clone();
            let tag = name.to_string();
            job.append(
                crate::jobs::SubCommand::new(CommandId::Ping).check(move |_, _| {
                    l.borrow_mut().push(tag.clone());
                    true
                }),
            );
            engine.enqueue_job(job);
        }

        // one outstanding packet, job b not started yet
        assert_eq!(engine.transport_mut().sent_len(), 1);
        engine
            .transport_mut()
            .push_inbound(reply(CommandId::Ping, &[1]));
        engine.pump();
        assert_eq!(engine.transport_mut().sent_len(), 2);
        engine
            .transport_mut()
            .push_inbound(reply(CommandId::Ping, &[1]));
        engine.pump();

        assert_eq!(&*log.borrow(), &["a", "b"]);
    }

    #[test]
    fn test_mismatched_reply_fails_job() {
        let mut engine = engine();
        let failed = Rc::new(RefCell::new(None));

        let mut job = Job::new("mismatch");
        job.append(crate::jobs::SubCommand::new(CommandId::GetLogin).check(|_, _| true));
        let f = failed.clone();
        job.on_failed(move |_, err| *f.borrow_mut() = Some(err));
        engine.enqueue_job(job);

        engine
            .transport_mut()
            .push_inbound(reply(CommandId::GetPassword, &[1]));
        engine.pump();

        assert!(matches!(
            &*failed.borrow(),
            Some(VaultError::TransportMismatch { .. })
        ));
        assert!(!engine.is_busy());
    }

    #[test]
    fn test_status_poll_edge_triggers_setup() {
        let mut engine = engine();
        engine.tick(Instant::now());
        let probe = engine.transport_mut().take_sent().unwrap();
        assert_eq!(probe[1], CommandId::Status.as_u8());

        // unlocked status triggers parameter reload and date set
        engine
            .transport_mut()
            .push_inbound(reply(CommandId::Status, &[0b0101]));
        engine.pump();
        assert_eq!(engine.status(), DeviceStatus::Unlocked);

        // the first setup command (VERSION) went out
        let next = engine.transport_mut().take_sent().unwrap();
        assert_eq!(next[1], CommandId::Version.as_u8());
    }

    #[test]
    fn test_status_steady_state_no_retrigger() {
        let mut engine = engine();
        engine.core.state.write().status = DeviceStatus::Locked;
        engine.tick(Instant::now());
        engine.transport_mut().take_sent();
        engine
            .transport_mut()
            .push_inbound(reply(CommandId::Status, &[0b0001]));
        engine.pump();
        // still locked, no setup jobs queued
        assert_eq!(engine.status(), DeviceStatus::Locked);
        assert!(engine.transport_mut().take_sent().is_none());
        assert!(!engine.is_busy());
    }

    #[test]
    fn test_cancel_queued_request() {
        let mut engine = engine();
        engine.core.state.write().version = Some(vault_proto::VersionInfo {
            flash_mb: 8,
            hw_version: "v1.2".into(),
            is_fw_1_2: true,
            is_mini: false,
        });

        // keep a job running so the next one stays queued
        let mut blocker = Job::new("blocker");
        blocker.append(crate::jobs::SubCommand::new(CommandId::Ping).check(|_, _| true));
        engine.enqueue_job(blocker);

        let cancelled = Rc::new(RefCell::new(false));
        let c = cancelled.clone();
        let mut victim = Job::new("victim").with_request_id("req-1");
        victim.append(crate::jobs::SubCommand::new(CommandId::GetLogin).check(|_, _| true));
        victim.on_failed(move |_, err| {
            *c.borrow_mut() = matches!(err, VaultError::Cancelled);
        });
        engine.enqueue_job(victim);

        engine.cancel_request("req-1");
        assert!(*cancelled.borrow());
    }

    #[test]
    fn test_please_retry_keeps_command_outstanding() {
        let mut engine = engine();
        let mut job = Job::new("retry");
        job.append(crate::jobs::SubCommand::new(CommandId::GetLogin).check(|_, _| true));
        engine.enqueue_job(job);

        engine
            .transport_mut()
            .push_inbound(reply(CommandId::PleaseRetry, &[]));
        engine.pump();
        // still waiting on the same command
        assert!(engine.is_busy());

        engine
            .transport_mut()
            .push_inbound(reply(CommandId::GetLogin, b"bob\0"));
        engine.pump();
        assert!(!engine.is_busy());
    }
}
