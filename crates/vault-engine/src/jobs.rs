//! The job engine.
//!
//! A job is an ordered list of sub-commands, each pairing an optional
//! pre-send transform with a post-reply check. Jobs run strictly one at a
//! time; sub-commands within a job are strictly serial with respect to
//! device replies. A sub-command's check may splice follow-up
//! sub-commands into the running job (fallback contexts, the recursive
//! flash-read loop) through its [`JobCtx`].

use std::collections::{HashMap, VecDeque};

use tracing::debug;
use vault_common::VaultError;
use vault_proto::{CommandId, Packet};

use crate::state::{EngineCore, ProgressFn};

/// Post-reply check: returns false to fail the job.
pub type CheckFn = Box<dyn FnMut(&mut JobCtx<'_>, &Packet) -> bool>;
/// Pre-send transform: may rewrite the payload; returns false to fail.
pub type TransformFn = Box<dyn FnMut(&mut JobCtx<'_>, &mut Vec<u8>) -> bool>;
/// Runs when the job's last sub-command succeeds; receives the last
/// reply and the job's scratch map.
pub type FinishFn = Box<dyn FnOnce(&mut EngineCore, &Packet, &HashMap<String, Vec<u8>>)>;
/// Runs when any sub-command fails.
pub type FailFn = Box<dyn FnOnce(&mut EngineCore, VaultError)>;

/// One device command within a job.
pub struct SubCommand {
    pub(crate) cmd: CommandId,
    pub(crate) payload: Vec<u8>,
    pub(crate) transform: Option<TransformFn>,
    pub(crate) check: Option<CheckFn>,
}

impl SubCommand {
    /// A payload-less sub-command with the default acknowledgement check.
    #[must_use]
    pub fn new(cmd: CommandId) -> Self {
        Self {
            cmd,
            payload: Vec::new(),
            transform: None,
            check: None,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sets the pre-send transform.
    #[must_use]
    pub fn transform(
        mut self,
        f: impl FnMut(&mut JobCtx<'_>, &mut Vec<u8>) -> bool + 'static,
    ) -> Self {
        self.transform = Some(Box::new(f));
        self
    }

    /// Sets the post-reply check. Without one, the reply must be the
    /// single-byte acknowledgement.
    #[must_use]
    pub fn check(mut self, f: impl FnMut(&mut JobCtx<'_>, &Packet) -> bool + 'static) -> Self {
        self.check = Some(Box::new(f));
        self
    }

    /// The command this sub-command sends.
    #[must_use]
    pub fn command(&self) -> CommandId {
        self.cmd
    }
}

pub(crate) enum Splice {
    Prepend(SubCommand),
    InsertAfter(usize, SubCommand),
    Append(SubCommand),
}

/// Context handed to sub-command callbacks.
///
/// Gives controlled access to the engine core, the job's scratch map and
/// error slot, and the splice operations a callback may request.
pub struct JobCtx<'a> {
    /// Engine internals (observable state, MMM session, follow-ups).
    pub core: &'a mut EngineCore,
    pub(crate) user_data: &'a mut HashMap<String, Vec<u8>>,
    pub(crate) error: &'a mut Option<VaultError>,
    pub(crate) progress: &'a mut Option<ProgressFn>,
    pub(crate) splices: Vec<Splice>,
    pub(crate) more: bool,
}

impl JobCtx<'_> {
    /// Records the error the job will fail with if this check returns
    /// false.
    pub fn set_error(&mut self, err: VaultError) {
        *self.error = Some(err);
    }

    /// Fires the job's progress callback, if one is attached.
    pub fn report_progress(&mut self, total: usize, current: usize) {
        if let Some(cb) = self.progress.as_mut() {
            cb(total, current);
        }
    }

    /// Splices a sub-command to run immediately after the current one.
    pub fn prepend(&mut self, sub: SubCommand) {
        self.splices.push(Splice::Prepend(sub));
    }

    /// Splices a sub-command after the `k`-th pending sub-command
    /// following the current one.
    pub fn insert_after(&mut self, k: usize, sub: SubCommand) {
        self.splices.push(Splice::InsertAfter(k, sub));
    }

    /// Appends a sub-command at the end of the job.
    pub fn append(&mut self, sub: SubCommand) {
        self.splices.push(Splice::Append(sub));
    }

    /// Keeps the current command outstanding: the next inbound frame is
    /// delivered to the same check (multi-packet replies).
    pub fn keep_waiting(&mut self) {
        self.more = true;
    }

    /// Stores a byte value in the job's scratch map.
    pub fn set_bytes(&mut self, key: &str, value: Vec<u8>) {
        self.user_data.insert(key.to_string(), value);
    }

    /// Reads a byte value from the job's scratch map.
    #[must_use]
    pub fn get_bytes(&self, key: &str) -> Option<&Vec<u8>> {
        self.user_data.get(key)
    }

    /// Appends to a byte value in the job's scratch map.
    pub fn extend_bytes(&mut self, key: &str, value: &[u8]) {
        self.user_data
            .entry(key.to_string())
            .or_default()
            .extend_from_slice(value);
    }

    /// Stores a string value in the job's scratch map.
    pub fn set_str(&mut self, key: &str, value: &str) {
        self.set_bytes(key, value.as_bytes().to_vec());
    }

    /// Reads a string value from the job's scratch map.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get_bytes(key)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// A composite request: an ordered list of sub-commands with completion
/// callbacks.
pub struct Job {
    label: String,
    request_id: Option<String>,
    pub(crate) subs: Vec<SubCommand>,
    pub(crate) cursor: usize,
    pub(crate) awaiting_reply: bool,
    pub(crate) cancelled: bool,
    pub(crate) user_data: HashMap<String, Vec<u8>>,
    pub(crate) error: Option<VaultError>,
    pub(crate) progress: Option<ProgressFn>,
    on_finished: Option<FinishFn>,
    on_failed: Option<FailFn>,
}

impl Job {
    /// Creates an empty job.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            request_id: None,
            subs: Vec::new(),
            cursor: 0,
            awaiting_reply: false,
            cancelled: false,
            user_data: HashMap::new(),
            error: None,
            progress: None,
            on_finished: None,
            on_failed: None,
        }
    }

    /// Attaches a progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    /// Pre-seeds the job's scratch map.
    pub fn seed_bytes(&mut self, key: &str, value: Vec<u8>) {
        self.user_data.insert(key.to_string(), value);
    }

    /// Attaches a request id for cancellation.
    #[must_use]
    pub fn with_request_id(mut self, reqid: impl Into<String>) -> Self {
        let reqid = reqid.into();
        if !reqid.is_empty() {
            self.request_id = Some(reqid);
        }
        self
    }

    /// Appends a sub-command.
    pub fn append(&mut self, sub: SubCommand) -> &mut Self {
        self.subs.push(sub);
        self
    }

    /// Sets the success callback.
    pub fn on_finished(
        &mut self,
        f: impl FnOnce(&mut EngineCore, &Packet, &HashMap<String, Vec<u8>>) + 'static,
    ) -> &mut Self {
        self.on_finished = Some(Box::new(f));
        self
    }

    /// Sets the failure callback.
    pub fn on_failed(&mut self, f: impl FnOnce(&mut EngineCore, VaultError) + 'static) -> &mut Self {
        self.on_failed = Some(Box::new(f));
        self
    }

    /// The job's display label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The job's request id, if it carries one.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub(crate) fn apply_splices(&mut self, splices: Vec<Splice>) {
        for splice in splices {
            match splice {
                Splice::Prepend(sub) => self.subs.insert(self.cursor + 1, sub),
                Splice::InsertAfter(k, sub) => {
                    let at = (self.cursor + 2 + k).min(self.subs.len());
                    self.subs.insert(at, sub);
                }
                Splice::Append(sub) => self.subs.push(sub),
            }
        }
    }

    pub(crate) fn finish(mut self, core: &mut EngineCore, last_reply: &Packet) {
        debug!(job = %self.label, "job finished");
        if let Some(f) = self.on_finished.take() {
            f(core, last_reply, &self.user_data);
        }
    }

    pub(crate) fn fail(mut self, core: &mut EngineCore, err: VaultError) {
        debug!(job = %self.label, %err, "job failed");
        if let Some(f) = self.on_failed.take() {
            f(core, err);
        }
    }
}

/// The job FIFO: at most one job runs at a time.
#[derive(Default)]
pub struct JobEngine {
    queue: VecDeque<Job>,
    pub(crate) current: Option<Job>,
}

impl JobEngine {
    /// Creates an empty job engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a job is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    /// Number of queued (not yet started) jobs.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Enqueues a job at the back of the FIFO.
    pub fn enqueue(&mut self, job: Job) {
        self.queue.push_back(job);
    }

    pub(crate) fn pop_next(&mut self) -> Option<Job> {
        self.queue.pop_front()
    }

    /// True when the running job carries `reqid`.
    #[must_use]
    pub fn current_matches(&self, reqid: &str) -> bool {
        self.current
            .as_ref()
            .and_then(Job::request_id)
            .is_some_and(|id| id == reqid)
    }

    /// Removes and returns a queued job by request id.
    pub fn remove_queued(&mut self, reqid: &str) -> Option<Job> {
        let pos = self
            .queue
            .iter()
            .position(|j| j.request_id().is_some_and(|id| id == reqid))?;
        self.queue.remove(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(cmd: CommandId) -> SubCommand {
        SubCommand::new(cmd)
    }

    #[test]
    fn test_splice_order() {
        let mut job = Job::new("splice");
        job.append(sub(CommandId::Context));
        job.append(sub(CommandId::GetLogin));
        // current = 0; prepend then insert_after(0) reproduces the
        // add-context ordering: [ctx, ADD, SELECT, login]
        job.apply_splices(vec![
            Splice::Prepend(sub(CommandId::AddContext)),
            Splice::InsertAfter(0, sub(CommandId::Context)),
        ]);
        let cmds: Vec<_> = job.subs.iter().map(|s| s.cmd).collect();
        assert_eq!(
            cmds,
            vec![
                CommandId::Context,
                CommandId::AddContext,
                CommandId::Context,
                CommandId::GetLogin,
            ]
        );
    }

    #[test]
    fn test_append_splice_goes_last() {
        let mut job = Job::new("append");
        job.append(sub(CommandId::ReadFlashNode));
        job.append(sub(CommandId::GetDnStartParent));
        job.apply_splices(vec![Splice::Append(sub(CommandId::ReadFlashNode))]);
        assert_eq!(job.subs.len(), 3);
        assert_eq!(job.subs[2].cmd, CommandId::ReadFlashNode);
    }

    #[test]
    fn test_remove_queued_by_reqid() {
        let mut engine = JobEngine::new();
        engine.enqueue(Job::new("a").with_request_id("one"));
        engine.enqueue(Job::new("b").with_request_id("two"));
        let removed = engine.remove_queued("one").unwrap();
        assert_eq!(removed.label(), "a");
        assert_eq!(engine.queued(), 1);
        assert!(engine.remove_queued("one").is_none());
    }

    #[test]
    fn test_empty_request_id_is_none() {
        let job = Job::new("x").with_request_id("");
        assert!(job.request_id().is_none());
    }
}
