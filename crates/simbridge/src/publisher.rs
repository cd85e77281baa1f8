//! Controller-side endpoint.
//!
//! The controller calls into the [`Publisher`] once per simulation step. None
//! of the calls block on the tool server and none of them return an error
//! for I/O problems: a failed write is logged and the step goes on.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::command::{Command, CommandOutcome, CommandRecord, OutcomeStatus};
use crate::config::{PublisherConfig, Throttle};
use crate::dispatch::{CommandError, CommandHandler, DispatchTable, HandlerContext};
use crate::host::{Camera, SimulationHost};
use crate::logbook::{self, LogLevel};
use crate::reload::{CallbackError, Observation, ReloadDetector, ReloadEvent, ReloadReason};
use crate::snapshot::{StateSnapshot, unix_now};
use crate::storage::{Document, Mailbox, MailboxError, write_atomic};

/// Result of a [`Publisher::publish`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A new snapshot is on disk.
    Written {
        /// Sequence number of the new snapshot
        sequence: u64,
    },
    /// Skipped by the throttle.
    Throttled,
    /// The write failed; the previous snapshot is still in place.
    Failed,
}

/// Result of a [`Publisher::save_camera_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was written to this path.
    Saved(PathBuf),
    /// Skipped by the throttle.
    Throttled,
    /// The camera had no image.
    NoFrame,
    /// Capture or write failed.
    Failed,
}

/// Throttle bookkeeping for one output.
#[derive(Debug, Default)]
struct ThrottleWindow {
    calls_since_write: Option<u32>,
    last_write: Option<Instant>,
}

impl ThrottleWindow {
    /// Count a non-forced call and report whether it may write.
    fn admit(&mut self, throttle: Throttle) -> bool {
        match throttle {
            Throttle::Steps(steps) => match self.calls_since_write {
                None => true,
                Some(calls) => {
                    let calls = calls.saturating_add(1);
                    self.calls_since_write = Some(calls);
                    calls >= steps.get()
                }
            },
            Throttle::Interval(interval) => self
                .last_write
                .is_none_or(|last| last.elapsed() >= interval),
        }
    }

    fn record_write(&mut self) {
        self.calls_since_write = Some(0);
        self.last_write = Some(Instant::now());
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Controller-side mailbox endpoint.
///
/// Owns the simulation host handle, the command dispatch table and the
/// reload detector.
///
/// ```rust,ignore
/// let mut publisher = Publisher::new(Mailbox::open("data")?, host, PublisherConfig::default());
/// publisher.register_command("reset_state", |ctx, _cmd| {
///     ctx.log("controller state reset");
///     Ok("reset".into())
/// });
///
/// loop {
///     publisher.detect_reload();
///     publisher.publish(&json!({"pose": [x, y, theta], "mode": "search"}), false);
///     publisher.process_commands();
/// }
/// ```
pub struct Publisher<H: SimulationHost> {
    mailbox: Mailbox,
    host: H,
    config: PublisherConfig,
    dispatch: DispatchTable,
    reload: ReloadDetector,
    sequence: u64,
    wrote_state: bool,
    state_window: ThrottleWindow,
    camera_window: ThrottleWindow,
    frame_index: u64,
    last_record: Option<CommandRecord>,
}

impl<H: SimulationHost> std::fmt::Debug for Publisher<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("mailbox", &self.mailbox)
            .field("config", &self.config)
            .field("dispatch", &self.dispatch)
            .field("sequence", &self.sequence)
            .field("epoch", &self.reload.epoch())
            .finish_non_exhaustive()
    }
}

impl<H: SimulationHost> Publisher<H> {
    /// Create a publisher with the built-in command handlers.
    pub fn new(mailbox: Mailbox, host: H, config: PublisherConfig) -> Self {
        let frame_index = last_frame_index(&mailbox);
        Self {
            mailbox,
            host,
            config,
            dispatch: DispatchTable::with_builtins(),
            reload: ReloadDetector::new(),
            sequence: 0,
            wrote_state: false,
            state_window: ThrottleWindow::default(),
            camera_window: ThrottleWindow::default(),
            frame_index,
            last_record: None,
        }
    }

    /// The mailbox this publisher writes to.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// The simulation host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable access to the simulation host.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Active configuration.
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Sequence number of the last snapshot written (0 before the first).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of reloads detected so far.
    pub fn epoch(&self) -> u64 {
        self.reload.epoch()
    }

    /// Registered command actions.
    pub fn actions(&self) -> Vec<&str> {
        self.dispatch.actions()
    }

    /// Publish a state snapshot.
    ///
    /// `state` must serialize to a JSON object. Unless `force` is set the
    /// write is throttled by [`PublisherConfig::throttle`].
    pub fn publish<T: Serialize + ?Sized>(&mut self, state: &T, force: bool) -> PublishOutcome {
        if !force && !self.state_window.admit(self.config.throttle) {
            return PublishOutcome::Throttled;
        }

        let fields = match serde_json::to_value(state) {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                self.warn(&format!(
                    "publish: state must be a JSON object, got {}",
                    json_kind(&other)
                ));
                return PublishOutcome::Failed;
            }
            Err(e) => {
                self.warn(&format!("publish: state does not serialize: {e}"));
                return PublishOutcome::Failed;
            }
        };

        let sequence = self.sequence + 1;
        let snapshot = StateSnapshot::new(sequence, self.reload.epoch(), fields);
        match self.mailbox.write_json(&self.mailbox.status_path(), &snapshot) {
            Ok(()) => {
                self.sequence = sequence;
                self.wrote_state = true;
                self.state_window.record_write();
                PublishOutcome::Written { sequence }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to write state snapshot");
                PublishOutcome::Failed
            }
        }
    }

    /// Write the world description document. Not throttled.
    pub fn publish_world_info<T: Serialize + ?Sized>(&self, info: &T) -> Result<(), MailboxError> {
        let value = serde_json::to_value(info).map_err(|e| MailboxError::Json {
            path: self.mailbox.world_info_path(),
            source: e,
        })?;
        if !value.is_object() {
            return Err(MailboxError::NotAnObject("world info"));
        }
        self.mailbox.write_json(&self.mailbox.world_info_path(), &value)
    }

    /// Claim and dispatch the pending command, if there is one.
    ///
    /// The command document is taken out of the mailbox before its handler
    /// runs, so a command written meanwhile waits for the next step instead
    /// of being lost. Unknown actions are logged and dropped. Returns the
    /// claimed command so callers can inspect it too.
    pub fn process_commands(&mut self) -> Option<Command> {
        let pending = self.mailbox.commands_path();
        let claimed = self.mailbox.last_command_path();
        match fs::rename(&pending, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                // Usually a concurrent replace; try again next step.
                tracing::debug!(error = %e, "could not claim command document");
                return None;
            }
        }

        let command: Command = match self.mailbox.read_json(&claimed) {
            Document::Present(command) => command,
            Document::Malformed(reason) => {
                self.warn(&format!("dropped malformed command document: {reason}"));
                if let Err(e) = self.mailbox.remove(&claimed) {
                    tracing::debug!(error = %e, "could not remove malformed command");
                }
                return None;
            }
            Document::Missing => return None,
        };

        // The claim replaced the finished record; put it back.
        if let Some(record) = &self.last_record
            && record.command.id == command.id
        {
            tracing::debug!(id = %command.id, "command already executed, skipping");
            if let Err(e) = self.mailbox.write_json(&claimed, record) {
                tracing::warn!(error = %e, "failed to restore command record");
            }
            return None;
        }

        let claimed_at = unix_now();
        let outcome = self.dispatch(&command);
        let record = CommandRecord {
            command: command.clone(),
            claimed_at: Some(claimed_at),
            outcome: Some(outcome),
        };
        if let Err(e) = self.mailbox.write_json(&claimed, &record) {
            tracing::warn!(error = %e, "failed to record command outcome");
        }
        self.last_record = Some(record);
        Some(command)
    }

    /// Same as [`process_commands`](Self::process_commands).
    pub fn get_command(&mut self) -> Option<Command> {
        self.process_commands()
    }

    fn dispatch(&mut self, command: &Command) -> CommandOutcome {
        let Some(handler) = self.dispatch.get_mut(&command.action) else {
            let detail = format!("unknown command action: {}", command.action);
            logbook::append(&self.mailbox, LogLevel::Warn, &detail);
            return CommandOutcome {
                status: OutcomeStatus::UnknownAction,
                detail,
            };
        };

        let mut ctx = HandlerContext {
            host: &mut self.host,
            mailbox: &self.mailbox,
        };
        match handler.handle(&mut ctx, command) {
            Ok(detail) => CommandOutcome {
                status: OutcomeStatus::Handled,
                detail,
            },
            Err(e) => {
                let detail = format!("{} command failed: {e}", command.action);
                logbook::append(&self.mailbox, LogLevel::Error, &detail);
                CommandOutcome {
                    status: OutcomeStatus::Failed,
                    detail,
                }
            }
        }
    }

    /// Register a closure for `action`, replacing any earlier handler.
    pub fn register_command<F>(&mut self, action: impl Into<String>, handler: F)
    where
        F: FnMut(&mut HandlerContext<'_>, &Command) -> Result<String, CommandError>
            + Send
            + 'static,
    {
        self.dispatch.register_fn(action, handler);
    }

    /// Register a handler object for `action`, replacing any earlier handler.
    pub fn register_handler(
        &mut self,
        action: impl Into<String>,
        handler: impl CommandHandler + 'static,
    ) {
        self.dispatch.register(action, handler);
    }

    /// Run `callback` once per detected reload, after earlier callbacks.
    pub fn on_reload<F>(&mut self, callback: F)
    where
        F: FnMut(&ReloadEvent) -> Result<(), CallbackError> + Send + 'static,
    {
        self.reload.on_reload(callback);
    }

    /// Check whether the simulation was reset or reloaded since the last call.
    ///
    /// On a reload every callback runs, the sequence counter starts over and
    /// the next publish is written immediately. Calling again without a new
    /// reload does nothing.
    pub fn detect_reload(&mut self) -> Option<ReloadEvent> {
        let observation = Observation {
            fingerprint: self.host.run_fingerprint(),
            state_file_lost: self.wrote_state && !self.mailbox.status_path().exists(),
        };
        let event = self.reload.observe(observation)?;

        if event.reason == ReloadReason::StateFileMissing
            && let Err(e) = self.mailbox.ensure_tree()
        {
            tracing::warn!(error = %e, "failed to recreate mailbox directories");
        }
        self.sequence = 0;
        self.wrote_state = false;
        self.state_window.reset();
        self.camera_window.reset();
        self.log(&format!(
            "Reload detected ({}), epoch {}",
            event.reason, event.epoch
        ));
        Some(event)
    }

    /// Append an INFO line to the controller log. Never fails.
    pub fn log(&self, message: &str) {
        logbook::append(&self.mailbox, LogLevel::Info, message);
    }

    /// Append a WARN line to the controller log. Never fails.
    pub fn warn(&self, message: &str) {
        logbook::append(&self.mailbox, LogLevel::Warn, message);
    }

    /// Pull a frame from `camera` and store it, throttled like [`publish`](Self::publish).
    pub fn save_camera_frame<C: Camera + ?Sized>(&mut self, camera: &mut C) -> FrameOutcome {
        if !self.camera_window.admit(self.config.throttle) {
            return FrameOutcome::Throttled;
        }

        let frame = match camera.capture() {
            Ok(Some(frame)) => frame,
            Ok(None) => return FrameOutcome::NoFrame,
            Err(e) => {
                tracing::debug!(error = %e, "camera capture failed");
                return FrameOutcome::Failed;
            }
        };

        let index = self.frame_index + 1;
        let path = self
            .mailbox
            .camera_dir()
            .join(frame_file_name(index, &frame.extension));
        if let Err(e) = write_atomic(&path, &frame.data) {
            tracing::warn!(error = %e, "failed to write camera frame");
            return FrameOutcome::Failed;
        }
        self.frame_index = index;
        self.camera_window.record_write();

        if self.config.max_camera_frames > 0 {
            self.prune_frames(self.config.max_camera_frames);
        }
        FrameOutcome::Saved(path)
    }

    /// Delete all but the `keep` highest-numbered frames, whatever their
    /// extension.
    fn prune_frames(&self, keep: usize) {
        let mut frames = stored_frames(&self.mailbox);
        if frames.len() <= keep {
            return;
        }
        frames.sort_unstable_by_key(|(index, _)| *index);
        let excess = frames.len() - keep;
        for (_, path) in frames.drain(..excess) {
            if let Err(e) = self.mailbox.remove(&path) {
                tracing::debug!(
                    error = %e,
                    path = %path.display(),
                    "failed to prune camera frame"
                );
            }
        }
    }
}

fn frame_file_name(index: u64, extension: &str) -> String {
    format!("frame_{index:08}.{extension}")
}

/// Numbered frames in the camera store.
fn stored_frames(mailbox: &Mailbox) -> Vec<(u64, PathBuf)> {
    let Ok(entries) = fs::read_dir(mailbox.camera_dir()) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let stem = name.to_str()?.strip_prefix("frame_")?.split('.').next()?;
            Some((stem.parse::<u64>().ok()?, entry.path()))
        })
        .collect()
}

/// Highest frame index already in the camera store, so numbering continues
/// across controller restarts.
fn last_frame_index(mailbox: &Mailbox) -> u64 {
    stored_frames(mailbox)
        .into_iter()
        .map(|(index, _)| index)
        .max()
        .unwrap_or(0)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
