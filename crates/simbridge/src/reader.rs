//! Tool-side endpoint.
//!
//! Every query reads the mailbox afresh and returns immediately. Missing or
//! unparsable documents come back as [`NoData`], never as an error, since the
//! controller may simply not have published yet.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::automation::{AutomationError, ForceAction, WindowAutomation};
use crate::command::{
    Command, CommandRecord, CommandStatus, OutcomeStatus, RESET_STATE_ACTION, SCREENSHOT_ACTION,
    SIMULATION_ACTION,
};
use crate::config::ReaderConfig;
use crate::host::SimulationVerb;
use crate::logbook::{self, LogEntry};
use crate::snapshot::StateSnapshot;
use crate::storage::{Document, FileInfo, Mailbox, MailboxError};

/// Robot name used when the state document describes a single robot.
pub const DEFAULT_ROBOT: &str = "main";

/// Top-level keys older controllers used instead of a `sensors` object,
/// with the sensor name each maps to.
const LEGACY_SENSOR_KEYS: [(&str, &str); 2] =
    [("lidar_data", "lidar"), ("distance_sensors", "distance")];

/// Why a query has nothing to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoData {
    /// Human-readable explanation
    pub reason: String,
}

impl NoData {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for NoData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// A snapshot with its freshness.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotView {
    /// The snapshot as read
    pub snapshot: StateSnapshot,
    /// Time since it was written
    pub age: Duration,
    /// Whether `age` exceeds [`ReaderConfig::stale_after`]
    pub stale: bool,
}

impl SnapshotView {
    /// Per-robot state.
    ///
    /// Multi-robot controllers publish a `robots` object keyed by name; a
    /// single-robot document is returned as one entry named [`DEFAULT_ROBOT`].
    pub fn robots(&self) -> Map<String, Value> {
        if let Some(Value::Object(robots)) = self.snapshot.get("robots")
            && !robots.is_empty()
        {
            return robots.clone();
        }
        let mut robots = Map::new();
        robots.insert(
            DEFAULT_ROBOT.to_string(),
            Value::Object(self.snapshot.fields.clone()),
        );
        robots
    }

    /// The robot monitoring follows: [`DEFAULT_ROBOT`] if present, else the first.
    pub fn primary_robot(&self) -> Map<String, Value> {
        let mut robots = self.robots();
        let state = match robots.remove(DEFAULT_ROBOT) {
            Some(state) => Some(state),
            None => robots.into_iter().next().map(|(_, state)| state),
        };
        match state {
            Some(Value::Object(state)) => state,
            _ => Map::new(),
        }
    }

    /// Sensor readings, from the `sensors` object or the legacy top-level keys.
    pub fn sensors(&self) -> Map<String, Value> {
        if let Some(Value::Object(sensors)) = self.snapshot.get("sensors")
            && !sensors.is_empty()
        {
            return sensors.clone();
        }
        let mut sensors = Map::new();
        for (key, name) in LEGACY_SENSOR_KEYS {
            if let Some(value) = self.snapshot.get(key) {
                sensors.insert(name.to_string(), value.clone());
            }
        }
        if let Some(objects) = self.snapshot.get("recognized_objects") {
            sensors.insert(
                "camera".to_string(),
                json!({ "recognized_objects": objects }),
            );
        }
        sensors
    }
}

/// Result of reading the state document.
#[derive(Debug, Clone, PartialEq)]
pub enum StateView {
    /// Nothing usable on disk
    NoData {
        /// Why
        reason: String,
    },
    /// The latest durable snapshot
    Snapshot(SnapshotView),
}

impl StateView {
    /// The snapshot, or why there is none.
    pub fn into_result(self) -> Result<SnapshotView, NoData> {
        match self {
            StateView::Snapshot(view) => Ok(view),
            StateView::NoData { reason } => Err(NoData { reason }),
        }
    }

    /// The snapshot, if any.
    pub fn snapshot(&self) -> Option<&SnapshotView> {
        match self {
            StateView::Snapshot(view) => Some(view),
            StateView::NoData { .. } => None,
        }
    }
}

/// A projection of the current snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    /// Sequence number of the source snapshot
    pub sequence: u64,
    /// Reload epoch of the source snapshot
    pub epoch: u64,
    /// Age of the source snapshot
    #[serde(serialize_with = "serialize_secs")]
    pub age: Duration,
    /// Whether the source snapshot is stale
    pub stale: bool,
    /// Projected fields
    pub data: Map<String, Value>,
}

impl Projection {
    fn of(view: &SnapshotView, data: Map<String, Value>) -> Self {
        Self {
            sequence: view.snapshot.sequence,
            epoch: view.snapshot.epoch,
            age: view.age,
            stale: view.stale,
            data,
        }
    }
}

fn serialize_secs<S: serde::Serializer>(age: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(age.as_secs_f64())
}

/// Errors from control requests
#[derive(Debug, Error)]
pub enum ControlError {
    /// The command document could not be written
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
    /// The forced path failed
    #[error(transparent)]
    Automation(#[from] AutomationError),
    /// `force` was requested for a verb that has no out-of-band path
    #[error("force is only available for reload and reset, not {0}")]
    ForceNotApplicable(SimulationVerb),
}

/// How a control request was carried out.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlOutcome {
    /// Written to the mailbox for the controller's next step
    Queued(Command),
    /// Triggered through window automation
    Forced(ForceAction),
}

/// Result of [`Reader::take_screenshot`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenshotOutcome {
    /// The file appeared within the wait.
    Captured(FileInfo),
    /// The controller rejected the request.
    Failed {
        /// Id of the screenshot command
        command_id: String,
        /// Handler error text
        detail: String,
    },
    /// Not there yet; the command is still in the mailbox or running.
    Pending {
        /// Where the file will appear
        path: PathBuf,
        /// Id of the screenshot command
        command_id: String,
    },
}

/// One `monitor` sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSample {
    /// Zero-based sample number
    pub index: usize,
    /// Wall-clock sampling time
    pub taken_at: DateTime<Utc>,
    /// State at that time
    pub state: StateView,
}

/// Tool-side mailbox endpoint.
#[derive(Debug, Clone)]
pub struct Reader {
    mailbox: Mailbox,
    config: ReaderConfig,
}

impl Reader {
    /// Create a reader over `mailbox`.
    pub fn new(mailbox: Mailbox, config: ReaderConfig) -> Self {
        Self { mailbox, config }
    }

    /// The mailbox being read.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Active configuration.
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Latest durable snapshot with its age.
    pub fn state(&self) -> StateView {
        match self.mailbox.read_json::<StateSnapshot>(&self.mailbox.status_path()) {
            Document::Present(snapshot) => {
                let age = snapshot.age();
                StateView::Snapshot(SnapshotView {
                    stale: age > self.config.stale_after,
                    snapshot,
                    age,
                })
            }
            Document::Missing => StateView::NoData {
                reason: "no state published yet; is the controller running?".to_string(),
            },
            Document::Malformed(e) => {
                tracing::debug!(error = %e, "state document does not parse");
                StateView::NoData {
                    reason: format!("state document is unreadable: {e}"),
                }
            }
        }
    }

    /// Robot-centric view: robot name to state object.
    pub fn robot_state(&self) -> Result<Projection, NoData> {
        let view = self.state().into_result()?;
        Ok(Projection::of(&view, view.robots()))
    }

    /// Sensor readings.
    pub fn sensors(&self) -> Result<Projection, NoData> {
        let view = self.state().into_result()?;
        let sensors = view.sensors();
        if sensors.is_empty() {
            return Err(NoData::new("no sensor data in the current state"));
        }
        Ok(Projection::of(&view, sensors))
    }

    /// The whole state document.
    pub fn full_state(&self) -> Result<Projection, NoData> {
        let view = self.state().into_result()?;
        let document = match view.snapshot.to_value() {
            Value::Object(document) => document,
            _ => Map::new(),
        };
        Ok(Projection::of(&view, document))
    }

    /// World description published by the controller.
    pub fn world_info(&self) -> Result<Map<String, Value>, NoData> {
        match self
            .mailbox
            .read_json::<Map<String, Value>>(&self.mailbox.world_info_path())
        {
            Document::Present(info) => Ok(info),
            Document::Missing => Err(NoData::new(
                "no world info published yet; is the controller running?",
            )),
            Document::Malformed(e) => Err(NoData::new(format!("world info is unreadable: {e}"))),
        }
    }

    /// Up to `limit` most recent log entries, newest first.
    pub fn logs(&self, limit: usize, filter: Option<&str>) -> Vec<LogEntry> {
        logbook::read_recent(&self.mailbox, limit, filter)
    }

    /// Newest camera frame.
    pub fn latest_camera_frame(&self) -> Option<FileInfo> {
        self.mailbox.latest_image(&self.mailbox.camera_dir())
    }

    /// Newest screenshot.
    pub fn latest_screenshot(&self) -> Option<FileInfo> {
        self.mailbox.latest_image(&self.mailbox.screenshots_dir())
    }

    /// Write a command, replacing any command the controller has not claimed.
    pub fn send_command(
        &self,
        action: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Result<Command, MailboxError> {
        let command = Command::new(action, payload);
        self.mailbox
            .write_json(&self.mailbox.commands_path(), &command)?;
        tracing::debug!(id = %command.id, action = %command.action, "command written");
        Ok(command)
    }

    /// Where the command with `id` is in its lifecycle.
    pub fn command_status(&self, id: &str) -> CommandStatus {
        if let Document::Present(pending) = self
            .mailbox
            .read_json::<Command>(&self.mailbox.commands_path())
            && pending.id == id
        {
            return CommandStatus::Pending(pending);
        }

        match self
            .mailbox
            .read_json::<CommandRecord>(&self.mailbox.last_command_path())
        {
            Document::Present(record) if record.command.id == id => match record.outcome {
                Some(outcome) => CommandStatus::Completed {
                    command: record.command,
                    outcome,
                },
                None => CommandStatus::Claimed(record.command),
            },
            _ => CommandStatus::Unknown,
        }
    }

    /// Pause, resume, reset, reload, step or speed up the simulation.
    ///
    /// With `force`, reload and reset skip the mailbox and go through
    /// `automation`, for a controller that no longer reads commands.
    pub async fn simulation_control(
        &self,
        verb: SimulationVerb,
        force: bool,
        automation: &dyn WindowAutomation,
    ) -> Result<ControlOutcome, ControlError> {
        if force {
            let action = match verb {
                SimulationVerb::Reload => ForceAction::Reload,
                SimulationVerb::Reset => ForceAction::Reset,
                other => return Err(ControlError::ForceNotApplicable(other)),
            };
            automation.force(action).await?;
            return Ok(ControlOutcome::Forced(action));
        }

        let mut payload = Map::new();
        payload.insert("command".to_string(), Value::from(verb.as_str()));
        Ok(ControlOutcome::Queued(
            self.send_command(SIMULATION_ACTION, payload)?,
        ))
    }

    /// Ask the controller to reset its own bookkeeping.
    pub fn reset_controller_state(&self) -> Result<Command, MailboxError> {
        self.send_command(RESET_STATE_ACTION, Map::new())
    }

    /// Request a screenshot and wait up to
    /// [`screenshot_timeout`](ReaderConfig::screenshot_timeout) for it.
    pub async fn take_screenshot(&self) -> Result<ScreenshotOutcome, MailboxError> {
        let filename = format!("screenshot_{}", Local::now().format("%Y%m%d_%H%M%S_%3f"));
        let path = self
            .mailbox
            .screenshots_dir()
            .join(format!("{filename}.png"));

        let mut payload = Map::new();
        payload.insert("filename".to_string(), Value::from(filename));
        let command = self.send_command(SCREENSHOT_ACTION, payload)?;

        let deadline = tokio::time::Instant::now() + self.config.screenshot_timeout;
        loop {
            if let Some(info) = file_info(&path) {
                return Ok(ScreenshotOutcome::Captured(info));
            }
            if let CommandStatus::Completed { outcome, .. } = self.command_status(&command.id)
                && outcome.status != OutcomeStatus::Handled
            {
                return Ok(ScreenshotOutcome::Failed {
                    command_id: command.id,
                    detail: outcome.detail,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(ScreenshotOutcome::Pending {
                    path,
                    command_id: command.id,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Sample the state every [`monitor_interval`](ReaderConfig::monitor_interval)
    /// for `duration`.
    ///
    /// Yields at least one sample, the first without waiting. Each call starts
    /// a fresh sequence.
    pub fn monitor(
        &self,
        duration: Duration,
    ) -> impl Stream<Item = MonitorSample> + Send + 'static {
        let interval = self.config.monitor_interval;
        let samples = sample_count(duration, interval);
        stream::unfold((self.clone(), 0usize), move |(reader, index)| async move {
            if index >= samples {
                return None;
            }
            if index > 0 {
                tokio::time::sleep(interval).await;
            }
            let sample = MonitorSample {
                index,
                taken_at: Utc::now(),
                state: reader.state(),
            };
            Some((sample, (reader, index + 1)))
        })
    }
}

fn sample_count(duration: Duration, interval: Duration) -> usize {
    if interval.is_zero() {
        return 1;
    }
    let count = duration.as_millis() / interval.as_millis().max(1);
    usize::try_from(count).unwrap_or(usize::MAX).max(1)
}

fn file_info(path: &std::path::Path) -> Option<FileInfo> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(FileInfo {
        path: path.to_path_buf(),
        age: modified.elapsed().unwrap_or_default(),
    })
}

/// What happened over a `monitor` run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    /// Samples taken
    pub samples: usize,
    /// Samples that had a snapshot
    pub with_data: usize,
    /// Mode seen in the first sample with data
    pub initial_mode: Option<String>,
    /// Consecutive mode changes, oldest first
    pub mode_transitions: Vec<(String, String)>,
    /// First observed (x, y)
    pub start: Option<(f64, f64)>,
    /// Last observed (x, y)
    pub end: Option<(f64, f64)>,
    /// Path length through the observed positions
    pub distance: f64,
    /// Integer fields that changed, with first and last value
    pub counters: Vec<(String, i64, i64)>,
    /// Whether the controller reloaded during the run
    pub reloaded: bool,
}

impl MonitorReport {
    /// Summarise samples of the primary robot.
    pub fn from_samples(samples: &[MonitorSample]) -> Self {
        let views: Vec<&SnapshotView> = samples
            .iter()
            .filter_map(|s| s.state.snapshot())
            .collect();
        let robots: Vec<Map<String, Value>> =
            views.iter().map(|v| v.primary_robot()).collect();

        let modes: Vec<String> = robots
            .iter()
            .map(|r| match r.get("mode") {
                Some(Value::String(mode)) => mode.clone(),
                Some(other) => other.to_string(),
                None => "unknown".to_string(),
            })
            .collect();
        let mode_transitions = modes
            .windows(2)
            .filter(|w| w[0] != w[1])
            .map(|w| (w[0].clone(), w[1].clone()))
            .collect();

        let positions: Vec<(f64, f64)> = robots.iter().filter_map(position).collect();
        let distance = positions
            .windows(2)
            .map(|w| (w[1].0 - w[0].0).hypot(w[1].1 - w[0].1))
            .sum();

        let counters = match (robots.first(), robots.last()) {
            (Some(first), Some(last)) => changed_counters(first, last),
            _ => Vec::new(),
        };
        let reloaded = views.windows(2).any(|w| {
            w[1].snapshot.epoch != w[0].snapshot.epoch
                || w[1].snapshot.sequence < w[0].snapshot.sequence
        });

        Self {
            samples: samples.len(),
            with_data: views.len(),
            initial_mode: modes.first().cloned(),
            mode_transitions,
            start: positions.first().copied(),
            end: positions.last().copied(),
            distance,
            counters,
            reloaded,
        }
    }
}

fn position(robot: &Map<String, Value>) -> Option<(f64, f64)> {
    let pose = robot.get("pose").or_else(|| robot.get("position"))?.as_array()?;
    match pose.as_slice() {
        [x, y, ..] => Some((x.as_f64()?, y.as_f64()?)),
        _ => None,
    }
}

fn changed_counters(
    first: &Map<String, Value>,
    last: &Map<String, Value>,
) -> Vec<(String, i64, i64)> {
    last.iter()
        .filter_map(|(key, value)| {
            let end = value.as_i64()?;
            let start = first.get(key)?.as_i64()?;
            (start != end).then(|| (key.clone(), start, end))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::fs;

    use futures::StreamExt;

    use super::*;
    use crate::automation::UnsupportedAutomation;
    use crate::command::CommandOutcome;

    fn reader() -> (tempfile::TempDir, Reader) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mailbox = Mailbox::open(dir.path()).expect("open");
        let config = ReaderConfig {
            screenshot_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
            monitor_interval: Duration::from_millis(10),
            ..ReaderConfig::default()
        };
        (dir, Reader::new(mailbox, config))
    }

    fn write_state(reader: &Reader, sequence: u64, fields: Value) {
        let fields = fields.as_object().cloned().unwrap();
        let snapshot = StateSnapshot::new(sequence, 0, fields);
        reader
            .mailbox()
            .write_json(&reader.mailbox().status_path(), &snapshot)
            .unwrap();
    }

    #[derive(Debug)]
    struct RecordingAutomation(std::sync::Mutex<Vec<ForceAction>>);

    #[async_trait::async_trait]
    impl WindowAutomation for RecordingAutomation {
        async fn force(&self, action: ForceAction) -> Result<(), AutomationError> {
            self.0.lock().unwrap().push(action);
            Ok(())
        }
    }

    #[test]
    fn test_no_data_before_first_publish() {
        let (_dir, reader) = reader();
        assert!(matches!(reader.state(), StateView::NoData { .. }));
        assert!(reader.robot_state().is_err());
        assert!(reader.world_info().is_err());
        assert!(reader.latest_camera_frame().is_none());
    }

    #[test]
    fn test_malformed_state_is_no_data() {
        let (_dir, reader) = reader();
        fs::write(reader.mailbox().status_path(), b"{\"sequence\": ").unwrap();
        let StateView::NoData { reason } = reader.state() else {
            panic!("expected no data");
        };
        assert!(reason.contains("unreadable"));
    }

    #[test]
    fn test_staleness() {
        let (_dir, reader) = reader();
        let mut snapshot = StateSnapshot::new(1, 0, Map::new());
        snapshot.timestamp -= 60.0;
        reader
            .mailbox()
            .write_json(&reader.mailbox().status_path(), &snapshot)
            .unwrap();
        let view = reader.state().into_result().unwrap();
        assert!(view.stale);
        assert!(view.age >= Duration::from_secs(59));
    }

    #[test]
    fn test_single_robot_projection() {
        let (_dir, reader) = reader();
        write_state(&reader, 3, json!({"pose": [1.0, 2.0, 0.5], "mode": "navigate"}));
        let robots = reader.robot_state().unwrap();
        assert_eq!(robots.sequence, 3);
        assert_eq!(robots.data[DEFAULT_ROBOT]["mode"], "navigate");
    }

    #[test]
    fn test_multi_robot_projection() {
        let (_dir, reader) = reader();
        write_state(
            &reader,
            1,
            json!({"robots": {"alpha": {"mode": "idle"}, "beta": {"mode": "search"}}}),
        );
        let robots = reader.robot_state().unwrap();
        assert_eq!(robots.data.len(), 2);
        assert_eq!(robots.data["beta"]["mode"], "search");
    }

    #[test]
    fn test_sensors_legacy_keys() {
        let (_dir, reader) = reader();
        write_state(
            &reader,
            1,
            json!({"lidar_data": {"min": 0.4}, "recognized_objects": [{"color": "red"}]}),
        );
        let sensors = reader.sensors().unwrap();
        assert_eq!(sensors.data["lidar"]["min"], 0.4);
        assert_eq!(sensors.data["camera"]["recognized_objects"][0]["color"], "red");

        write_state(&reader, 2, json!({"mode": "idle"}));
        assert!(reader.sensors().is_err());
    }

    #[test]
    fn test_command_lifecycle() {
        let (_dir, reader) = reader();
        let cmd = reader.reset_controller_state().unwrap();
        assert!(matches!(reader.command_status(&cmd.id), CommandStatus::Pending(_)));

        // What the publisher does on claim.
        let mailbox = reader.mailbox();
        fs::rename(mailbox.commands_path(), mailbox.last_command_path()).unwrap();
        assert!(matches!(
            reader.command_status(&cmd.id),
            CommandStatus::Claimed(_)
        ));

        let record = CommandRecord {
            command: cmd.clone(),
            claimed_at: Some(1.0),
            outcome: Some(CommandOutcome {
                status: OutcomeStatus::UnknownAction,
                detail: "unknown command action: reset_state".to_string(),
            }),
        };
        reader
            .mailbox()
            .write_json(&reader.mailbox().last_command_path(), &record)
            .unwrap();
        assert!(matches!(
            reader.command_status(&cmd.id),
            CommandStatus::Completed {
                outcome: CommandOutcome {
                    status: OutcomeStatus::UnknownAction,
                    ..
                },
                ..
            }
        ));
        assert_eq!(reader.command_status("other"), CommandStatus::Unknown);
    }

    #[test]
    fn test_second_command_replaces_first() {
        let (_dir, reader) = reader();
        let first = reader.send_command("a", Map::new()).unwrap();
        let second = reader.send_command("b", Map::new()).unwrap();
        assert_eq!(reader.command_status(&first.id), CommandStatus::Unknown);
        assert!(matches!(reader.command_status(&second.id), CommandStatus::Pending(_)));
    }

    #[tokio::test]
    async fn test_simulation_control_queues_command() {
        let (_dir, reader) = reader();
        let automation = UnsupportedAutomation::current();
        let outcome = reader
            .simulation_control(SimulationVerb::Pause, false, &automation)
            .await
            .unwrap();
        let ControlOutcome::Queued(cmd) = outcome else {
            panic!("expected a queued command");
        };
        assert_eq!(cmd.action, SIMULATION_ACTION);
        assert_eq!(cmd.str_arg("command"), Some("pause"));
    }

    #[tokio::test]
    async fn test_forced_reload_uses_automation() {
        let (_dir, reader) = reader();
        let automation = RecordingAutomation(Default::default());
        let outcome = reader
            .simulation_control(SimulationVerb::Reload, true, &automation)
            .await
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Forced(ForceAction::Reload));
        assert_eq!(*automation.0.lock().unwrap(), vec![ForceAction::Reload]);
        assert!(!reader.mailbox().commands_path().exists());
    }

    #[tokio::test]
    async fn test_force_rejected_for_pause() {
        let (_dir, reader) = reader();
        let automation = UnsupportedAutomation::current();
        let err = reader
            .simulation_control(SimulationVerb::Pause, true, &automation)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::ForceNotApplicable(SimulationVerb::Pause)));
    }

    #[tokio::test]
    async fn test_screenshot_times_out_as_pending() {
        let (_dir, reader) = reader();
        let started = std::time::Instant::now();
        let outcome = reader.take_screenshot().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        let ScreenshotOutcome::Pending { path, command_id } = outcome else {
            panic!("expected a pending screenshot");
        };
        assert!(path.starts_with(reader.mailbox().screenshots_dir()));
        assert!(matches!(
            reader.command_status(&command_id),
            CommandStatus::Pending(_)
        ));
    }

    #[tokio::test]
    async fn test_monitor_sample_count() {
        let (_dir, reader) = reader();
        write_state(&reader, 1, json!({"mode": "idle"}));

        let samples: Vec<_> = reader.monitor(Duration::from_millis(50)).collect().await;
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0].index, 0);

        // Shorter than one interval still yields one sample.
        let samples: Vec<_> = reader.monitor(Duration::ZERO).collect().await;
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_monitor_report() {
        let sample = |index, sequence, fields: Value| MonitorSample {
            index,
            taken_at: Utc::now(),
            state: StateView::Snapshot(SnapshotView {
                snapshot: StateSnapshot::new(
                    sequence,
                    0,
                    fields.as_object().cloned().unwrap(),
                ),
                age: Duration::ZERO,
                stale: false,
            }),
        };
        let samples = vec![
            sample(0, 1, json!({"mode": "search", "pose": [0.0, 0.0, 0.0], "collected": 0})),
            sample(1, 2, json!({"mode": "search", "pose": [3.0, 4.0, 0.0], "collected": 0})),
            MonitorSample {
                index: 2,
                taken_at: Utc::now(),
                state: StateView::NoData { reason: "gone".into() },
            },
            sample(3, 3, json!({"mode": "grasp", "pose": [3.0, 4.0, 1.0], "collected": 2})),
        ];

        let report = MonitorReport::from_samples(&samples);
        assert_eq!(report.samples, 4);
        assert_eq!(report.with_data, 3);
        assert_eq!(report.initial_mode.as_deref(), Some("search"));
        assert_eq!(report.mode_transitions, vec![("search".to_string(), "grasp".to_string())]);
        assert!((report.distance - 5.0).abs() < 1e-9);
        assert_eq!(report.counters, vec![("collected".to_string(), 0, 2)]);
        assert!(!report.reloaded);
    }

    #[test]
    fn test_sample_count() {
        assert_eq!(sample_count(Duration::from_secs(20), Duration::from_secs(2)), 10);
        assert_eq!(sample_count(Duration::from_secs(1), Duration::from_secs(2)), 1);
        assert_eq!(sample_count(Duration::from_secs(5), Duration::ZERO), 1);
    }
}
