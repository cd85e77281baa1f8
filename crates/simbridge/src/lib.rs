//! Simbridge: file mailbox between a simulation controller and an agent
//!
//! A controller embeds a [`Publisher`] and calls it once per simulation step
//! to publish state, drain commands and notice reloads. A tool server embeds
//! a [`Reader`] to answer queries from the latest snapshot and to queue
//! commands. The two processes share nothing but a [`Mailbox`] directory of
//! atomically replaced JSON documents and image files.

mod automation;
mod command;
mod config;
mod dispatch;
mod host;
mod logbook;
mod publisher;
mod reader;
mod reload;
mod snapshot;
mod storage;

pub use automation::{
    AppleScriptAutomation, AutomationError, DEFAULT_APPLICATION, ForceAction,
    UnsupportedAutomation, WindowAutomation, default_automation,
};
pub use command::{
    Command, CommandOutcome, CommandRecord, CommandStatus, OutcomeStatus, RESET_STATE_ACTION,
    SCREENSHOT_ACTION, SIMULATION_ACTION,
};
pub use config::{DEFAULT_DATA_DIR, PublisherConfig, ReaderConfig, Throttle};
pub use dispatch::{
    CommandError, CommandHandler, DispatchTable, HandlerContext, ScreenshotHandler,
    SimulationHandler,
};
pub use host::{
    Camera, Frame, HostError, NoHost, RunFingerprint, SimulationHost, SimulationMode,
    SimulationVerb,
};
pub use logbook::{LogEntry, LogLevel};
pub use publisher::{FrameOutcome, PublishOutcome, Publisher};
pub use reader::{
    ControlError, ControlOutcome, DEFAULT_ROBOT, MonitorReport, MonitorSample, NoData, Projection,
    Reader, ScreenshotOutcome, SnapshotView, StateView,
};
pub use reload::{CallbackError, Observation, ReloadDetector, ReloadEvent, ReloadReason};
pub use snapshot::{RESERVED_FIELDS, StateSnapshot, from_unix, unix_now};
pub use storage::{Document, FileInfo, Mailbox, MailboxError};
