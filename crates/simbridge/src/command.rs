//! Command documents exchanged through the mailbox.
//!
//! A command is a tagged variant: an `action` naming an entry in the
//! [`DispatchTable`](crate::DispatchTable) and a free-form `payload`.
//! Handlers validate the payload fields they need when they run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::snapshot::unix_now;

/// Action name of the built-in simulation control handler.
pub const SIMULATION_ACTION: &str = "simulation";
/// Action name of the built-in screenshot handler.
pub const SCREENSHOT_ACTION: &str = "screenshot";
/// Conventional action for resetting controller-internal state.
pub const RESET_STATE_ACTION: &str = "reset_state";

/// A single pending request for the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique identifier used to detect re-delivery
    pub id: String,
    /// Dispatch table key
    pub action: String,
    /// Action-specific arguments
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Issue time in unix seconds
    pub timestamp: f64,
}

impl Command {
    /// Create a command with a fresh identifier.
    pub fn new(action: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action: action.into(),
            payload,
            timestamp: unix_now(),
        }
    }

    /// String payload field, if present.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// How the publisher disposed of a claimed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// A handler ran and succeeded.
    Handled,
    /// No handler was registered for the action.
    UnknownAction,
    /// The handler returned an error.
    Failed,
}

/// Outcome recorded after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Disposition
    pub status: OutcomeStatus,
    /// Handler message or error text
    #[serde(default)]
    pub detail: String,
}

/// Contents of the last-command record written by the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// The claimed command
    #[serde(flatten)]
    pub command: Command,
    /// Claim time in unix seconds
    #[serde(default)]
    pub claimed_at: Option<f64>,
    /// Set once the handler has run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CommandOutcome>,
}

/// Lifecycle of a command as seen from the reader.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandStatus {
    /// Still waiting in the mailbox; the controller has not stepped since.
    Pending(Command),
    /// Taken by the controller, handler not finished yet.
    Claimed(Command),
    /// Executed (or dropped) by the controller.
    Completed {
        /// The command
        command: Command,
        /// What happened
        outcome: CommandOutcome,
    },
    /// Neither pending nor the most recent claim: overwritten or long gone.
    Unknown,
}
