//! Command dispatch table.
//!
//! Maps an action name to a handler. The table starts with the built-in
//! `simulation` and `screenshot` handlers; controllers add their own with
//! [`DispatchTable::register`]. Lookup is an exact string match, and the
//! last registration for an action wins.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Local;
use thiserror::Error;

use crate::command::{Command, SCREENSHOT_ACTION, SIMULATION_ACTION};
use crate::host::{HostError, SimulationHost, SimulationVerb};
use crate::logbook::{self, LogLevel};
use crate::storage::Mailbox;

/// Errors returned by command handlers
#[derive(Debug, Error)]
pub enum CommandError {
    /// A required payload field is absent
    #[error("missing payload field `{0}`")]
    MissingField(&'static str),
    /// A payload field has an unusable value
    #[error("invalid payload field `{field}`: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
    /// The host capability failed
    #[error(transparent)]
    Host(#[from] HostError),
    /// Handler-specific failure
    #[error("{0}")]
    Other(String),
}

/// What a handler gets to work with while a command runs.
pub struct HandlerContext<'a> {
    /// The simulation host
    pub host: &'a mut dyn SimulationHost,
    /// The mailbox the command arrived through
    pub mailbox: &'a Mailbox,
}

impl HandlerContext<'_> {
    /// Append an INFO line to the controller log.
    pub fn log(&self, message: &str) {
        logbook::append(self.mailbox, LogLevel::Info, message);
    }
}

impl fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}

/// A command handler.
///
/// Returns a short human-readable result on success, which is recorded as
/// the command outcome. Implemented for matching closures.
pub trait CommandHandler: Send {
    /// Execute `command`.
    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        command: &Command,
    ) -> Result<String, CommandError>;
}

impl<F> CommandHandler for F
where
    F: FnMut(&mut HandlerContext<'_>, &Command) -> Result<String, CommandError> + Send,
{
    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        command: &Command,
    ) -> Result<String, CommandError> {
        self(ctx, command)
    }
}

/// Action name to handler mapping.
pub struct DispatchTable {
    handlers: BTreeMap<String, Box<dyn CommandHandler>>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("actions", &self.actions())
            .finish()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl DispatchTable {
    /// Create an empty table.
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Create a table with the `simulation` and `screenshot` handlers.
    pub fn with_builtins() -> Self {
        let mut table = Self::empty();
        table.register(SIMULATION_ACTION, SimulationHandler);
        table.register(SCREENSHOT_ACTION, ScreenshotHandler);
        table
    }

    /// Insert or replace the handler for `action`.
    ///
    /// Returns true if an earlier handler was replaced.
    pub fn register(
        &mut self,
        action: impl Into<String>,
        handler: impl CommandHandler + 'static,
    ) -> bool {
        self.handlers
            .insert(action.into(), Box::new(handler))
            .is_some()
    }

    /// Insert or replace a closure handler for `action`.
    pub fn register_fn<F>(&mut self, action: impl Into<String>, handler: F) -> bool
    where
        F: FnMut(&mut HandlerContext<'_>, &Command) -> Result<String, CommandError>
            + Send
            + 'static,
    {
        self.register(action, handler)
    }

    /// Whether a handler is registered for `action`.
    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Handler for `action`, if any.
    pub fn get_mut(&mut self, action: &str) -> Option<&mut (dyn CommandHandler + 'static)> {
        self.handlers.get_mut(action).map(|h| h.as_mut())
    }
}

/// Built-in `simulation` handler: forwards `payload.command` to the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulationHandler;

impl CommandHandler for SimulationHandler {
    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        command: &Command,
    ) -> Result<String, CommandError> {
        let raw = command
            .str_arg("command")
            .ok_or(CommandError::MissingField("command"))?;
        let verb: SimulationVerb = raw.parse().map_err(|reason| CommandError::InvalidField {
            field: "command",
            reason,
        })?;

        verb.apply(ctx.host)?;
        let message = format!("Simulation: {verb}");
        ctx.log(&message);
        Ok(message)
    }
}

/// Built-in `screenshot` handler: asks the host to export the current view
/// to `screenshots/<filename>.png`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenshotHandler;

impl CommandHandler for ScreenshotHandler {
    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        command: &Command,
    ) -> Result<String, CommandError> {
        let filename = match command.str_arg("filename") {
            Some(name) => {
                validate_file_name(name)?;
                name.to_string()
            }
            None => format!("screenshot_{}", Local::now().format("%H%M%S")),
        };

        let path = ctx.mailbox.screenshots_dir().join(format!("{filename}.png"));
        ctx.host.export_image(&path, 100)?;
        let message = format!("Screenshot: {filename}.png");
        ctx.log(&message);
        Ok(message)
    }
}

fn validate_file_name(name: &str) -> Result<(), CommandError> {
    let invalid = |reason: &str| CommandError::InvalidField {
        field: "filename",
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(invalid("must be a bare file name"));
    }
    Ok(())
}
