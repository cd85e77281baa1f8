//! Simbridge MCP Server
//!
//! Exposes a simulation mailbox as MCP tools: state queries read the latest
//! snapshot, control tools queue commands for the controller's next step.

pub mod format;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::*,
    schemars::{self, JsonSchema},
    service::{RequestContext, RoleServer},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use simbridge::{
    CommandStatus, ControlError, ControlOutcome, MonitorReport, NoData, Reader, ScreenshotOutcome,
    SimulationVerb, WindowAutomation, default_automation,
};

/// Default and bounds for `get_logs.lines`.
const DEFAULT_LOG_LINES: u32 = 50;
const MAX_LOG_LINES: u32 = 500;

/// Default and bounds for `monitor.duration`, in seconds.
const DEFAULT_MONITOR_SECS: u64 = 20;
const MAX_MONITOR_SECS: u64 = 120;

/// Output format for tool responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Human-readable markdown
    #[default]
    Markdown,
    /// Machine-readable JSON
    Json,
}

/// Parameters for tools that only choose an output format
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FormatParams {
    /// Output format: 'markdown' for human-readable or 'json' for machine-readable
    #[serde(default)]
    pub response_format: ResponseFormat,
}

/// Parameters for tools without arguments
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EmptyParams {}

/// Parameters for `get_logs`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LogsParams {
    /// Number of log lines to retrieve (1-500, default 50)
    #[serde(default = "default_log_lines")]
    pub lines: u32,

    /// Only return lines containing this text (case-insensitive)
    #[serde(default)]
    pub filter_text: Option<String>,

    /// Output format
    #[serde(default)]
    pub response_format: ResponseFormat,
}

fn default_log_lines() -> u32 {
    DEFAULT_LOG_LINES
}

/// Simulation verb accepted by `simulation_control`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SimulationCommand {
    /// Pause the simulation
    Pause,
    /// Resume in real time
    Resume,
    /// Reset to the initial state
    Reset,
    /// Reload the world file
    Reload,
    /// Advance a single step
    Step,
    /// Run as fast as possible
    Fast,
}

impl From<SimulationCommand> for SimulationVerb {
    fn from(command: SimulationCommand) -> Self {
        match command {
            SimulationCommand::Pause => SimulationVerb::Pause,
            SimulationCommand::Resume => SimulationVerb::Resume,
            SimulationCommand::Reset => SimulationVerb::Reset,
            SimulationCommand::Reload => SimulationVerb::Reload,
            SimulationCommand::Step => SimulationVerb::Step,
            SimulationCommand::Fast => SimulationVerb::Fast,
        }
    }
}

/// Parameters for `simulation_control`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SimulationParams {
    /// Command: pause, resume, reset, reload, step or fast
    pub command: SimulationCommand,

    /// For reset and reload only: bypass the controller and send the
    /// simulator's keyboard shortcut (macOS only). Use when the controller
    /// is not responding.
    #[serde(default)]
    pub force: bool,
}

/// Parameters for `world_reload` and `world_reset`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ForceParams {
    /// Use the OS-level keyboard shortcut (macOS only). Use when the
    /// controller is not responding.
    #[serde(default)]
    pub force: bool,
}

/// Parameters for `monitor`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MonitorParams {
    /// Duration in seconds to monitor (1-120, default 20)
    #[serde(default = "default_monitor_secs")]
    pub duration: u64,

    /// Output format
    #[serde(default)]
    pub response_format: ResponseFormat,
}

fn default_monitor_secs() -> u64 {
    DEFAULT_MONITOR_SECS
}

/// Parameters for `command_status`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CommandStatusParams {
    /// Command id returned when the command was sent
    pub id: String,

    /// Output format
    #[serde(default)]
    pub response_format: ResponseFormat,
}

/// Behaviour hints attached to a tool.
#[derive(Debug, Clone, Copy)]
struct Hints {
    read_only: bool,
    destructive: bool,
    idempotent: bool,
}

const READ: Hints = Hints {
    read_only: true,
    destructive: false,
    idempotent: true,
};
const OBSERVE: Hints = Hints {
    read_only: true,
    destructive: false,
    idempotent: false,
};
const REQUEST: Hints = Hints {
    read_only: false,
    destructive: false,
    idempotent: false,
};
const DESTRUCTIVE: Hints = Hints {
    read_only: false,
    destructive: true,
    idempotent: false,
};

fn tool<P: JsonSchema>(
    name: &'static str,
    title: &'static str,
    description: &'static str,
    hints: Hints,
) -> Tool {
    let schema = schemars::schema_for!(P);
    let schema_json = serde_json::to_value(schema).unwrap_or_default();
    let input_schema = match schema_json {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    };

    Tool {
        name: name.into(),
        title: Some(title.into()),
        description: Some(description.into()),
        input_schema,
        output_schema: None,
        annotations: Some(ToolAnnotations {
            title: Some(title.into()),
            read_only_hint: Some(hints.read_only),
            destructive_hint: Some(hints.destructive),
            idempotent_hint: Some(hints.idempotent),
            open_world_hint: Some(false),
        }),
        icons: None,
        meta: None,
    }
}

fn parse<P: DeserializeOwned>(arguments: Option<JsonObject>) -> Result<P, McpError> {
    let args = serde_json::Value::Object(arguments.unwrap_or_default());
    serde_json::from_value(args)
        .map_err(|e| McpError::invalid_params(format!("Invalid parameters: {}", e), None))
}

fn text(body: String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(body)])
}

fn failure(body: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(body.into())])
}

fn no_data(e: NoData) -> CallToolResult {
    failure(format!("Error: {e}"))
}

/// MCP server answering tool calls from a simulation mailbox
#[derive(Clone)]
pub struct SimBridgeServer {
    reader: Reader,
    automation: Arc<dyn WindowAutomation>,
}

impl std::fmt::Debug for SimBridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBridgeServer")
            .field("mailbox", &self.reader.mailbox().root())
            .field("automation", &self.automation)
            .finish()
    }
}

impl SimBridgeServer {
    /// Create a server using this platform's window automation.
    pub fn new(reader: Reader) -> Self {
        Self::with_automation(reader, default_automation())
    }

    /// Create a server with an explicit automation backend.
    pub fn with_automation(reader: Reader, automation: Arc<dyn WindowAutomation>) -> Self {
        Self { reader, automation }
    }

    /// All tools, in listing order.
    pub fn tools() -> Vec<Tool> {
        vec![
            tool::<FormatParams>(
                "get_world_info",
                "Get World Info",
                "Get the simulated world: its name, time step, robots and their sensors. \
                 Published once by the controller at startup.",
                READ,
            ),
            tool::<FormatParams>(
                "get_robot_state",
                "Get Robot State",
                "Get the current state of every robot: position, heading, mode and any \
                 custom fields the controller publishes. Reports how old the snapshot is.",
                READ,
            ),
            tool::<FormatParams>(
                "get_sensors",
                "Get Sensor Data",
                "Get the latest sensor readings (lidar, distance sensors, camera recognition \
                 and anything else the controller publishes), grouped by sensor type.",
                READ,
            ),
            tool::<EmptyParams>(
                "get_full_state",
                "Get Full State",
                "Get the complete state document as JSON, for debugging.",
                READ,
            ),
            tool::<EmptyParams>(
                "get_camera",
                "Get Camera Image",
                "Get the path and age of the most recent camera frame.",
                READ,
            ),
            tool::<LogsParams>(
                "get_logs",
                "Get Logs",
                "Get recent controller log lines, optionally filtered by text.",
                READ,
            ),
            tool::<SimulationParams>(
                "simulation_control",
                "Control Simulation",
                "Pause, resume, reset, reload, single-step or fast-forward the simulation. \
                 The command runs on the controller's next step and can be tracked with \
                 command_status.",
                REQUEST,
            ),
            tool::<ForceParams>(
                "world_reload",
                "Reload World",
                "Reload the world file to restart the simulation. With force, sends the \
                 simulator's reload shortcut directly (macOS only) when the controller \
                 is not responding.",
                DESTRUCTIVE,
            ),
            tool::<ForceParams>(
                "world_reset",
                "Reset Simulation",
                "Reset the simulation to its initial state, keeping the world loaded. With \
                 force, sends the simulator's reset shortcut directly (macOS only).",
                DESTRUCTIVE,
            ),
            tool::<EmptyParams>(
                "reset_controller_state",
                "Reset Controller State",
                "Ask the controller to reset its own bookkeeping without reloading the \
                 world. Only has an effect if the controller handles `reset_state`.",
                DESTRUCTIVE,
            ),
            tool::<EmptyParams>(
                "take_screenshot",
                "Take Screenshot",
                "Capture the simulation view and return the image path. Waits briefly for \
                 the controller to write the file.",
                REQUEST,
            ),
            tool::<MonitorParams>(
                "monitor",
                "Monitor Simulation",
                "Sample the state for a number of seconds and report mode transitions, \
                 distance travelled and progress counters.",
                OBSERVE,
            ),
            tool::<CommandStatusParams>(
                "command_status",
                "Command Status",
                "Check whether a command sent earlier is pending, running or done.",
                READ,
            ),
        ]
    }

    /// Run the tool `name` with `arguments`.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        tracing::debug!(tool = name, "tool call");
        match name {
            "get_world_info" => self.get_world_info(parse(arguments)?),
            "get_robot_state" => self.get_robot_state(parse(arguments)?),
            "get_sensors" => self.get_sensors(parse(arguments)?),
            "get_full_state" => {
                let EmptyParams {} = parse(arguments)?;
                self.get_full_state()
            }
            "get_camera" => {
                let EmptyParams {} = parse(arguments)?;
                self.get_camera()
            }
            "get_logs" => self.get_logs(parse(arguments)?),
            "simulation_control" => {
                let params: SimulationParams = parse(arguments)?;
                self.simulation_control(params.command.into(), params.force).await
            }
            "world_reload" => {
                let params: ForceParams = parse(arguments)?;
                self.simulation_control(SimulationVerb::Reload, params.force).await
            }
            "world_reset" => {
                let params: ForceParams = parse(arguments)?;
                self.simulation_control(SimulationVerb::Reset, params.force).await
            }
            "reset_controller_state" => {
                let EmptyParams {} = parse(arguments)?;
                self.reset_controller_state()
            }
            "take_screenshot" => {
                let EmptyParams {} = parse(arguments)?;
                self.take_screenshot().await
            }
            "monitor" => self.monitor(parse(arguments)?).await,
            "command_status" => self.command_status(parse(arguments)?),
            _ => Err(McpError::invalid_params(
                format!("Unknown tool: {}", name),
                None,
            )),
        }
    }

    fn stale_after(&self) -> Duration {
        self.reader.config().stale_after
    }

    fn get_world_info(&self, params: FormatParams) -> Result<CallToolResult, McpError> {
        let info = match self.reader.world_info() {
            Ok(info) => info,
            Err(e) => return Ok(no_data(e)),
        };
        Ok(text(match params.response_format {
            ResponseFormat::Json => format::json(&info),
            ResponseFormat::Markdown => format::world_info(&info),
        }))
    }

    fn get_robot_state(&self, params: FormatParams) -> Result<CallToolResult, McpError> {
        let robots = match self.reader.robot_state() {
            Ok(robots) => robots,
            Err(e) => return Ok(no_data(e)),
        };
        Ok(text(match params.response_format {
            ResponseFormat::Json => format::json(&robots),
            ResponseFormat::Markdown => format::robot_state(&robots, self.stale_after()),
        }))
    }

    fn get_sensors(&self, params: FormatParams) -> Result<CallToolResult, McpError> {
        let sensors = match self.reader.sensors() {
            Ok(sensors) => sensors,
            Err(e) => return Ok(no_data(e)),
        };
        Ok(text(match params.response_format {
            ResponseFormat::Json => format::json(&sensors),
            ResponseFormat::Markdown => format::sensors(&sensors, self.stale_after()),
        }))
    }

    fn get_full_state(&self) -> Result<CallToolResult, McpError> {
        match self.reader.full_state() {
            Ok(state) => Ok(text(format::full_state(&state))),
            Err(e) => Ok(no_data(e)),
        }
    }

    fn get_camera(&self) -> Result<CallToolResult, McpError> {
        match self.reader.latest_camera_frame() {
            Some(frame) => Ok(text(format::image("Camera Frame", &frame))),
            None => Ok(failure(
                "No camera images available. Ensure the controller saves camera frames.",
            )),
        }
    }

    fn get_logs(&self, params: LogsParams) -> Result<CallToolResult, McpError> {
        if !(1..=MAX_LOG_LINES).contains(&params.lines) {
            return Err(McpError::invalid_params(
                format!("lines must be between 1 and {MAX_LOG_LINES}"),
                None,
            ));
        }
        let filter = params.filter_text.as_deref().filter(|f| !f.is_empty());
        let entries = self.reader.logs(params.lines as usize, filter);
        if entries.is_empty() {
            let message = match filter {
                Some(_) => "No matching log entries.",
                None => "No log entries yet.",
            };
            return Ok(text(message.to_string()));
        }
        Ok(text(match params.response_format {
            ResponseFormat::Json => format::json(&entries),
            ResponseFormat::Markdown => format::logs(&entries, filter),
        }))
    }

    async fn simulation_control(
        &self,
        verb: SimulationVerb,
        force: bool,
    ) -> Result<CallToolResult, McpError> {
        match self
            .reader
            .simulation_control(verb, force, self.automation.as_ref())
            .await
        {
            Ok(ControlOutcome::Queued(command)) => Ok(text(format!(
                "Command `{verb}` sent to the simulation (id `{}`). It runs on the \
                 controller's next step.",
                command.id
            ))),
            Ok(ControlOutcome::Forced(action)) => Ok(text(format!(
                "World {action} triggered through the simulator's keyboard shortcut."
            ))),
            Err(ControlError::ForceNotApplicable(verb)) => Err(McpError::invalid_params(
                format!("force is only supported for reload and reset, not {verb}"),
                None,
            )),
            Err(ControlError::Mailbox(e)) => Err(McpError::internal_error(
                format!("Failed to write command: {}", e),
                None,
            )),
            Err(ControlError::Automation(e)) => Ok(failure(format!("Force {verb} failed: {e}"))),
        }
    }

    fn reset_controller_state(&self) -> Result<CallToolResult, McpError> {
        let command = self.reader.reset_controller_state().map_err(|e| {
            McpError::internal_error(format!("Failed to write command: {}", e), None)
        })?;
        Ok(text(format!(
            "Controller state reset requested (id `{}`). The controller must handle \
             `reset_state`; check command_status to confirm.",
            command.id
        )))
    }

    async fn take_screenshot(&self) -> Result<CallToolResult, McpError> {
        let outcome = self.reader.take_screenshot().await.map_err(|e| {
            McpError::internal_error(format!("Failed to request screenshot: {}", e), None)
        })?;
        Ok(match outcome {
            ScreenshotOutcome::Captured(info) => text(format::image("Screenshot", &info)),
            ScreenshotOutcome::Failed { detail, .. } => {
                failure(format!("Screenshot failed: {detail}"))
            }
            ScreenshotOutcome::Pending { path, command_id } => text(format!(
                "Screenshot requested but not written yet (command `{command_id}`).\n\n\
                 **Path**: `{}`\n\nThe controller may be paused; check again shortly.",
                path.display()
            )),
        })
    }

    async fn monitor(&self, params: MonitorParams) -> Result<CallToolResult, McpError> {
        if !(1..=MAX_MONITOR_SECS).contains(&params.duration) {
            return Err(McpError::invalid_params(
                format!("duration must be between 1 and {MAX_MONITOR_SECS} seconds"),
                None,
            ));
        }
        let duration = Duration::from_secs(params.duration);
        let samples: Vec<_> = self.reader.monitor(duration).collect().await;
        let report = MonitorReport::from_samples(&samples);
        if report.with_data == 0 {
            return Ok(failure("No data collected. Is the simulation running?"));
        }
        Ok(text(match params.response_format {
            ResponseFormat::Json => format::json(&report),
            ResponseFormat::Markdown => format::monitor(duration, &report),
        }))
    }

    fn command_status(&self, params: CommandStatusParams) -> Result<CallToolResult, McpError> {
        let status = self.reader.command_status(&params.id);
        let body = match params.response_format {
            ResponseFormat::Json => format::json(&format::command_status_json(&status)),
            ResponseFormat::Markdown => format::command_status(&params.id, &status),
        };
        Ok(match status {
            CommandStatus::Unknown => failure(body),
            _ => text(body),
        })
    }
}

impl ServerHandler for SimBridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Simbridge connects to a running robot simulation through its controller's \
                mailbox directory. Read tools return the latest published snapshot together \
                with its age; control tools queue a command that the controller runs on its \
                next step, so nothing happens while the simulation is paused. Use \
                command_status to follow a command, and force on world_reload/world_reset \
                only when the controller has stopped responding."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch(request.name.as_ref(), request.arguments).await
    }
}
