//! Markdown rendering of mailbox data for tool responses.

use std::time::Duration;

use serde_json::{Map, Value};
use simbridge::{CommandStatus, FileInfo, LogEntry, MonitorReport, OutcomeStatus, Projection};

/// Responses longer than this are cut off.
pub const CHARACTER_LIMIT: usize = 25_000;

/// State keys rendered separately or not at all in the per-robot section.
const ROBOT_SUMMARY_KEYS: [&str; 7] = [
    "pose", "position", "mode", "state", "timestamp", "sensors", "robots",
];

/// Sensor names listed per kind in the world overview before eliding.
const SENSOR_NAMES_SHOWN: usize = 5;

/// Recognized objects listed in the sensor view.
const OBJECTS_SHOWN: usize = 10;

/// Cut `text` to [`CHARACTER_LIMIT`] characters, marking the cut.
pub fn truncate(text: String) -> String {
    match text.char_indices().nth(CHARACTER_LIMIT) {
        Some((cut, _)) => format!("{}\n\n... [truncated]", &text[..cut]),
        None => text,
    }
}

/// Pretty-printed JSON for `json` responses.
pub fn json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    truncate(
        serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}")),
    )
}

fn freshness(projection: &Projection, stale_after: Duration) -> Vec<String> {
    let mut lines = vec![format!(
        "*Snapshot #{} (epoch {}), {:.1}s old*",
        projection.sequence,
        projection.epoch,
        projection.age.as_secs_f64()
    )];
    if projection.stale {
        lines.push(format!(
            "> **Warning**: no update for more than {:.0}s. \
             The controller may be paused or stopped.",
            stale_after.as_secs_f64()
        ));
    }
    lines.push(String::new());
    lines
}

fn number(value: &Value, decimals: usize) -> String {
    match value.as_f64() {
        Some(n) => format!("{n:.decimals$}"),
        None => scalar(value),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// World name, time step and robots with their sensors.
pub fn world_info(info: &Map<String, Value>) -> String {
    let mut lines = vec!["# World Information".to_string(), String::new()];
    lines.push(format!(
        "**World**: `{}`",
        info.get("world_name").map(scalar).unwrap_or_else(|| "Unknown".into())
    ));
    lines.push(format!(
        "**Time Step**: {}ms",
        info.get("time_step").map(scalar).unwrap_or_else(|| "N/A".into())
    ));
    lines.push(String::new());

    let robots = info.get("robots").and_then(Value::as_array);
    if let Some(robots) = robots.filter(|r| !r.is_empty()) {
        lines.push(format!("## Robots ({})", robots.len()));
        for robot in robots {
            let field = |key: &str, default: &str| {
                robot.get(key).map(scalar).unwrap_or_else(|| default.to_string())
            };
            lines.push(String::new());
            lines.push(format!("### {}", field("name", "Unknown")));
            lines.push(format!("- **DEF**: `{}`", field("def_name", "N/A")));
            lines.push(format!("- **Type**: {}", field("type", "Robot")));

            if let Some(sensors) = robot.get("sensors").and_then(Value::as_object)
                && !sensors.is_empty()
            {
                lines.push("- **Sensors**:".to_string());
                for (kind, names) in sensors {
                    let names: Vec<String> = names
                        .as_array()
                        .map(|n| n.iter().map(scalar).collect())
                        .unwrap_or_default();
                    let shown = names.iter().take(SENSOR_NAMES_SHOWN).cloned().collect::<Vec<_>>();
                    let more = if names.len() > SENSOR_NAMES_SHOWN { "..." } else { "" };
                    lines.push(format!(
                        "  - {kind}: {} ({}{more})",
                        names.len(),
                        shown.join(", ")
                    ));
                }
            }
        }
    }
    truncate(lines.join("\n"))
}

/// Per-robot pose, mode and custom fields.
pub fn robot_state(projection: &Projection, stale_after: Duration) -> String {
    let mut lines = vec!["# Robot State".to_string(), String::new()];
    lines.extend(freshness(projection, stale_after));

    for (name, state) in &projection.data {
        lines.push(format!("## {name}"));
        let Some(state) = state.as_object() else {
            lines.push(scalar(state));
            lines.push(String::new());
            continue;
        };

        if let Some(pose) = state
            .get("pose")
            .or_else(|| state.get("position"))
            .and_then(Value::as_array)
        {
            let coord = |i: usize| pose.get(i).and_then(Value::as_f64);
            match (coord(0), coord(1), coord(2)) {
                (Some(x), Some(y), Some(theta)) => lines.push(format!(
                    "**Position**: ({x:.2}, {y:.2}) θ={:.1}°",
                    theta.to_degrees()
                )),
                (Some(x), Some(y), None) => lines.push(format!("**Position**: ({x:.2}, {y:.2})")),
                _ => {}
            }
        }

        if let Some(mode) = state.get("mode").or_else(|| state.get("state")) {
            lines.push(format!("**Mode**: `{}`", scalar(mode)));
        }

        for (key, value) in state {
            if ROBOT_SUMMARY_KEYS.contains(&key.as_str()) {
                continue;
            }
            let rendered = match value {
                Value::Object(_) => value.to_string(),
                Value::Array(items) => format!("{} items", items.len()),
                other => scalar(other),
            };
            lines.push(format!("**{key}**: {rendered}"));
        }
        lines.push(String::new());
    }
    truncate(lines.join("\n"))
}

/// Sensor readings grouped by kind.
pub fn sensors(projection: &Projection, stale_after: Duration) -> String {
    let mut lines = vec!["# Sensor Readings".to_string(), String::new()];
    lines.extend(freshness(projection, stale_after));
    let sensors = &projection.data;

    if let Some(lidar) = sensors.get("lidar").and_then(Value::as_object)
        && !lidar.is_empty()
    {
        lines.push("## LIDAR".to_string());
        for (name, readings) in lidar {
            match readings {
                Value::Object(r) => {
                    let min = r.get("min").or_else(|| r.get("front")).unwrap_or(&Value::Null);
                    let min = if min.is_null() { "N/A".to_string() } else { number(min, 2) };
                    lines.push(format!("- **{name}**: min={min}m"));
                }
                other => lines.push(format!("- **{name}**: {}m", number(other, 2))),
            }
        }
        lines.push(String::new());
    }

    if let Some(distance) = sensors
        .get("distance")
        .or_else(|| sensors.get("distance_sensors"))
        .and_then(Value::as_object)
        && !distance.is_empty()
    {
        lines.push("## Distance Sensors".to_string());
        for (name, value) in distance {
            if let Some(v) = value.as_f64() {
                let band = if v < 100.0 {
                    "near"
                } else if v < 300.0 {
                    "mid"
                } else {
                    "clear"
                };
                lines.push(format!("- **{name}**: {v:.0} ({band})"));
            }
        }
        lines.push(String::new());
    }

    if let Some(camera) = sensors.get("camera").and_then(Value::as_object) {
        lines.push("## Camera".to_string());
        let objects = camera
            .get("recognized_objects")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if !objects.is_empty() {
            lines.push(format!("Detected {} objects:", objects.len()));
            for object in objects.iter().take(OBJECTS_SHOWN) {
                let color = object
                    .get("color")
                    .map(scalar)
                    .unwrap_or_else(|| "unknown".into());
                let distance = object
                    .get("distance")
                    .map(|d| number(d, 2))
                    .unwrap_or_else(|| "0.00".into());
                lines.push(format!("- {color}: {distance}m"));
            }
        }
        lines.push(String::new());
    }

    for (kind, data) in sensors {
        if matches!(kind.as_str(), "lidar" | "distance" | "distance_sensors" | "camera") {
            continue;
        }
        lines.push(format!("## {}", title_case(kind)));
        match data {
            Value::Object(fields) => {
                for (key, value) in fields {
                    lines.push(format!("- **{key}**: {}", scalar(value)));
                }
            }
            other => lines.push(format!("- {}", scalar(other))),
        }
        lines.push(String::new());
    }
    truncate(lines.join("\n"))
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The whole state document as a JSON block.
pub fn full_state(projection: &Projection) -> String {
    let body = serde_json::to_string_pretty(&projection.data).unwrap_or_default();
    match body.char_indices().nth(CHARACTER_LIMIT) {
        Some((cut, _)) => format!("```json\n{}\n```\n\n... [truncated]", &body[..cut]),
        None => format!("# Full State\n\n```json\n{body}\n```"),
    }
}

/// Path and age of an image file.
pub fn image(heading: &str, info: &FileInfo) -> String {
    let name = info
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    [
        format!("# {heading}"),
        String::new(),
        format!("**File**: `{name}`"),
        format!("**Path**: `{}`", info.path.display()),
        format!("**Age**: {:.1}s", info.age.as_secs_f64()),
        String::new(),
        "Use a file reading tool to view this image.".to_string(),
    ]
    .join("\n")
}

/// Log slice, oldest first as it appears in the file.
pub fn logs(entries: &[LogEntry], filter: Option<&str>) -> String {
    let mut lines = vec!["# Controller Logs".to_string(), String::new()];
    if let Some(filter) = filter {
        lines.push(format!("*Filter: '{filter}'*"));
    }
    lines.push(format!("*Showing {} entries*", entries.len()));
    lines.push(String::new());
    lines.push("```".to_string());
    lines.extend(entries.iter().rev().map(ToString::to_string));
    lines.push("```".to_string());
    truncate(lines.join("\n"))
}

/// Summary of a monitoring run.
pub fn monitor(duration: Duration, report: &MonitorReport) -> String {
    let mut lines = vec!["# Simulation Monitor Report".to_string(), String::new()];
    lines.push(format!(
        "**Duration**: {}s ({} samples, {} with data)",
        duration.as_secs(),
        report.samples,
        report.with_data
    ));
    lines.push(String::new());

    lines.push("## Mode Transitions".to_string());
    if report.mode_transitions.is_empty() {
        let mode = report.initial_mode.as_deref().unwrap_or("unknown");
        lines.push(format!("- Stayed in `{mode}` mode"));
    } else {
        for (from, to) in &report.mode_transitions {
            lines.push(format!("- {from} → {to}"));
        }
    }
    if report.reloaded {
        lines.push("- Controller reloaded during monitoring".to_string());
    }
    lines.push(String::new());

    if let (Some(start), Some(end)) = (report.start, report.end) {
        lines.push("## Movement".to_string());
        lines.push(format!("- **Start**: ({:.2}, {:.2})", start.0, start.1));
        lines.push(format!("- **End**: ({:.2}, {:.2})", end.0, end.1));
        lines.push(format!("- **Distance**: {:.2}m", report.distance));
        lines.push(String::new());
    }

    if !report.counters.is_empty() {
        lines.push("## Progress".to_string());
        for (name, start, end) in &report.counters {
            lines.push(format!("- **{name}**: {start} → {end}"));
        }
    }
    truncate(lines.join("\n"))
}

/// Lifecycle of one command.
pub fn command_status(id: &str, status: &CommandStatus) -> String {
    match status {
        CommandStatus::Pending(cmd) => format!(
            "Command `{id}` (`{}`) is pending. The controller has not stepped since it was sent; \
             the simulation may be paused.",
            cmd.action
        ),
        CommandStatus::Claimed(cmd) => {
            format!("Command `{id}` (`{}`) was picked up and is running.", cmd.action)
        }
        CommandStatus::Completed { command, outcome } => {
            let verdict = match outcome.status {
                OutcomeStatus::Handled => "completed",
                OutcomeStatus::UnknownAction => "was dropped (no handler registered)",
                OutcomeStatus::Failed => "failed",
            };
            let mut text = format!("Command `{id}` (`{}`) {verdict}.", command.action);
            if !outcome.detail.is_empty() {
                text.push_str(&format!("\n\n{}", outcome.detail));
            }
            text
        }
        CommandStatus::Unknown => format!(
            "Command `{id}` is not in the mailbox. It was replaced by a newer command \
             or completed before the last one."
        ),
    }
}

/// JSON form of a command status.
pub fn command_status_json(status: &CommandStatus) -> Value {
    match status {
        CommandStatus::Pending(cmd) => serde_json::json!({"status": "pending", "command": cmd}),
        CommandStatus::Claimed(cmd) => serde_json::json!({"status": "claimed", "command": cmd}),
        CommandStatus::Completed { command, outcome } => {
            serde_json::json!({"status": "completed", "command": command, "outcome": outcome})
        }
        CommandStatus::Unknown => serde_json::json!({"status": "unknown"}),
    }
}
