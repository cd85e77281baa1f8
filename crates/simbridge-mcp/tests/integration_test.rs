//! Integration tests for the Simbridge MCP server.
//!
//! These tests spawn the server binary against a temporary mailbox and talk
//! to it over stdio using JSON-RPC, the same way an agent host does.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use serde_json::{Value, json};
use simbridge::{Mailbox, StateSnapshot};
use tempfile::TempDir;

/// Helper to spawn the MCP server process
struct McpServerProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    _data: TempDir,
    mailbox: Mailbox,
}

impl McpServerProcess {
    fn spawn() -> Self {
        let data = tempfile::tempdir().expect("tempdir");
        let mailbox = Mailbox::open(data.path().join("data")).expect("open mailbox");

        let mut child = Command::new(env!("CARGO_BIN_EXE_simbridge-mcp"))
            .arg("--data-dir")
            .arg(mailbox.root())
            .arg("--screenshot-timeout-ms")
            .arg("200")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .unwrap_or_else(|e| panic!("Failed to spawn simbridge-mcp: {}", e));

        let stdout = BufReader::new(child.stdout.take().expect("stdout not captured"));
        Self {
            child,
            stdout,
            next_id: 1,
            _data: data,
            mailbox,
        }
    }

    fn send(&mut self, message: &Value) {
        let stdin = self.child.stdin.as_mut().expect("stdin not captured");
        let line = serde_json::to_string(message).expect("serialize message");
        writeln!(stdin, "{}", line).expect("write message");
        stdin.flush().expect("flush stdin");
    }

    /// Send a JSON-RPC request and get the response
    fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        }));

        let mut line = String::new();
        self.stdout.read_line(&mut line).expect("read response");
        let response: Value = serde_json::from_str(&line)
            .unwrap_or_else(|e| panic!("parse response '{}': {}", line.trim(), e));
        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["id"], id);
        response
    }

    /// Call a tool and return its result object
    fn call(&mut self, name: &str, arguments: Value) -> Value {
        let response = self.request("tools/call", json!({"name": name, "arguments": arguments}));
        assert!(
            response.get("result").is_some(),
            "Expected result, got: {}",
            response
        );
        response["result"].clone()
    }

    fn initialize(&mut self) -> Value {
        let response = self.request(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "simbridge-mcp-test",
                    "version": "0.1.0"
                }
            }),
        );
        assert!(
            response.get("result").is_some(),
            "Expected result in initialize response, got: {}",
            response
        );

        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }));
        // Give the server a moment to process
        std::thread::sleep(Duration::from_millis(50));
        response
    }
}

impl Drop for McpServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().expect("text content")
}

#[test]
fn test_mcp_initialize() {
    let mut server = McpServerProcess::spawn();
    let response = server.initialize();

    let result = &response["result"];
    assert!(result.get("serverInfo").is_some(), "Expected serverInfo in result");
    assert!(
        result["capabilities"].get("tools").is_some(),
        "Expected tools capability"
    );
}

#[test]
fn test_mcp_list_tools() {
    let mut server = McpServerProcess::spawn();
    server.initialize();

    let response = server.request("tools/list", json!({}));
    let tools = response["result"]["tools"]
        .as_array()
        .expect("tools should be an array");

    for name in [
        "get_world_info",
        "get_robot_state",
        "get_sensors",
        "get_full_state",
        "get_camera",
        "get_logs",
        "simulation_control",
        "world_reload",
        "world_reset",
        "reset_controller_state",
        "take_screenshot",
        "monitor",
        "command_status",
    ] {
        let tool = tools
            .iter()
            .find(|t| t["name"] == name)
            .unwrap_or_else(|| panic!("Expected '{}' tool", name));
        assert!(tool.get("inputSchema").is_some(), "{} should have inputSchema", name);
        assert!(tool.get("annotations").is_some(), "{} should have annotations", name);
    }

    let read_only = tools.iter().find(|t| t["name"] == "get_sensors").unwrap();
    assert_eq!(read_only["annotations"]["readOnlyHint"], true);
    let reload = tools.iter().find(|t| t["name"] == "world_reload").unwrap();
    assert_eq!(reload["annotations"]["destructiveHint"], true);
    let control = tools.iter().find(|t| t["name"] == "simulation_control").unwrap();
    assert_eq!(control["annotations"]["idempotentHint"], false);
}

#[test]
fn test_mcp_state_before_controller() {
    let mut server = McpServerProcess::spawn();
    server.initialize();

    let result = server.call("get_robot_state", json!({}));
    assert_eq!(result["isError"], true);
    assert!(text(&result).contains("no state published yet"));
}

#[test]
fn test_mcp_reads_published_state() {
    let mut server = McpServerProcess::spawn();
    server.initialize();

    let snapshot = StateSnapshot::new(
        3,
        0,
        json!({"pose": [1.0, 2.0, 0.0], "mode": "navigate"})
            .as_object()
            .cloned()
            .unwrap(),
    );
    server
        .mailbox
        .write_json(&server.mailbox.status_path(), &snapshot)
        .unwrap();

    let result = server.call("get_robot_state", json!({}));
    let body = text(&result);
    assert!(body.contains("**Mode**: `navigate`"), "got: {}", body);
    assert!(body.contains("Snapshot #3"), "got: {}", body);

    let result = server.call("get_full_state", json!({}));
    assert!(text(&result).contains("\"mode\": \"navigate\""));
}

#[test]
fn test_mcp_control_writes_command() {
    let mut server = McpServerProcess::spawn();
    server.initialize();

    let result = server.call("simulation_control", json!({"command": "pause"}));
    assert_ne!(result["isError"], true);

    let pending: Value = server
        .mailbox
        .read_json(&server.mailbox.commands_path())
        .into_option()
        .expect("command written");
    assert_eq!(pending["action"], "simulation");
    assert_eq!(pending["payload"]["command"], "pause");

    let id = pending["id"].as_str().unwrap();
    let result = server.call("command_status", json!({"id": id}));
    assert!(text(&result).contains("is pending"));
}

#[test]
fn test_mcp_invalid_params() {
    let mut server = McpServerProcess::spawn();
    server.initialize();

    let response = server.request(
        "tools/call",
        json!({"name": "simulation_control", "arguments": {"command": "warp"}}),
    );
    assert!(response.get("error").is_some(), "Expected error, got: {}", response);

    let response = server.request(
        "tools/call",
        json!({"name": "get_logs", "arguments": {"lines": 1000}}),
    );
    assert!(response.get("error").is_some(), "Expected error, got: {}", response);
}
