//! Simbridge CLI - mock controller and mailbox inspection
//!
//! Usage:
//!   simbridge run                  Run a mock controller against the mailbox
//!   simbridge state                Print the latest state snapshot
//!   simbridge send <action>        Queue a command for the controller
//!   simbridge status <id>          Show where a command is in its lifecycle
//!   simbridge logs                 Print recent controller log lines

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use simbridge::{
    Camera, CommandStatus, DEFAULT_DATA_DIR, Frame, HostError, Mailbox, Publisher,
    PublisherConfig, RESET_STATE_ACTION, Reader, ReaderConfig, RunFingerprint, SimulationHost,
    SimulationMode, Throttle,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Smallest valid PNG (1x1 transparent pixel), used for mock frames.
const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

#[derive(Debug, Parser)]
#[command(name = "simbridge", version, about = "Simulation mailbox tools")]
struct Cli {
    /// Mailbox directory
    #[arg(long, global = true, env = "SIMBRIDGE_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Run a mock controller that publishes state and executes commands
    Run {
        /// Simulated step length in milliseconds
        #[arg(long, default_value_t = 32)]
        step_ms: u64,

        /// Write state every N steps
        #[arg(long, default_value = "5")]
        throttle_steps: NonZeroU32,

        /// Stop after this many steps
        #[arg(long)]
        steps: Option<u64>,
    },
    /// Print the latest state snapshot as JSON
    State,
    /// Queue a command for the controller
    Send {
        /// Command action, e.g. `simulation` or `reset_state`
        action: String,

        /// Payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Show the lifecycle of a command
    Status {
        /// Command id printed by `send`
        id: String,
    },
    /// Print recent controller log lines, oldest first
    Logs {
        /// Number of lines
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,

        /// Only lines containing this text
        #[arg(long)]
        filter: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let mailbox = Mailbox::open(&cli.data_dir)
        .with_context(|| format!("opening mailbox at {}", cli.data_dir.display()))?;

    match cli.command {
        Cmd::Run {
            step_ms,
            throttle_steps,
            steps,
        } => run(mailbox, Duration::from_millis(step_ms), throttle_steps, steps).await,
        Cmd::State => {
            let reader = Reader::new(mailbox, ReaderConfig::default());
            let state = reader.full_state().map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Cmd::Send { action, payload } => {
            let payload: Map<String, Value> =
                serde_json::from_str(&payload).context("payload must be a JSON object")?;
            let reader = Reader::new(mailbox, ReaderConfig::default());
            let command = reader.send_command(action, payload)?;
            println!("{}", command.id);
            Ok(())
        }
        Cmd::Status { id } => {
            let reader = Reader::new(mailbox, ReaderConfig::default());
            match reader.command_status(&id) {
                CommandStatus::Pending(cmd) => println!("pending: {}", cmd.action),
                CommandStatus::Claimed(cmd) => println!("claimed: {}", cmd.action),
                CommandStatus::Completed { command, outcome } => println!(
                    "completed: {} ({:?}) {}",
                    command.action, outcome.status, outcome.detail
                ),
                CommandStatus::Unknown => println!("unknown"),
            }
            Ok(())
        }
        Cmd::Logs { lines, filter } => {
            let reader = Reader::new(mailbox, ReaderConfig::default());
            for entry in reader.logs(lines, filter.as_deref()).iter().rev() {
                println!("{entry}");
            }
            Ok(())
        }
    }
}

/// State the mock controller keeps outside the simulator.
#[derive(Debug, Default)]
struct Progress {
    collected: u64,
    mode: &'static str,
}

impl Progress {
    fn reset(&mut self) {
        *self = Self {
            collected: 0,
            mode: "search",
        };
    }
}

fn lock(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(|e| e.into_inner())
}

/// A robot driving in a circle.
#[derive(Debug)]
struct MockHost {
    mode: SimulationMode,
    step: Duration,
    sim_time: f64,
    resets: u64,
    step_requested: bool,
}

impl MockHost {
    fn new(step: Duration) -> Self {
        Self {
            mode: SimulationMode::RealTime,
            step,
            sim_time: 0.0,
            resets: 0,
            step_requested: false,
        }
    }

    /// Advance time if the simulation is running. Returns whether it moved.
    fn tick(&mut self) -> bool {
        let steps = match self.mode {
            SimulationMode::Paused if self.step_requested => 1,
            SimulationMode::Paused => 0,
            SimulationMode::RealTime => 1,
            SimulationMode::Fast => 4,
        };
        self.step_requested = false;
        self.sim_time += self.step.as_secs_f64() * f64::from(steps);
        steps > 0
    }

    fn pose(&self) -> [f64; 3] {
        let angle = self.sim_time * 0.2;
        [angle.cos(), angle.sin(), angle + std::f64::consts::FRAC_PI_2]
    }
}

impl SimulationHost for MockHost {
    fn set_mode(&mut self, mode: SimulationMode) -> Result<(), HostError> {
        self.mode = mode;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), HostError> {
        self.sim_time = 0.0;
        self.resets += 1;
        Ok(())
    }

    fn reload_world(&mut self) -> Result<(), HostError> {
        self.reset()
    }

    fn step(&mut self) -> Result<(), HostError> {
        self.step_requested = true;
        Ok(())
    }

    fn export_image(&mut self, path: &Path, _quality: u8) -> Result<(), HostError> {
        std::fs::write(path, PIXEL_PNG).map_err(|e| HostError::Failed(e.to_string()))
    }

    fn run_fingerprint(&self) -> RunFingerprint {
        RunFingerprint {
            sim_time: Some(self.sim_time),
            reset_count: Some(self.resets),
        }
    }
}

#[derive(Debug)]
struct MockCamera;

impl Camera for MockCamera {
    fn capture(&mut self) -> Result<Option<Frame>, HostError> {
        Ok(Some(Frame::png(PIXEL_PNG.to_vec())))
    }
}

async fn run(
    mailbox: Mailbox,
    step: Duration,
    throttle_steps: NonZeroU32,
    steps: Option<u64>,
) -> anyhow::Result<()> {
    let config = PublisherConfig {
        throttle: Throttle::Steps(throttle_steps),
        ..PublisherConfig::default()
    };
    let mut publisher = Publisher::new(mailbox, MockHost::new(step), config);

    let progress = Arc::new(Mutex::new(Progress::default()));
    lock(&progress).reset();

    let handler_progress = Arc::clone(&progress);
    publisher.register_command(RESET_STATE_ACTION, move |ctx, _command| {
        lock(&handler_progress).reset();
        ctx.log("Controller state reset");
        Ok("controller state reset".to_string())
    });
    let reload_progress = Arc::clone(&progress);
    publisher.on_reload(move |event| {
        tracing::info!(epoch = event.epoch, "resetting mock controller after reload");
        lock(&reload_progress).reset();
        Ok(())
    });

    publisher.publish_world_info(&json!({
        "world_name": "mock_arena",
        "time_step": step.as_secs_f64() * 1000.0,
        "robots": [{
            "name": "mock",
            "def_name": "MOCK",
            "type": "Robot",
            "sensors": {"lidar": ["front"], "camera": ["eye"]}
        }]
    }))?;
    publisher.log("Mock controller started");

    let mut camera = MockCamera;
    let mut interval = tokio::time::interval(step);
    let mut count = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                publisher.log("Mock controller stopped");
                return Ok(());
            }
        }

        publisher.detect_reload();
        let moved = publisher.host_mut().tick();
        if moved {
            let mut p = lock(&progress);
            if count % 100 == 99 {
                p.collected += 1;
                p.mode = if p.mode == "search" { "deliver" } else { "search" };
            }
        }

        let state = {
            let p = lock(&progress);
            let host = publisher.host();
            json!({
                "pose": host.pose(),
                "mode": p.mode,
                "collected": p.collected,
                "sim_time": host.sim_time,
                "sensors": {"lidar": {"front": {"min": 1.0 + host.pose()[0].abs()}}},
            })
        };
        publisher.publish(&state, false);
        publisher.save_camera_frame(&mut camera);
        publisher.process_commands();

        count += 1;
        if steps.is_some_and(|limit| count >= limit) {
            publisher.log("Mock controller finished");
            return Ok(());
        }
    }
}
