//! Capabilities the embedding simulator provides to the publisher.
//!
//! The bridge never steps, pauses or renders anything itself. It forwards
//! verbs to a [`SimulationHost`] and pulls frames from a [`Camera`]. Every
//! host method defaults to [`HostError::Unsupported`], which is what a
//! controller without supervisor rights gets.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by host capabilities
#[derive(Debug, Error)]
pub enum HostError {
    /// The host does not offer this capability
    #[error("{0} is not supported by this host")]
    Unsupported(&'static str),
    /// The host tried and failed
    #[error("host error: {0}")]
    Failed(String),
}

/// Simulation run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    /// Stopped
    Paused,
    /// Running at wall-clock speed
    RealTime,
    /// Running as fast as possible
    Fast,
}

/// Verbs accepted by the built-in `simulation` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationVerb {
    /// Pause the simulation
    Pause,
    /// Resume in real time
    Resume,
    /// Reset to the initial state, keeping the world loaded
    Reset,
    /// Reload the world file
    Reload,
    /// Advance a single step
    Step,
    /// Run as fast as possible
    Fast,
}

impl SimulationVerb {
    /// All verbs, in documentation order.
    pub const ALL: [SimulationVerb; 6] = [
        SimulationVerb::Pause,
        SimulationVerb::Resume,
        SimulationVerb::Reset,
        SimulationVerb::Reload,
        SimulationVerb::Step,
        SimulationVerb::Fast,
    ];

    /// Wire name of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationVerb::Pause => "pause",
            SimulationVerb::Resume => "resume",
            SimulationVerb::Reset => "reset",
            SimulationVerb::Reload => "reload",
            SimulationVerb::Step => "step",
            SimulationVerb::Fast => "fast",
        }
    }

    /// Forward this verb to the host as a single call.
    pub fn apply(self, host: &mut dyn SimulationHost) -> Result<(), HostError> {
        match self {
            SimulationVerb::Pause => host.set_mode(SimulationMode::Paused),
            SimulationVerb::Resume => host.set_mode(SimulationMode::RealTime),
            SimulationVerb::Fast => host.set_mode(SimulationMode::Fast),
            SimulationVerb::Reset => host.reset(),
            SimulationVerb::Reload => host.reload_world(),
            SimulationVerb::Step => host.step(),
        }
    }
}

impl fmt::Display for SimulationVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimulationVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown simulation verb: {s}"))
    }
}

/// Observable run state used to notice resets and reloads.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RunFingerprint {
    /// Simulated time in seconds
    pub sim_time: Option<f64>,
    /// Host-maintained reset counter
    pub reset_count: Option<u64>,
}

/// Simulation control exposed by the host environment.
pub trait SimulationHost: Send {
    /// Switch the run mode.
    fn set_mode(&mut self, mode: SimulationMode) -> Result<(), HostError> {
        let _ = mode;
        Err(HostError::Unsupported("simulation mode control"))
    }

    /// Reset the simulation, keeping the world loaded.
    fn reset(&mut self) -> Result<(), HostError> {
        Err(HostError::Unsupported("simulation reset"))
    }

    /// Reload the world file.
    fn reload_world(&mut self) -> Result<(), HostError> {
        Err(HostError::Unsupported("world reload"))
    }

    /// Advance one basic time step.
    fn step(&mut self) -> Result<(), HostError> {
        Err(HostError::Unsupported("single step"))
    }

    /// Render the current view to an image file.
    fn export_image(&mut self, path: &Path, quality: u8) -> Result<(), HostError> {
        let _ = (path, quality);
        Err(HostError::Unsupported("screenshot export"))
    }

    /// Current run fingerprint for reload detection.
    fn run_fingerprint(&self) -> RunFingerprint {
        RunFingerprint::default()
    }
}

/// Host without any simulation control.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHost;

impl SimulationHost for NoHost {}

/// An encoded camera image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Encoded bytes, opaque to the bridge
    pub data: Vec<u8>,
    /// File extension matching the encoding, without the dot
    pub extension: String,
}

impl Frame {
    /// Frame of PNG-encoded bytes.
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            data,
            extension: "png".to_string(),
        }
    }
}

/// A camera the publisher can pull frames from.
pub trait Camera {
    /// Latest frame, or `None` when the camera has nothing yet.
    fn capture(&mut self) -> Result<Option<Frame>, HostError>;
}
