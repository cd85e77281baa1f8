//! Reload detection.
//!
//! The controller keeps running across a simulation reset, so nothing tells
//! it the world went back to t=0. [`ReloadDetector`] compares successive
//! observations of the run state and fires the registered callbacks once per
//! change, in registration order.

use std::fmt;

use crate::host::RunFingerprint;

/// Error type returned by reload callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

type ReloadCallback = Box<dyn FnMut(&ReloadEvent) -> Result<(), CallbackError> + Send>;

/// Why a reload was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    /// The host's reset counter changed.
    ResetCounter,
    /// Simulated time went backwards.
    TimeRegression,
    /// The state document vanished after the controller had written it.
    StateFileMissing,
}

impl fmt::Display for ReloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReloadReason::ResetCounter => "reset counter changed",
            ReloadReason::TimeRegression => "simulated time went backwards",
            ReloadReason::StateFileMissing => "state document disappeared",
        })
    }
}

/// One observation of the run state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Observation {
    /// Host fingerprint
    pub fingerprint: RunFingerprint,
    /// Whether the state document is missing although it was written before
    pub state_file_lost: bool,
}

/// Passed to every reload callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReloadEvent {
    /// Reload count after this reload
    pub epoch: u64,
    /// What triggered detection
    pub reason: ReloadReason,
    /// Fingerprint seen before the reload
    pub previous: RunFingerprint,
    /// Fingerprint seen now
    pub current: RunFingerprint,
}

/// Tracks run fingerprints and runs callbacks when they break continuity.
#[derive(Default)]
pub struct ReloadDetector {
    last: Option<RunFingerprint>,
    epoch: u64,
    callbacks: Vec<ReloadCallback>,
}

impl fmt::Debug for ReloadDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadDetector")
            .field("last", &self.last)
            .field("epoch", &self.epoch)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl ReloadDetector {
    /// Create a detector with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reloads detected so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Append a callback. Callbacks run in registration order.
    pub fn on_reload<F>(&mut self, callback: F)
    where
        F: FnMut(&ReloadEvent) -> Result<(), CallbackError> + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Record an observation. Returns the event if it marks a reload.
    ///
    /// The first observation only establishes the baseline. Observing the
    /// same run state again is a no-op.
    pub fn observe(&mut self, observation: Observation) -> Option<ReloadEvent> {
        let current = observation.fingerprint;
        let previous = self.last.replace(current);

        let reason = if observation.state_file_lost {
            Some(ReloadReason::StateFileMissing)
        } else {
            previous.and_then(|previous| discontinuity(&previous, &current))
        }?;

        self.epoch += 1;
        let event = ReloadEvent {
            epoch: self.epoch,
            reason,
            previous: previous.unwrap_or_default(),
            current,
        };
        self.run_callbacks(&event);
        Some(event)
    }

    fn run_callbacks(&mut self, event: &ReloadEvent) {
        for (index, callback) in self.callbacks.iter_mut().enumerate() {
            if let Err(e) = callback(event) {
                tracing::warn!(callback = index, error = %e, "reload callback failed");
            }
        }
    }
}

fn discontinuity(previous: &RunFingerprint, current: &RunFingerprint) -> Option<ReloadReason> {
    if let (Some(a), Some(b)) = (previous.reset_count, current.reset_count)
        && a != b
    {
        return Some(ReloadReason::ResetCounter);
    }
    if let (Some(a), Some(b)) = (previous.sim_time, current.sim_time)
        && b < a
    {
        return Some(ReloadReason::TimeRegression);
    }
    None
}
