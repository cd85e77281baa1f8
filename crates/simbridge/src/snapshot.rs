//! State snapshot document

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names the publisher owns. Caller values under these keys are replaced.
pub const RESERVED_FIELDS: [&str; 3] = ["sequence", "timestamp", "epoch"];

/// Current wall-clock time as fractional unix seconds.
pub fn unix_now() -> f64 {
    to_unix(Utc::now())
}

pub(crate) fn to_unix(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

/// Convert fractional unix seconds back to a UTC datetime.
pub fn from_unix(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
}

/// One published state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Strictly increasing within one controller lifetime, reset on reload
    pub sequence: u64,
    /// Wall-clock write time in unix seconds
    pub timestamp: f64,
    /// Number of reloads the controller has seen
    #[serde(default)]
    pub epoch: u64,
    /// Caller-defined fields (pose, mode, sensors, ...)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StateSnapshot {
    /// Build a snapshot from caller fields, stripping reserved keys.
    pub fn new(sequence: u64, epoch: u64, mut fields: Map<String, Value>) -> Self {
        for key in RESERVED_FIELDS {
            fields.remove(key);
        }
        Self {
            sequence,
            timestamp: unix_now(),
            epoch,
            fields,
        }
    }

    /// Look up a caller-defined field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Time elapsed since the snapshot was written. Clock skew clamps to zero.
    pub fn age(&self) -> Duration {
        Duration::try_from_secs_f64(unix_now() - self.timestamp).unwrap_or_default()
    }

    /// Write time as a datetime, if the timestamp is representable.
    pub fn written_at(&self) -> Option<DateTime<Utc>> {
        from_unix(self.timestamp)
    }

    /// The whole document as a JSON object.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
