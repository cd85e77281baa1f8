//! Tunables for the controller-side publisher and the tool-side reader

use std::num::NonZeroU32;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Directory used when no mailbox location is configured.
pub const DEFAULT_DATA_DIR: &str = "data";

/// How often throttled writes are allowed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Throttle {
    /// Write once every N calls.
    Steps(NonZeroU32),
    /// Write once per wall-clock interval.
    #[serde(with = "duration_ms")]
    Interval(Duration),
}

impl Default for Throttle {
    fn default() -> Self {
        Self::Steps(NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN))
    }
}

/// Publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Throttle applied to non-forced state writes and camera frames
    pub throttle: Throttle,
    /// Number of camera frames kept on disk
    pub max_camera_frames: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            throttle: Throttle::default(),
            max_camera_frames: 50,
        }
    }
}

/// Reader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Age after which a snapshot is reported as stale
    #[serde(with = "duration_ms")]
    pub stale_after: Duration,
    /// Upper bound on waiting for a requested screenshot
    #[serde(with = "duration_ms")]
    pub screenshot_timeout: Duration,
    /// Poll period while waiting on the controller
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Period between monitor samples
    #[serde(with = "duration_ms")]
    pub monitor_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5),
            screenshot_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(200),
            monitor_interval: Duration::from_secs(2),
        }
    }
}

/// Helper for serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_defaults() {
        let config = PublisherConfig::default();
        assert_eq!(config.throttle, Throttle::Steps(NonZeroU32::new(5).unwrap()));
        assert_eq!(config.max_camera_frames, 50);
    }

    #[test]
    fn test_throttle_from_json() {
        let steps: Throttle = serde_json::from_str(r#"{"steps": 10}"#).unwrap();
        assert_eq!(steps, Throttle::Steps(NonZeroU32::new(10).unwrap()));

        let interval: Throttle = serde_json::from_str(r#"{"interval": 250}"#).unwrap();
        assert_eq!(interval, Throttle::Interval(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_steps_rejected() {
        assert!(serde_json::from_str::<Throttle>(r#"{"steps": 0}"#).is_err());
    }

    #[test]
    fn test_reader_config_partial_json() {
        let config: ReaderConfig = serde_json::from_str(r#"{"stale_after": 1500}"#).unwrap();
        assert_eq!(config.stale_after, Duration::from_millis(1500));
        assert_eq!(config.poll_interval, Duration::from_millis(200));
    }
}
