//! Out-of-band window automation.
//!
//! Used by forced reload/reset when the controller has stopped draining its
//! mailbox. This path bypasses the protocol entirely and is best-effort.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Simulator application targeted by [`default_automation`].
pub const DEFAULT_APPLICATION: &str = "Webots";

/// Upper bound on a single automation run.
const AUTOMATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from window automation
#[derive(Debug, Error)]
pub enum AutomationError {
    /// No automation backend on this platform
    #[error("window automation is not supported on {platform}")]
    Unsupported {
        /// Target OS name
        platform: &'static str,
    },
    /// The automation ran and reported failure
    #[error("window automation failed: {0}")]
    Failed(String),
    /// The automation did not finish in time
    #[error("window automation timed out")]
    Timeout,
}

/// What to force on the simulator window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceAction {
    /// Reload the world file
    Reload,
    /// Reset the simulation
    Reset,
}

impl ForceAction {
    /// Keyboard shortcut key, pressed with control+shift.
    fn key(self) -> char {
        match self {
            ForceAction::Reload => 'r',
            ForceAction::Reset => 't',
        }
    }

    /// Time the simulator needs before it is usable again.
    fn settle_time(self) -> Duration {
        match self {
            ForceAction::Reload => Duration::from_secs(3),
            ForceAction::Reset => Duration::from_secs(2),
        }
    }
}

impl fmt::Display for ForceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ForceAction::Reload => "reload",
            ForceAction::Reset => "reset",
        })
    }
}

/// Capability to force the simulator window from outside the protocol.
#[async_trait]
pub trait WindowAutomation: Send + Sync + fmt::Debug {
    /// Trigger `action` and wait until the simulator has had time to settle.
    async fn force(&self, action: ForceAction) -> Result<(), AutomationError>;
}

/// Sends the simulator's menu shortcuts through `osascript` (macOS).
#[derive(Debug, Clone)]
pub struct AppleScriptAutomation {
    application: String,
    settle: bool,
}

impl AppleScriptAutomation {
    /// Target the application named `application`.
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            settle: true,
        }
    }

    /// Return as soon as the keystroke was sent, without the settle delay.
    pub fn without_settle(mut self) -> Self {
        self.settle = false;
        self
    }

    fn script(&self, action: ForceAction) -> String {
        let app = self.application.replace(['"', '\\'], "");
        format!(
            "tell application \"{app}\"\n\
             activate\n\
             end tell\n\
             delay 0.3\n\
             tell application \"System Events\"\n\
             keystroke \"{key}\" using {{control down, shift down}}\n\
             end tell",
            key = action.key()
        )
    }
}

#[async_trait]
impl WindowAutomation for AppleScriptAutomation {
    async fn force(&self, action: ForceAction) -> Result<(), AutomationError> {
        let script = self.script(action);
        tracing::info!(%action, application = %self.application, "sending window shortcut");

        let run = tokio::process::Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(AUTOMATION_TIMEOUT, run)
            .await
            .map_err(|_| AutomationError::Timeout)?
            .map_err(|e| AutomationError::Failed(format!("could not run osascript: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AutomationError::Failed(format!(
                "osascript error: {}",
                stderr.trim()
            )));
        }

        if self.settle {
            tokio::time::sleep(action.settle_time()).await;
        }
        Ok(())
    }
}

/// Automation for platforms without a backend. Always fails cleanly.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedAutomation {
    platform: &'static str,
}

impl UnsupportedAutomation {
    /// Report the current target OS as unsupported.
    pub fn current() -> Self {
        Self {
            platform: std::env::consts::OS,
        }
    }
}

#[async_trait]
impl WindowAutomation for UnsupportedAutomation {
    async fn force(&self, _action: ForceAction) -> Result<(), AutomationError> {
        Err(AutomationError::Unsupported {
            platform: self.platform,
        })
    }
}

/// Backend for the platform this binary was built for.
pub fn default_automation() -> Arc<dyn WindowAutomation> {
    if cfg!(target_os = "macos") {
        Arc::new(AppleScriptAutomation::new(DEFAULT_APPLICATION))
    } else {
        Arc::new(UnsupportedAutomation::current())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_reports_platform() {
        let automation = UnsupportedAutomation { platform: "plan9" };
        let err = automation.force(ForceAction::Reload).await.unwrap_err();
        assert!(matches!(err, AutomationError::Unsupported { platform: "plan9" }));
        assert_eq!(err.to_string(), "window automation is not supported on plan9");
    }

    #[test]
    fn test_script_uses_shortcut() {
        let script = AppleScriptAutomation::new("Webots").script(ForceAction::Reset);
        assert!(script.contains("tell application \"Webots\""));
        assert!(script.contains("keystroke \"t\" using {control down, shift down}"));
    }

    #[test]
    fn test_script_strips_quotes_from_app_name() {
        let script = AppleScriptAutomation::new("Evil\" to quit").script(ForceAction::Reload);
        assert!(script.contains("tell application \"Evil to quit\""));
    }

    #[test]
    fn test_without_settle() {
        let automation = AppleScriptAutomation::new(DEFAULT_APPLICATION);
        assert!(automation.settle);
        let automation = automation.without_settle();
        assert!(!automation.settle);
        assert_eq!(automation.application, "Webots");
    }

    #[cfg(not(target_os = "macos"))]
    #[tokio::test]
    async fn test_missing_osascript_is_a_failure() {
        let automation = AppleScriptAutomation::new(DEFAULT_APPLICATION).without_settle();
        let err = automation.force(ForceAction::Reload).await.unwrap_err();
        assert!(matches!(err, AutomationError::Failed(_)));
    }

    #[cfg(not(target_os = "macos"))]
    #[tokio::test]
    async fn test_default_is_unsupported_off_macos() {
        let err = default_automation().force(ForceAction::Reset).await.unwrap_err();
        assert!(matches!(err, AutomationError::Unsupported { .. }));
    }
}
