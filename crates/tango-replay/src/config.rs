//! Replay configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Durations are written as milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ReplayError;
use crate::retry::RetryPolicy;

/// Selector of the step-title elements in the workflow editor.
pub const DEFAULT_STEP_SELECTOR: &str = "testid:workflowEdit.navigation.stepTitle";

/// Serde adapter storing a `Duration` as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// How the browser session is launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Pause inserted before every input action, so a watching human can follow.
    #[serde(with = "duration_ms")]
    pub slow_mo: Duration,
    pub executable: Option<PathBuf>,
    pub args: Vec<String>,
    #[serde(with = "duration_ms")]
    pub navigation_timeout: Duration,
    /// The network counts as settled once no new request starts for this long.
    #[serde(with = "duration_ms")]
    pub network_quiet: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: false,
            slow_mo: Duration::from_millis(200),
            executable: None,
            args: Vec::new(),
            navigation_timeout: Duration::from_secs(30),
            network_quiet: Duration::from_millis(500),
        }
    }
}

/// Settings for following the workflow into a new tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    pub enabled: bool,
    /// Visible text of the link that opens the workflow target, compared case-insensitively.
    pub link_text: String,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    #[serde(with = "duration_ms")]
    pub ready_timeout: Duration,
    /// Also follow tabs opened by clicks made while replaying steps.
    pub follow_new_tabs: bool,
    #[serde(with = "duration_ms")]
    pub new_tab_grace: Duration,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            link_text: "open".to_string(),
            timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(30),
            follow_new_tabs: true,
            new_tab_grace: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub launch: LaunchOptions,
    pub step_selector: String,
    #[serde(with = "duration_ms")]
    pub extraction_timeout: Duration,
    pub retry: RetryPolicy,
    pub placeholder_case_sensitive: bool,
    #[serde(with = "duration_ms")]
    pub click_settle: Duration,
    #[serde(with = "duration_ms")]
    pub type_settle: Duration,
    #[serde(with = "duration_ms")]
    pub step_delay: Duration,
    /// Pause after the last step before the browser is closed.
    #[serde(with = "duration_ms")]
    pub final_pause: Duration,
    pub switch: SwitchConfig,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            launch: LaunchOptions::default(),
            step_selector: DEFAULT_STEP_SELECTOR.to_string(),
            extraction_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            placeholder_case_sensitive: true,
            click_settle: Duration::from_millis(200),
            type_settle: Duration::from_millis(200),
            step_delay: Duration::from_millis(300),
            final_pause: Duration::from_secs(2),
            switch: SwitchConfig::default(),
        }
    }
}

impl ReplayConfig {
    /// Load a JSON config file; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReplayError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&content)
            .map_err(|e| ReplayError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_json(content: &str) -> Result<Self, ReplayError> {
        serde_json::from_str(content).map_err(|e| ReplayError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_recorded_timings() {
        let config = ReplayConfig::default();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay, Duration::from_millis(300));
        assert_eq!(config.extraction_timeout, Duration::from_secs(30));
        assert!(config.placeholder_case_sensitive);
        assert_eq!(config.switch.link_text, "open");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ReplayConfig::from_json(
            r#"{ "step_delay": 0, "launch": { "headless": true }, "retry": { "max_attempts": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.step_delay, Duration::ZERO);
        assert!(config.launch.headless);
        assert_eq!(config.launch.slow_mo, Duration::from_millis(200));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.delay, Duration::from_millis(300));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = ReplayConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ReplayError::Config(_)));
    }
}
