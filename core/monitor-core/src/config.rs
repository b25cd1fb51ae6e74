//! Runtime configuration.
//!
//! Everything lives under the monitor home directory (`$AGENT_MONITOR_HOME`, default
//! `~/.agent-monitor`). The TOML file is optional; every field has a default so a
//! partial file only overrides what it names.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_monitor_protocol::{IntakeOptions, DEFAULT_DELEGATION_TOOL};

use crate::error::{MonitorError, Result};

pub const HOME_ENV: &str = "AGENT_MONITOR_HOME";
pub const CONFIG_ENV: &str = "AGENT_MONITOR_CONFIG";
pub const PORT_ENV: &str = "AGENT_MONITOR_PORT";

const HOME_DIR_NAME: &str = ".agent-monitor";
const CONFIG_FILE_NAME: &str = "config.toml";
const ACTIVITY_LOG_FILE_NAME: &str = "subagents.json";

pub const DEFAULT_PORT: u16 = 4280;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct MonitorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub write_queue: WriteQueueConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegistryConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Defaults to `<home>/subagents.json` when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            log_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CorrelationConfig {
    #[serde(default = "default_correlation_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_correlation_ttl_secs(),
        }
    }
}

impl CorrelationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReaperConfig {
    #[serde(default = "default_reap_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reap_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn stale_after(&self) -> chrono::Duration {
        clamped_seconds(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MatchingConfig {
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    /// Tokens strictly longer than this many characters are significant.
    #[serde(default = "default_significant_token_len")]
    pub significant_token_len: usize,
    #[serde(default = "default_proximity_window_secs")]
    pub proximity_window_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            significant_token_len: default_significant_token_len(),
            proximity_window_secs: default_proximity_window_secs(),
        }
    }
}

impl MatchingConfig {
    pub fn proximity_window(&self) -> chrono::Duration {
        clamped_seconds(self.proximity_window_secs)
    }
}

/// Out-of-range values saturate instead of wrapping negative.
fn clamped_seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct WriteQueueConfig {
    /// Pause after each applied write before the next one is dequeued.
    #[serde(default)]
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IntakeConfig {
    #[serde(default = "default_delegation_tool")]
    pub delegation_tool: String,
    /// Tools besides the delegation tool that get their own activity record.
    #[serde(default)]
    pub tracked_tools: Vec<String>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            delegation_tool: default_delegation_tool(),
            tracked_tools: Vec::new(),
        }
    }
}

impl IntakeConfig {
    pub fn options(&self) -> IntakeOptions {
        IntakeOptions {
            delegation_tool: self.delegation_tool.clone(),
        }
    }

    pub fn is_tracked(&self, tool_name: &str) -> bool {
        tool_name == self.delegation_tool || self.tracked_tools.iter().any(|t| t == tool_name)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_capacity() -> usize {
    100
}

fn default_correlation_ttl_secs() -> u64 {
    5 * 60
}

fn default_reap_interval_secs() -> u64 {
    5 * 60
}

fn default_stale_after_secs() -> u64 {
    30 * 60
}

fn default_fuzzy_threshold() -> f64 {
    0.7
}

fn default_significant_token_len() -> usize {
    3
}

fn default_proximity_window_secs() -> u64 {
    30
}

fn default_delegation_tool() -> String {
    DEFAULT_DELEGATION_TOOL.to_string()
}

impl MonitorConfig {
    /// Path of the persisted activity log, resolved against `home` when not configured.
    pub fn activity_log_path(&self, home: &Path) -> PathBuf {
        self.registry
            .log_path
            .clone()
            .unwrap_or_else(|| home.join(ACTIVITY_LOG_FILE_NAME))
    }

    /// Applies environment overrides that take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var(PORT_ENV) {
            match value.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(err) => {
                    tracing::warn!(value = %value, error = %err, "Ignoring invalid port override")
                }
            }
        }
    }
}

/// Returns the monitor home directory.
pub fn monitor_home() -> Result<PathBuf> {
    if let Ok(path) = env::var(HOME_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or(MonitorError::HomeDirNotFound)?;
    Ok(home.join(HOME_DIR_NAME))
}

/// Returns the config file path, honoring `$AGENT_MONITOR_CONFIG`.
pub fn config_path(home: &Path) -> PathBuf {
    match env::var(CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => home.join(CONFIG_FILE_NAME),
    }
}

/// Loads the config file, returning defaults if it doesn't exist.
pub fn load_config(path: &Path) -> Result<MonitorConfig> {
    if !path.exists() {
        return Ok(MonitorConfig::default());
    }

    let content = fs_err::read_to_string(path)
        .map_err(|err| MonitorError::io(format!("Failed to read config {}", path.display()), err))?;
    toml::from_str::<MonitorConfig>(&content).map_err(|err| MonitorError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_windows_saturate() {
        let reaper = ReaperConfig {
            stale_after_secs: u64::MAX,
            ..ReaperConfig::default()
        };
        let matching = MatchingConfig {
            proximity_window_secs: i64::MAX as u64,
            ..MatchingConfig::default()
        };

        assert_eq!(reaper.stale_after(), chrono::Duration::MAX);
        assert_eq!(matching.proximity_window(), chrono::Duration::MAX);
        assert_eq!(
            MatchingConfig::default().proximity_window(),
            chrono::Duration::seconds(30)
        );
    }

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(&path).expect("load config");
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.registry.capacity, 100);
        assert_eq!(config.correlation.ttl_secs, 300);
        assert_eq!(config.reaper.stale_after_secs, 1800);
        assert_eq!(config.intake.delegation_tool, "Task");
    }

    #[test]
    fn load_config_parses_partial_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[server]
port = 5123

[registry]
capacity = 20

[reaper]
stale_after_secs = 60

[intake]
tracked_tools = ["Bash"]
"#,
        )
        .expect("write config");

        let config = load_config(&path).expect("load config");
        assert_eq!(config.server.port, 5123);
        assert_eq!(config.registry.capacity, 20);
        assert_eq!(config.reaper.stale_after_secs, 60);
        assert_eq!(config.reaper.interval_secs, 300);
        assert!(config.intake.is_tracked("Bash"));
        assert!(config.intake.is_tracked("Task"));
        assert!(!config.intake.is_tracked("Read"));
        assert!((config.matching.fuzzy_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn load_config_rejects_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[server\nport = ").expect("write config");
        assert!(matches!(
            load_config(&path),
            Err(MonitorError::ConfigMalformed { .. })
        ));
    }

    #[test]
    fn activity_log_path_defaults_under_home() {
        let config = MonitorConfig::default();
        let home = Path::new("/tmp/monitor-home");
        assert_eq!(
            config.activity_log_path(home),
            home.join("subagents.json")
        );
    }
}
