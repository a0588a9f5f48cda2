//! Configuration types for the autoaccept agent.
//!
//! [`AcceptConfig`] is the top-level configuration loaded from
//! `config.toml`, controlling the polling scheduler windows, the heartbeat,
//! the capability action toggles, the remote-debugging (CDP) path and the
//! host command bridge. Every field has a default, so an empty file is a
//! valid configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::SchedulerState;
use crate::AcceptError;

/// Name of the configuration file inside a config directory.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Directory name used under `$HOME` and the workspace root.
pub const CONFIG_DIR: &str = ".autoaccept";

/// In which scheduler states the heartbeat runs an acceptance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeartbeatPolicy {
    /// Heartbeat passes only while the scheduler is idle.
    #[default]
    Idle,
    /// Heartbeat passes while idle and while slow-polling.
    IdleAndSlow,
}

impl HeartbeatPolicy {
    /// Whether a heartbeat tick should run a pass in `state`.
    pub fn fires_in(self, state: SchedulerState) -> bool {
        match (self, state) {
            (_, SchedulerState::Idle) => true,
            (HeartbeatPolicy::IdleAndSlow, SchedulerState::Slow) => true,
            _ => false,
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcceptConfig {
    /// Master switch. When false, no timers run and no passes happen.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pass interval while in the fast state.
    #[serde(default = "default_fast_interval_ms")]
    pub fast_interval_ms: u64,
    /// Pass interval while in the slow state.
    #[serde(default = "default_slow_interval_ms")]
    pub slow_interval_ms: u64,
    /// Heartbeat interval; 0 disables the heartbeat.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Which states the heartbeat fires in.
    #[serde(default)]
    pub heartbeat_policy: HeartbeatPolicy,
    /// How long the fast state lasts without a new trigger.
    #[serde(default = "default_fast_duration_ms")]
    pub fast_duration_ms: u64,
    /// How long the slow state lasts before going idle.
    #[serde(default = "default_cooldown_duration_ms")]
    pub cooldown_duration_ms: u64,
    /// Quiet period before a text change escalates an idle scheduler.
    #[serde(default = "default_text_change_debounce_ms")]
    pub text_change_debounce_ms: u64,
    /// Wall-clock sampling cadence of the liveness monitor.
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,
    /// Delay before the first discovery cycle after enabling.
    #[serde(default)]
    pub activation_delay_ms: u64,
    #[serde(default = "default_true")]
    pub enable_terminal_accept: bool,
    #[serde(default = "default_true")]
    pub enable_agent_step_accept: bool,
    #[serde(default = "default_true")]
    pub enable_editor_accept: bool,
    /// Remote-debugging (Chrome DevTools Protocol) settings.
    #[serde(default)]
    pub cdp: CdpConfig,
    /// How capability actions reach the host.
    #[serde(default)]
    pub host: HostConfig,
}

impl Default for AcceptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fast_interval_ms: default_fast_interval_ms(),
            slow_interval_ms: default_slow_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_policy: HeartbeatPolicy::default(),
            fast_duration_ms: default_fast_duration_ms(),
            cooldown_duration_ms: default_cooldown_duration_ms(),
            text_change_debounce_ms: default_text_change_debounce_ms(),
            liveness_interval_ms: default_liveness_interval_ms(),
            activation_delay_ms: 0,
            enable_terminal_accept: true,
            enable_agent_step_accept: true,
            enable_editor_accept: true,
            cdp: CdpConfig::default(),
            host: HostConfig::default(),
        }
    }
}

impl AcceptConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, AcceptError> {
        toml::from_str(content).map_err(|e| AcceptError::ConfigError(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, AcceptError> {
        toml::to_string_pretty(self).map_err(|e| AcceptError::ConfigError(e.to_string()))
    }

    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_millis(self.slow_interval_ms)
    }

    pub fn fast_duration(&self) -> Duration {
        Duration::from_millis(self.fast_duration_ms)
    }

    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_millis(self.cooldown_duration_ms)
    }

    pub fn text_change_debounce(&self) -> Duration {
        Duration::from_millis(self.text_change_debounce_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn activation_delay(&self) -> Duration {
        Duration::from_millis(self.activation_delay_ms)
    }

    /// Heartbeat interval, or `None` when the heartbeat is disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Check the configuration for values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), AcceptError> {
        let nonzero = [
            ("fast_interval_ms", self.fast_interval_ms),
            ("slow_interval_ms", self.slow_interval_ms),
            ("fast_duration_ms", self.fast_duration_ms),
            ("cooldown_duration_ms", self.cooldown_duration_ms),
            ("liveness_interval_ms", self.liveness_interval_ms),
            ("cdp.discovery_interval_ms", self.cdp.discovery_interval_ms),
            ("cdp.request_timeout_ms", self.cdp.request_timeout_ms),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(AcceptError::ConfigError(format!(
                    "{field} must be greater than zero"
                )));
            }
        }

        if self.cdp.port == 0 {
            return Err(AcceptError::ConfigError(
                "cdp.port must be in range 1-65535".into(),
            ));
        }
        if u32::from(self.cdp.port) + u32::from(self.cdp.port_range) > u32::from(u16::MAX) {
            return Err(AcceptError::ConfigError(format!(
                "cdp.port {} + cdp.port_range {} exceeds 65535",
                self.cdp.port, self.cdp.port_range
            )));
        }
        if self.cdp.accept_phrases.iter().any(|p| p.trim().is_empty()) {
            return Err(AcceptError::ConfigError(
                "cdp.accept_phrases must not contain empty phrases".into(),
            ));
        }
        if let Some(program) = &self.host.program {
            if program.trim().is_empty() {
                return Err(AcceptError::ConfigError(
                    "host.program must not be empty when set".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Remote-debugging path configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CdpConfig {
    /// Gates the whole remote-debugging path.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Host the debugging endpoint listens on.
    #[serde(default = "default_cdp_host")]
    pub host: String,
    /// Preferred debugging port.
    #[serde(default = "default_cdp_port")]
    pub port: u16,
    /// How many ports after `port` the bootstrap may fall back to.
    #[serde(default = "default_cdp_port_range")]
    pub port_range: u16,
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Minimum time between two activations of the same control.
    #[serde(default = "default_click_cooldown_ms")]
    pub click_cooldown_ms: u64,
    /// Label prefixes (case-insensitive) that mark a control as an accept.
    #[serde(default = "default_accept_phrases")]
    pub accept_phrases: Vec<String>,
    /// CSS selector of a container that accepts a keyboard confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_fallback_selector: Option<String>,
    #[serde(default = "default_key_fallback_key")]
    pub key_fallback_key: String,
    /// Host launch-configuration file (`argv.json`). Platform default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_config_path: Option<PathBuf>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_cdp_host(),
            port: default_cdp_port(),
            port_range: default_cdp_port_range(),
            discovery_interval_ms: default_discovery_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            click_cooldown_ms: default_click_cooldown_ms(),
            accept_phrases: default_accept_phrases(),
            key_fallback_selector: None,
            key_fallback_key: default_key_fallback_key(),
            launch_config_path: None,
        }
    }
}

impl CdpConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn click_cooldown(&self) -> Duration {
        Duration::from_millis(self.click_cooldown_ms)
    }

    /// Base URL of the debugging endpoint on `port`.
    pub fn endpoint(&self, port: u16) -> String {
        format!("http://{}:{port}", self.host)
    }
}

/// How capability actions are delivered to the host.
///
/// When `program` is set, each action spawns `program args...` with every
/// `{command}` placeholder in `args` replaced by the action's command id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default = "default_host_args")]
    pub args: Vec<String>,
    /// Upper bound on a single host command invocation.
    #[serde(default = "default_host_timeout_ms")]
    pub timeout_ms: u64,
    /// Per-action command id overrides, keyed by action name.
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: default_host_args(),
            timeout_ms: default_host_timeout_ms(),
            commands: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_fast_interval_ms() -> u64 {
    200
}

fn default_slow_interval_ms() -> u64 {
    2_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_fast_duration_ms() -> u64 {
    10_000
}

fn default_cooldown_duration_ms() -> u64 {
    30_000
}

fn default_text_change_debounce_ms() -> u64 {
    2_000
}

fn default_liveness_interval_ms() -> u64 {
    5_000
}

fn default_cdp_host() -> String {
    "127.0.0.1".to_string()
}

fn default_cdp_port() -> u16 {
    9222
}

fn default_cdp_port_range() -> u16 {
    5
}

fn default_discovery_interval_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_click_cooldown_ms() -> u64 {
    5_000
}

fn default_accept_phrases() -> Vec<String> {
    [
        "accept",
        "accept all",
        "run",
        "run command",
        "allow",
        "allow once",
        "always allow",
        "approve",
        "continue",
        "keep",
        "yes",
        "retry",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_key_fallback_key() -> String {
    "Enter".to_string()
}

fn default_host_args() -> Vec<String> {
    vec!["--command".to_string(), "{command}".to_string()]
}

fn default_host_timeout_ms() -> u64 {
    2_000
}
