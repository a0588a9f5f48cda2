//! Observable agent status, published on a `watch` channel.

use chrono::{DateTime, Utc};
use serde::Serialize;

use autoaccept_types::{SchedulerState, StatusIndicator};

/// Whether the remote-debugging path is currently usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RemoteStatus {
    /// Turned off in configuration or not wired.
    Off,
    /// Enabled, but the endpoint has not answered (yet).
    NotActive,
    /// The last discovery succeeded.
    Active { targets: usize },
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteStatus::Off => f.write_str("off"),
            RemoteStatus::NotActive => f.write_str("not active"),
            RemoteStatus::Active { targets } => write!(f, "active ({targets} target(s))"),
        }
    }
}

/// Counters accumulated since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// Passes that ran to completion.
    pub passes: u64,
    /// Pass requests dropped because another pass was in flight.
    pub skipped: u64,
    /// Passes that panicked.
    pub failed: u64,
    pub actions_applied: u64,
    pub controls_activated: u64,
    pub key_fallbacks: u64,
    /// Forced FAST transitions after a detected suspend.
    pub recoveries: u64,
}

/// A snapshot of the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub enabled: bool,
    pub state: SchedulerState,
    pub indicator: StatusIndicator,
    pub remote: RemoteStatus,
    pub stats: PassStats,
    pub last_pass_at: Option<DateTime<Utc>>,
}

impl AgentStatus {
    pub fn initial(remote: RemoteStatus) -> Self {
        Self {
            enabled: false,
            state: SchedulerState::Idle,
            indicator: StatusIndicator::Disabled,
            remote,
            stats: PassStats::default(),
            last_pass_at: None,
        }
    }

    /// One-line rendering for the status command.
    pub fn summary(&self) -> String {
        format!(
            "{} [{}] remote: {}, passes: {}, skipped: {}, actions: {}, controls: {}",
            self.indicator,
            self.state,
            self.remote,
            self.stats.passes,
            self.stats.skipped,
            self.stats.actions_applied,
            self.stats.controls_activated,
        )
    }
}
