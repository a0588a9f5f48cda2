//! Polling scheduler states and the status indicator derived from them.

use serde::{Deserialize, Serialize};

/// The activity level of the polling scheduler.
///
/// The scheduler starts in `Idle`, escalates to `Fast` on any trigger, decays
/// to `Slow` once the fast window expires, and returns to `Idle` after the
/// cooldown window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No repeating pass timer; only the heartbeat produces passes.
    Idle,
    /// Short-interval polling while the host is actively producing prompts.
    Fast,
    /// Long-interval polling after activity has died down.
    Slow,
}

impl SchedulerState {
    /// The status indicator shown while the agent is enabled in this state.
    pub fn indicator(self) -> StatusIndicator {
        match self {
            SchedulerState::Idle => StatusIndicator::Idle,
            SchedulerState::Fast => StatusIndicator::Active,
            SchedulerState::Slow => StatusIndicator::Watching,
        }
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "IDLE"),
            SchedulerState::Fast => write!(f, "FAST"),
            SchedulerState::Slow => write!(f, "SLOW"),
        }
    }
}

/// What a status bar item shows for the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusIndicator {
    Active,
    Watching,
    Idle,
    Disabled,
}

impl StatusIndicator {
    /// Short label suitable for a status bar.
    pub fn label(self) -> &'static str {
        match self {
            StatusIndicator::Active => "active",
            StatusIndicator::Watching => "watching",
            StatusIndicator::Idle => "idle",
            StatusIndicator::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
