//! Low-frequency heartbeat passes.
//!
//! The heartbeat runs independently of the scheduler state so that prompts
//! raised without any host activity are still picked up. Which states it
//! fires in is configurable, see [`HeartbeatPolicy`].

use std::time::Duration;

use autoaccept_types::{AcceptConfig, HeartbeatPolicy, SchedulerState};

/// Heartbeat settings captured when the timer is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    interval: Option<Duration>,
    policy: HeartbeatPolicy,
}

/// What a heartbeat tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    RunPass,
    /// The scheduler is already polling in this state.
    Skip,
}

impl Heartbeat {
    pub fn from_config(config: &AcceptConfig) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            policy: config.heartbeat_policy,
        }
    }

    /// Timer period, or `None` when the heartbeat is disabled.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn policy(&self) -> HeartbeatPolicy {
        self.policy
    }

    pub fn on_tick(&self, state: SchedulerState) -> HeartbeatAction {
        if self.policy.fires_in(state) {
            HeartbeatAction::RunPass
        } else {
            HeartbeatAction::Skip
        }
    }
}
