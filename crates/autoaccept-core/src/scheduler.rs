//! The IDLE / FAST / SLOW polling state machine.
//!
//! [`Scheduler`] is pure: it decides the next state and the timers that
//! state needs, and the runtime arms them. Every transition carries a full
//! [`TimerPlan`], so the runtime replaces both scheduler timers on each state
//! entry and never ends up with two repeating timers alive at once.
//!
//! ```text
//!            trigger                expiry (fast_duration)
//!   IDLE ─────────────▶ FAST ─────────────────────────▶ SLOW
//!    ▲                   ▲ │ trigger                      │
//!    │                   └─┘                              │ trigger
//!    │                   ▲────────────────────────────────┘
//!    └──────────────── expiry (cooldown_duration) ────────┘
//! ```

use std::time::Duration;

use autoaccept_types::{AcceptConfig, SchedulerState};

/// Timers a state needs, read from configuration at entry time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPlan {
    /// Period of the repeating pass timer, if the state polls.
    pub pass_interval: Option<Duration>,
    /// Whether the first pass runs immediately on entry.
    pub immediate_first_pass: bool,
    /// Delay until the state decays, if it does.
    pub expiry: Option<Duration>,
}

impl TimerPlan {
    pub const NONE: TimerPlan = TimerPlan {
        pass_interval: None,
        immediate_first_pass: false,
        expiry: None,
    };

    /// The plan for entering `state` under `config`.
    pub fn for_state(state: SchedulerState, config: &AcceptConfig) -> Self {
        match state {
            SchedulerState::Idle => TimerPlan::NONE,
            SchedulerState::Fast => TimerPlan {
                pass_interval: Some(config.fast_interval()),
                immediate_first_pass: true,
                expiry: Some(config.fast_duration()),
            },
            SchedulerState::Slow => TimerPlan {
                pass_interval: Some(config.slow_interval()),
                immediate_first_pass: false,
                expiry: Some(config.cooldown_duration()),
            },
        }
    }
}

/// A state entry. `from == to` for a re-entry of FAST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SchedulerState,
    pub to: SchedulerState,
    pub plan: TimerPlan,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// The polling state machine.
#[derive(Debug, Clone)]
pub struct Scheduler {
    state: SchedulerState,
    entries: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
            entries: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Number of state entries so far, re-entries included.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Any recognized activity: enter (or re-enter) FAST.
    pub fn on_trigger(&mut self, config: &AcceptConfig) -> Transition {
        self.enter(SchedulerState::Fast, config)
    }

    /// Whether a debounced text change may escalate right now.
    pub fn accepts_text_change(&self) -> bool {
        self.state == SchedulerState::Idle
    }

    /// The current state's expiry timer fired.
    ///
    /// Returns `None` in IDLE, which has no expiry.
    pub fn on_expiry(&mut self, config: &AcceptConfig) -> Option<Transition> {
        let next = match self.state {
            SchedulerState::Fast => SchedulerState::Slow,
            SchedulerState::Slow => SchedulerState::Idle,
            SchedulerState::Idle => return None,
        };
        Some(self.enter(next, config))
    }

    /// Back to IDLE without timers, used on disable.
    pub fn reset(&mut self) -> Transition {
        let from = self.state;
        self.state = SchedulerState::Idle;
        Transition {
            from,
            to: SchedulerState::Idle,
            plan: TimerPlan::NONE,
        }
    }

    fn enter(&mut self, to: SchedulerState, config: &AcceptConfig) -> Transition {
        let from = self.state;
        self.state = to;
        self.entries += 1;
        Transition {
            from,
            to,
            plan: TimerPlan::for_state(to, config),
        }
    }
}
