//! Suspend/resume detection.
//!
//! Timers do not advance while the machine sleeps, so after a resume the
//! scheduler may sit in a long SLOW or IDLE period while prompts pile up. The
//! monitor samples the wall clock at a fixed cadence; a gap of more than
//! twice the cadence means the process was suspended and FAST is forced.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Result of one liveness sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessCheck {
    Steady,
    /// The gap since the previous sample exceeded the threshold.
    Resumed { gap: chrono::Duration },
}

/// Tracks the last wall-clock sample.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    threshold: chrono::Duration,
    last_sample: Option<DateTime<Utc>>,
    recoveries: u64,
}

impl LivenessMonitor {
    pub fn new(cadence: Duration) -> Self {
        let cadence = chrono::Duration::from_std(cadence).unwrap_or(chrono::Duration::MAX);
        Self {
            threshold: cadence.checked_mul(2).unwrap_or(chrono::Duration::MAX),
            last_sample: None,
            recoveries: 0,
        }
    }

    /// Start a fresh sampling run at `now`.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.last_sample = Some(now);
    }

    /// Record a sample and report whether a suspend happened since the
    /// previous one.
    pub fn sample(&mut self, now: DateTime<Utc>) -> LivenessCheck {
        let previous = self.last_sample.replace(now);
        match previous {
            Some(prev) if now - prev > self.threshold => {
                self.recoveries += 1;
                LivenessCheck::Resumed { gap: now - prev }
            }
            _ => LivenessCheck::Steady,
        }
    }

    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }
}
