//! One acceptance pass: the capability actions, then a sweep of every pooled
//! target.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use autoaccept_cdp::{ButtonPrefixRecognizer, SweepOptions, SweepReport, TargetPool};
use autoaccept_types::{AcceptConfig, SchedulerState};

use crate::capability::{run_capabilities, CapabilityInvoker, CapabilityReport};

/// Why a pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "state")]
pub enum PassReason {
    /// The scheduler's repeating timer in FAST or SLOW.
    Timer(SchedulerState),
    Heartbeat,
    /// Explicit request from the control surface.
    Forced,
}

impl std::fmt::Display for PassReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassReason::Timer(state) => write!(f, "timer:{state}"),
            PassReason::Heartbeat => f.write_str("heartbeat"),
            PassReason::Forced => f.write_str("forced"),
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub reason: PassReason,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub capabilities: CapabilityReport,
    /// `None` when the remote path is disabled or not wired.
    pub sweep: Option<SweepReport>,
}

impl PassReport {
    pub fn activated(&self) -> usize {
        self.sweep.map_or(0, |s| s.activated)
    }

    pub fn summary(&self) -> String {
        let mut line = format!(
            "pass ({}) actions {}/{} applied",
            self.reason, self.capabilities.applied, self.capabilities.attempted
        );
        if let Some(sweep) = &self.sweep {
            line.push_str(&format!(
                ", {} control(s) activated on {} target(s)",
                sweep.activated, sweep.targets
            ));
            if sweep.fallbacks > 0 {
                line.push_str(&format!(", {} key fallback(s)", sweep.fallbacks));
            }
            if sweep.errors > 0 {
                line.push_str(&format!(", {} target error(s)", sweep.errors));
            }
        }
        line
    }
}

/// The collaborators a pass needs. Cheap to clone into a spawned task.
#[derive(Clone)]
pub struct PassContext {
    pub invoker: Arc<dyn CapabilityInvoker>,
    pub pool: Option<Arc<TargetPool>>,
}

impl PassContext {
    pub fn new(invoker: Arc<dyn CapabilityInvoker>) -> Self {
        Self {
            invoker,
            pool: None,
        }
    }

    #[must_use]
    pub fn with_pool(mut self, pool: Arc<TargetPool>) -> Self {
        self.pool = Some(pool);
        self
    }
}

/// Run one acceptance pass with the configuration as it is right now.
pub async fn run_pass(ctx: &PassContext, config: &AcceptConfig, reason: PassReason) -> PassReport {
    let started_at = Utc::now();
    let started = Instant::now();

    let capabilities = run_capabilities(ctx.invoker.as_ref(), config).await;

    let sweep = match &ctx.pool {
        Some(pool) if config.cdp.enabled => {
            let recognizer = ButtonPrefixRecognizer::from_config(&config.cdp);
            let options = SweepOptions::from_config(&config.cdp);
            Some(pool.sweep(&recognizer, &options).await)
        }
        _ => None,
    };

    let report = PassReport {
        reason,
        started_at,
        elapsed: started.elapsed(),
        capabilities,
        sweep,
    };
    debug!(summary = %report.summary(), "acceptance pass finished");
    report
}
