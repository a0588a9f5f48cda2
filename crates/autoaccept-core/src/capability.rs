//! The capability path: issuing the host's accept actions.

use async_trait::async_trait;
use tracing::{debug, trace};

use autoaccept_types::{AcceptConfig, ActionOutcome, CapabilityAction};

/// Executes one accept action against the host.
///
/// Implementations report failures through [`ActionOutcome::Failed`]; they
/// should not panic, but a panic is contained at the pass boundary.
#[async_trait]
pub trait CapabilityInvoker: Send + Sync {
    async fn invoke(&self, action: CapabilityAction) -> ActionOutcome;
}

/// Invoker for setups without a host bridge. Every action is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullInvoker;

#[async_trait]
impl CapabilityInvoker for NullInvoker {
    async fn invoke(&self, _action: CapabilityAction) -> ActionOutcome {
        ActionOutcome::NotApplicable
    }
}

/// Totals from one run over the action set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityReport {
    pub attempted: usize,
    pub applied: usize,
    pub not_applicable: usize,
    pub failed: usize,
}

/// Issue every enabled action once, in order.
///
/// Never stops early: a failed or inapplicable action moves on to the next.
pub async fn run_capabilities(
    invoker: &dyn CapabilityInvoker,
    config: &AcceptConfig,
) -> CapabilityReport {
    let mut report = CapabilityReport::default();
    for action in CapabilityAction::ALL {
        if !action.is_enabled(config) {
            continue;
        }
        report.attempted += 1;
        match invoker.invoke(action).await {
            ActionOutcome::Applied => {
                report.applied += 1;
                debug!(action = %action, "capability action applied");
            }
            ActionOutcome::NotApplicable => report.not_applicable += 1,
            ActionOutcome::Failed(reason) => {
                report.failed += 1;
                trace!(action = %action, reason = %reason, "capability action failed");
            }
        }
    }
    report
}
