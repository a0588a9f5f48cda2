//! Activity-adaptive acceptance agent.
//!
//! The agent repeatedly runs *acceptance passes*: every enabled host accept
//! action through a [`CapabilityInvoker`], then one recognition round over
//! every pooled remote-debugging target. How often passes run depends on
//! host activity:
//!
//! - **IDLE**: no polling; only the heartbeat runs passes.
//! - **FAST**: short-interval polling right after activity.
//! - **SLOW**: long-interval polling once the fast window expires.
//!
//! A liveness monitor forces FAST after a suspend/resume gap, and a
//! re-entrancy guard keeps passes from overlapping.
//!
//! # Usage
//!
//! ```ignore
//! let settings = Arc::new(SharedSettings::new(config));
//! let (runtime, handle) = AgentRuntime::builder(settings, invoker)
//!     .with_remote(remote)
//!     .build();
//! tokio::spawn(runtime.run());
//!
//! handle.trigger(Trigger::TerminalOpened).await?;
//! ```

pub mod capability;
pub mod diagnostics;
pub mod error;
pub mod guard;
pub mod heartbeat;
pub mod liveness;
pub mod pass;
pub mod runtime;
pub mod scheduler;
pub mod settings;
pub mod status;

pub use capability::{run_capabilities, CapabilityInvoker, CapabilityReport, NullInvoker};
pub use diagnostics::DiagnosticLog;
pub use error::RuntimeError;
pub use guard::{PassGuard, PassToken};
pub use liveness::{LivenessMonitor, SystemClock, WallClock};
pub use pass::{run_pass, PassContext, PassReason, PassReport};
pub use runtime::{
    AgentCommand, AgentEvent, AgentHandle, AgentRuntime, AgentRuntimeBuilder, ForceAcceptOutcome,
    RemoteLink,
};
pub use scheduler::{Scheduler, TimerPlan, Transition};
pub use settings::{SettingsSource, SharedSettings};
pub use status::{AgentStatus, PassStats, RemoteStatus};
