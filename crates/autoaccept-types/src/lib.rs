//! Core types shared across all autoaccept crates.
//!
//! Defines the agent configuration, scheduler states, host trigger events,
//! capability actions and the error type used by the CDP layer, the
//! runtime and the CLI.

pub mod action;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod state;
pub mod trigger;

pub use action::{ActionOutcome, CapabilityAction};
pub use config::{AcceptConfig, CdpConfig, HeartbeatPolicy, HostConfig, CONFIG_DIR, CONFIG_FILENAME};
pub use config_loader::{ConfigLoader, ConfigSource, EffectiveConfig};
pub use error::AcceptError;
pub use state::{SchedulerState, StatusIndicator};
pub use trigger::Trigger;
