//! CLI command implementations for the `autoaccept` binary.

pub mod accept;
pub mod bootstrap;
pub mod config;
pub mod run;
pub mod targets;
