//! Global configuration flags shared by every subcommand.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use autoaccept_types::{ConfigLoader, EffectiveConfig};

/// Flags that override the layered configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Workspace config file (default: ./.autoaccept/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Remote debugging port to prefer
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Disable the remote-debugging path for this invocation
    #[arg(long, global = true)]
    pub no_cdp: bool,

    /// Override any key, e.g. `--set cdp.click_cooldown_ms=3000`
    #[arg(long = "set", global = true, value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}

impl ConfigArgs {
    /// A loader with these flags applied as the highest-priority layer.
    pub fn loader(&self) -> Result<ConfigLoader> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader.with_workspace_path(path.clone());
        }
        if let Some(port) = self.port {
            loader = loader.with_override("--port", "cdp.port", &port.to_string());
        }
        if self.no_cdp {
            loader = loader.with_override("--no-cdp", "cdp.enabled", "false");
        }
        for assignment in &self.set {
            let Some((key, value)) = assignment.split_once('=') else {
                bail!("--set expects KEY=VALUE, got {assignment:?}");
            };
            let key = key.trim();
            if key.is_empty() {
                bail!("--set has an empty key: {assignment:?}");
            }
            loader = loader.with_override("--set", key, value.trim());
        }
        Ok(loader)
    }

    /// Load the effective configuration.
    pub fn load(&self) -> Result<EffectiveConfig> {
        self.loader()?
            .load()
            .context("failed to load autoaccept configuration")
    }
}
