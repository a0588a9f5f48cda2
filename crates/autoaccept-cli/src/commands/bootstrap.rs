//! `autoaccept bootstrap`: enable the remote-debugging port in the host's
//! launch configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};

use autoaccept_cdp::{ensure_remote_debugging, BootstrapOutcome};

use crate::options::ConfigArgs;
use crate::remote;

/// Run the `autoaccept bootstrap` command.
pub fn run(args: &ConfigArgs, path: Option<PathBuf>) -> Result<()> {
    let config = args.load()?.config;
    let path = match path {
        Some(path) => path,
        None => remote::launch_config_path(&config.cdp)
            .context("no launch configuration path; pass --path or set cdp.launch_config_path")?,
    };

    let outcome = ensure_remote_debugging(&path, config.cdp.port, config.cdp.port_range)
        .with_context(|| format!("failed to bootstrap {}", path.display()))?;

    match outcome {
        BootstrapOutcome::AlreadyConfigured { port } => {
            println!("Remote debugging already enabled on port {port}.");
            println!("  Launch config: {}", path.display());
        }
        BootstrapOutcome::Written { port, path } => {
            println!("Remote debugging enabled on port {port}.");
            println!("  Launch config: {}", path.display());
            println!("  Restart the host to open the endpoint.");
        }
    }
    Ok(())
}
