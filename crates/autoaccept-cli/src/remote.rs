//! Wiring for the remote-debugging path.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use autoaccept_cdp::bootstrap::{configured_port, default_launch_config_path, parse_launch_config};
use autoaccept_cdp::{
    ensure_remote_debugging, BootstrapOutcome, CdpConnector, DiscoveryClient, TargetPool,
};
use autoaccept_core::RemoteLink;
use autoaccept_types::CdpConfig;

/// The launch configuration file to patch, from config or the host default.
pub fn launch_config_path(cdp: &CdpConfig) -> Option<PathBuf> {
    cdp.launch_config_path
        .clone()
        .or_else(default_launch_config_path)
}

/// Run the bootstrap and return the port discovery should use.
///
/// Failures are logged and fall back to the configured port; the remote
/// path then simply stays inactive.
pub fn prepare_endpoint(cdp: &CdpConfig) -> u16 {
    let Some(path) = launch_config_path(cdp) else {
        warn!("no home directory, skipping launch configuration bootstrap");
        return cdp.port;
    };

    match ensure_remote_debugging(&path, cdp.port, cdp.port_range) {
        Ok(outcome @ BootstrapOutcome::Written { .. }) => {
            warn!(
                port = outcome.port(),
                path = %path.display(),
                "remote debugging enabled in launch configuration; restart the host to activate it"
            );
            outcome.port()
        }
        Ok(outcome) => {
            info!(port = outcome.port(), "remote debugging already configured");
            outcome.port()
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "launch configuration bootstrap failed");
            cdp.port
        }
    }
}

/// The port the launch configuration already names, without writing
/// anything. Falls back to the configured port.
pub fn current_port(cdp: &CdpConfig) -> u16 {
    let Some(path) = launch_config_path(cdp) else {
        return cdp.port;
    };
    let Ok(text) = std::fs::read_to_string(&path) else {
        return cdp.port;
    };
    match parse_launch_config(&text).and_then(|parsed| configured_port(&parsed)) {
        Ok(Some(port)) => port,
        Ok(None) => cdp.port,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "unreadable launch configuration");
            cdp.port
        }
    }
}

/// A discovery client for the endpoint on `port`.
pub fn discovery_client(cdp: &CdpConfig, port: u16) -> Result<DiscoveryClient> {
    let endpoint = cdp.endpoint(port);
    DiscoveryClient::new(&endpoint, cdp.request_timeout())
        .with_context(|| format!("failed to create discovery client for {endpoint}"))
}

/// Pool, discovery source and close channel for the agent runtime.
pub fn remote_link(cdp: &CdpConfig, port: u16) -> Result<RemoteLink> {
    let (close_tx, close_rx) = mpsc::unbounded_channel();
    let connector = CdpConnector::new(cdp.request_timeout(), close_tx);
    Ok(RemoteLink {
        pool: Arc::new(TargetPool::new(Arc::new(connector))),
        source: Arc::new(discovery_client(cdp, port)?),
        close_rx,
    })
}
