//! `autoaccept accept`: run a single acceptance pass and exit.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use autoaccept_cdp::{CdpConnector, TargetPool};
use autoaccept_core::{run_pass, PassContext, PassReason, SharedSettings};

use crate::host::ProcessInvoker;
use crate::options::ConfigArgs;
use crate::remote;

/// Run the `autoaccept accept` command.
pub async fn run(args: &ConfigArgs) -> Result<()> {
    let config = args.load()?.config;
    let settings = Arc::new(SharedSettings::new(config.clone()));
    let mut ctx = PassContext::new(Arc::new(ProcessInvoker::new(settings)));

    let mut pool = None;
    if config.cdp.enabled {
        let discovery = remote::discovery_client(&config.cdp, remote::current_port(&config.cdp))?;
        match discovery.connectable_targets().await {
            Ok(targets) => {
                // Close notices only matter to a long-running agent.
                let (close_tx, _close_rx) = tokio::sync::mpsc::unbounded_channel();
                let connector = CdpConnector::new(config.cdp.request_timeout(), close_tx);
                let targets_pool = Arc::new(TargetPool::new(Arc::new(connector)));
                let report = targets_pool.reconcile(&targets).await;
                println!(
                    "Remote: {} target(s) connected, {} failed",
                    report.connected.len(),
                    report.failed.len()
                );
                ctx = ctx.with_pool(Arc::clone(&targets_pool));
                pool = Some(targets_pool);
            }
            Err(e) => {
                warn!(error = %e, "remote debugging endpoint not reachable");
                println!("Remote: not active ({e})");
            }
        }
    }

    let report = run_pass(&ctx, &config, PassReason::Forced).await;
    println!("{}", report.summary());

    if let Some(pool) = pool {
        pool.close_all().await;
    }
    Ok(())
}
