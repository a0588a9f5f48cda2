//! `autoaccept targets`: list what the remote-debugging endpoint reports.

use anyhow::{Context, Result};

use autoaccept_cdp::TargetDescriptor;

use crate::options::ConfigArgs;
use crate::remote;

/// Run the `autoaccept targets` command.
///
/// Without `all`, only targets the agent would connect to are listed.
pub async fn run(args: &ConfigArgs, all: bool) -> Result<()> {
    let config = args.load()?.config;
    let port = remote::current_port(&config.cdp);
    let discovery = remote::discovery_client(&config.cdp, port)?;

    let targets = discovery
        .list_targets()
        .await
        .with_context(|| format!("remote debugging endpoint {} not reachable", discovery.base_url()))?;

    let shown: Vec<&TargetDescriptor> = targets
        .iter()
        .filter(|t| all || t.is_connectable())
        .collect();

    let hidden = targets.len() - shown.len();

    println!("Endpoint: {}", discovery.base_url());
    if shown.is_empty() {
        println!("  (no targets)");
        return Ok(());
    }
    for target in shown {
        println!("{}", describe(target));
    }
    if hidden > 0 {
        println!("  ({hidden} non-document target(s) hidden, use --all)");
    }
    Ok(())
}

fn describe(target: &TargetDescriptor) -> String {
    let marker = if target.is_connectable() { "*" } else { " " };
    let title = if target.title.is_empty() {
        "(untitled)"
    } else {
        target.title.as_str()
    };
    format!(
        "{marker} {:<10} {:<36} {title}\n             {}",
        target.kind, target.id, target.url
    )
}
