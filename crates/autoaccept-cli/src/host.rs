//! Capability delivery through a host command-line program.
//!
//! Each action spawns `[host] program` with `args`, replacing every
//! `{command}` placeholder by the action's command id. Exit status 0 means
//! the host accepted something; any other status means there was nothing to
//! accept.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use autoaccept_core::{CapabilityInvoker, SettingsSource};
use autoaccept_types::{ActionOutcome, CapabilityAction, HostConfig};

const COMMAND_PLACEHOLDER: &str = "{command}";

/// Issues capability actions by running the configured host program.
pub struct ProcessInvoker {
    settings: Arc<dyn SettingsSource>,
}

impl ProcessInvoker {
    pub fn new(settings: Arc<dyn SettingsSource>) -> Self {
        Self { settings }
    }
}

/// The host command id for `action`, honouring `[host.commands]`.
pub fn command_id(host: &HostConfig, action: CapabilityAction) -> String {
    host.commands
        .get(action.name())
        .cloned()
        .unwrap_or_else(|| action.default_command().to_string())
}

/// `args` with every `{command}` placeholder replaced.
pub fn expand_args(args: &[String], command: &str) -> Vec<String> {
    args.iter()
        .map(|arg| arg.replace(COMMAND_PLACEHOLDER, command))
        .collect()
}

#[async_trait]
impl CapabilityInvoker for ProcessInvoker {
    async fn invoke(&self, action: CapabilityAction) -> ActionOutcome {
        let host = self.settings.current().host;
        let Some(program) = host.program.as_deref() else {
            return ActionOutcome::NotApplicable;
        };

        let command = command_id(&host, action);
        let args = expand_args(&host.args, &command);

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => return ActionOutcome::Failed(format!("failed to spawn {program}: {e}")),
        };

        let timeout = Duration::from_millis(host.timeout_ms.max(1));
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => ActionOutcome::Applied,
            Ok(Ok(output)) => {
                debug!(
                    action = %action,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "host command had nothing to accept"
                );
                ActionOutcome::NotApplicable
            }
            Ok(Err(e)) => ActionOutcome::Failed(format!("host command {command} failed: {e}")),
            Err(_) => ActionOutcome::Failed(format!(
                "host command {command} timed out after {}ms",
                timeout.as_millis()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoaccept_core::SharedSettings;
    use autoaccept_types::AcceptConfig;

    fn invoker_for(host: HostConfig) -> ProcessInvoker {
        let settings = SharedSettings::new(AcceptConfig {
            host,
            ..AcceptConfig::default()
        });
        ProcessInvoker::new(Arc::new(settings))
    }

    #[test]
    fn command_overrides_replace_defaults() {
        let mut host = HostConfig::default();
        host.commands
            .insert("terminal_command".into(), "custom.accept".into());
        assert_eq!(
            command_id(&host, CapabilityAction::TerminalCommand),
            "custom.accept"
        );
        assert_eq!(
            command_id(&host, CapabilityAction::AgentStep),
            "agent.acceptAgentStep"
        );
    }

    #[test]
    fn placeholder_is_expanded_everywhere() {
        let args = vec![
            "--command".to_string(),
            "{command}".to_string(),
            "--tag={command}".to_string(),
        ];
        assert_eq!(
            expand_args(&args, "editor.acceptEdit"),
            vec!["--command", "editor.acceptEdit", "--tag=editor.acceptEdit"]
        );
    }

    #[tokio::test]
    async fn no_program_is_not_applicable() {
        let invoker = invoker_for(HostConfig::default());
        assert_eq!(
            invoker.invoke(CapabilityAction::AgentStep).await,
            ActionOutcome::NotApplicable
        );
    }

    #[tokio::test]
    async fn missing_program_fails() {
        let invoker = invoker_for(HostConfig {
            program: Some("/nonexistent/autoaccept-host".into()),
            ..HostConfig::default()
        });
        assert!(matches!(
            invoker.invoke(CapabilityAction::AgentStep).await,
            ActionOutcome::Failed(_)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_maps_to_outcome() {
        let applied = invoker_for(HostConfig {
            program: Some("sh".into()),
            args: vec!["-c".into(), "test {command} = agent.acceptAgentStep".into()],
            ..HostConfig::default()
        });
        assert_eq!(
            applied.invoke(CapabilityAction::AgentStep).await,
            ActionOutcome::Applied
        );
        assert_eq!(
            applied.invoke(CapabilityAction::EditorEdit).await,
            ActionOutcome::NotApplicable
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_host_times_out() {
        let invoker = invoker_for(HostConfig {
            program: Some("sleep".into()),
            args: vec!["5".into()],
            timeout_ms: 50,
            ..HostConfig::default()
        });
        match invoker.invoke(CapabilityAction::AgentStep).await {
            ActionOutcome::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
