//! The fixed set of host accept actions and their boundary outcome.

use serde::{Deserialize, Serialize};

use crate::config::AcceptConfig;

/// A zero-argument accept action the host exposes as a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityAction {
    AgentStep,
    TerminalCommand,
    EditorEdit,
    AcceptAllInFile,
    AcceptFocusedHunk,
}

impl CapabilityAction {
    /// All actions, in the order a pass issues them.
    pub const ALL: [CapabilityAction; 5] = [
        CapabilityAction::AgentStep,
        CapabilityAction::TerminalCommand,
        CapabilityAction::EditorEdit,
        CapabilityAction::AcceptAllInFile,
        CapabilityAction::AcceptFocusedHunk,
    ];

    /// Key used in `[host.commands]` overrides and in logs.
    pub fn name(self) -> &'static str {
        match self {
            CapabilityAction::AgentStep => "agent_step",
            CapabilityAction::TerminalCommand => "terminal_command",
            CapabilityAction::EditorEdit => "editor_edit",
            CapabilityAction::AcceptAllInFile => "accept_all_in_file",
            CapabilityAction::AcceptFocusedHunk => "accept_focused_hunk",
        }
    }

    /// Host command id issued when no override is configured.
    pub fn default_command(self) -> &'static str {
        match self {
            CapabilityAction::AgentStep => "agent.acceptAgentStep",
            CapabilityAction::TerminalCommand => "terminal.acceptCommand",
            CapabilityAction::EditorEdit => "editor.acceptEdit",
            CapabilityAction::AcceptAllInFile => "editor.acceptAllInFile",
            CapabilityAction::AcceptFocusedHunk => "editor.acceptFocusedHunk",
        }
    }

    /// Whether the feature toggle gating this action is on.
    pub fn is_enabled(self, config: &AcceptConfig) -> bool {
        match self {
            CapabilityAction::AgentStep => config.enable_agent_step_accept,
            CapabilityAction::TerminalCommand => config.enable_terminal_accept,
            CapabilityAction::EditorEdit
            | CapabilityAction::AcceptAllInFile
            | CapabilityAction::AcceptFocusedHunk => config.enable_editor_accept,
        }
    }
}

impl std::fmt::Display for CapabilityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What happened when a capability action was issued.
///
/// The host usually cannot tell "nothing pending" apart from a failure, so
/// callers treat `NotApplicable` and `Failed` the same way and move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    NotApplicable,
    Failed(String),
}

impl ActionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied)
    }
}
