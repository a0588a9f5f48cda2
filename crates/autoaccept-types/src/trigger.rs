//! Host activity notifications that escalate the scheduler.

use serde::{Deserialize, Serialize};

/// A discrete activity notification from the host environment.
///
/// Every trigger escalates the scheduler to `Fast`, except
/// [`Trigger::TextChanged`], which is debounced and only escalates from
/// `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    TerminalOpened,
    TerminalClosed,
    TerminalFocused,
    EditorVisibilityChanged,
    EditorFocused,
    TextChanged,
    FileCreated,
    DocumentSaved,
    TaskStarted,
    TaskEnded,
    DebugSessionStarted,
    WindowFocusGained,
    WindowFocusLost,
    /// Settings changed; the runtime reloads configuration before escalating.
    ConfigurationChanged,
}

impl Trigger {
    /// Every trigger the host can deliver.
    pub const ALL: [Trigger; 14] = [
        Trigger::TerminalOpened,
        Trigger::TerminalClosed,
        Trigger::TerminalFocused,
        Trigger::EditorVisibilityChanged,
        Trigger::EditorFocused,
        Trigger::TextChanged,
        Trigger::FileCreated,
        Trigger::DocumentSaved,
        Trigger::TaskStarted,
        Trigger::TaskEnded,
        Trigger::DebugSessionStarted,
        Trigger::WindowFocusGained,
        Trigger::WindowFocusLost,
        Trigger::ConfigurationChanged,
    ];

    /// Whether this trigger goes through the text-change debouncer.
    pub fn is_debounced(self) -> bool {
        matches!(self, Trigger::TextChanged)
    }

    /// Stable name used in logs and on the control channel.
    pub fn name(self) -> &'static str {
        match self {
            Trigger::TerminalOpened => "terminal_opened",
            Trigger::TerminalClosed => "terminal_closed",
            Trigger::TerminalFocused => "terminal_focused",
            Trigger::EditorVisibilityChanged => "editor_visibility_changed",
            Trigger::EditorFocused => "editor_focused",
            Trigger::TextChanged => "text_changed",
            Trigger::FileCreated => "file_created",
            Trigger::DocumentSaved => "document_saved",
            Trigger::TaskStarted => "task_started",
            Trigger::TaskEnded => "task_ended",
            Trigger::DebugSessionStarted => "debug_session_started",
            Trigger::WindowFocusGained => "window_focus_gained",
            Trigger::WindowFocusLost => "window_focus_lost",
            Trigger::ConfigurationChanged => "configuration_changed",
        }
    }

    /// Parse a trigger from its [`name`](Self::name).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
