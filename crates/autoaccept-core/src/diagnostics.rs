//! Rolling in-memory diagnostic log backing the "show log" command.
//!
//! Everything recorded here is also emitted through `tracing`; this buffer
//! only keeps the most recent lines so they can be shown on demand without a
//! log file.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Lines kept when no capacity is given.
pub const DEFAULT_CAPACITY: usize = 500;

/// One recorded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl std::fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S%.3f"), self.message)
    }
}

/// Ring buffer of the most recent diagnostic lines.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    entries: VecDeque<DiagnosticEntry>,
    capacity: usize,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, message: impl Into<String>) {
        self.record_at(Utc::now(), message);
    }

    pub fn record_at(&mut self, at: DateTime<Utc>, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(DiagnosticEntry {
            at,
            message: message.into(),
        });
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&DiagnosticEntry> {
        let start = self.entries.len().saturating_sub(n);
        self.entries.range(start..).collect()
    }

    /// The most recent `n` entries rendered as lines.
    pub fn recent_lines(&self, n: usize) -> Vec<String> {
        self.recent(n).into_iter().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn keeps_only_capacity_entries() {
        let mut log = DiagnosticLog::new(3);
        for i in 0..5 {
            log.record(format!("line {i}"));
        }
        assert_eq!(log.len(), 3);
        let messages: Vec<_> = log.recent(10).iter().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn recent_returns_tail_oldest_first() {
        let mut log = DiagnosticLog::default();
        log.record("a");
        log.record("b");
        log.record("c");
        let messages: Vec<_> = log.recent(2).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn lines_carry_timestamp() {
        let mut log = DiagnosticLog::new(4);
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap();
        log.record_at(at, "IDLE -> FAST (terminal_opened)");
        assert_eq!(
            log.recent_lines(1),
            vec!["[12:30:05.000] IDLE -> FAST (terminal_opened)"]
        );
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut log = DiagnosticLog::new(0);
        log.record("x");
        log.record("y");
        assert_eq!(log.len(), 1);
    }
}
