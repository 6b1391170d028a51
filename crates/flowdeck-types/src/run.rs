//! Run execution tracking types: status and the append-only trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Overall status of a run. Transitions:
/// `pending -> running <-> paused -> {completed | failed | cancelled}`,
/// with `cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Whether the run has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// Execution trace
// ---------------------------------------------------------------------------

/// Outcome of one node dispatch, recorded in the run trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeOutcome {
    Completed,
    Failed { error: String },
}

/// One append-only trace record per node dispatch, used for diagnostics
/// and replay-after-pause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node_id: String,
    #[serde(flatten)]
    pub outcome: NodeOutcome,
    pub at: DateTime<Utc>,
}

impl TraceEntry {
    pub fn completed(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            outcome: NodeOutcome::Completed,
            at: Utc::now(),
        }
    }

    pub fn failed(node_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            outcome: NodeOutcome::Failed {
                error: error.into(),
            },
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminality() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serde() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: RunStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn trace_entry_flattens_outcome() {
        let entry = TraceEntry::failed("n3", "selector not found");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["node_id"], "n3");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["error"], "selector not found");
    }
}
