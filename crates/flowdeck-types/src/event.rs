//! Engine events pushed to attached observers.
//!
//! Events carry dotted wire names (`run.paused`, `node.started`, ...) so
//! they can be forwarded to debugger clients unchanged. They are emitted in
//! the exact order the kernel transitions through them for a given run;
//! clients that only poll `getState` must still function, so events are an
//! optimization over polling, never the sole source of truth.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event emitted by the kernel for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    /// The run paused immediately before dispatching `node_id`.
    #[serde(rename = "run.paused")]
    RunPaused { run_id: Uuid, node_id: String },

    /// The run resumed after a pause.
    #[serde(rename = "run.resumed")]
    RunResumed { run_id: Uuid },

    /// A node dispatch began.
    #[serde(rename = "node.started")]
    NodeStarted { run_id: Uuid, node_id: String },

    /// A node dispatch completed successfully.
    #[serde(rename = "node.completed")]
    NodeCompleted { run_id: Uuid, node_id: String },

    /// A node dispatch failed (after its failure policy was exhausted).
    #[serde(rename = "node.failed")]
    NodeFailed {
        run_id: Uuid,
        node_id: String,
        error: String,
    },

    /// The run reached `completed`.
    #[serde(rename = "run.completed")]
    RunCompleted { run_id: Uuid },

    /// The run reached `failed`.
    #[serde(rename = "run.failed")]
    RunFailed { run_id: Uuid, error: String },

    /// The run reached `cancelled`.
    #[serde(rename = "run.cancelled")]
    RunCancelled { run_id: Uuid },
}

impl FlowEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            FlowEvent::RunPaused { run_id, .. }
            | FlowEvent::RunResumed { run_id }
            | FlowEvent::NodeStarted { run_id, .. }
            | FlowEvent::NodeCompleted { run_id, .. }
            | FlowEvent::NodeFailed { run_id, .. }
            | FlowEvent::RunCompleted { run_id }
            | FlowEvent::RunFailed { run_id, .. }
            | FlowEvent::RunCancelled { run_id } => *run_id,
        }
    }
}
