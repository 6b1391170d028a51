//! Debugger protocol types: state snapshots, commands, and responses.
//!
//! `DebuggerCommand`/`DebuggerResponse` form the request/response RPC
//! surface; transport is out of scope. The response shape on the wire is
//! `{ok: true, state?, value?}` or `{ok: false, error}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::run::RunStatus;

// ---------------------------------------------------------------------------
// DebuggerState
// ---------------------------------------------------------------------------

/// Derived snapshot of one run for protocol consumers. Never stored;
/// rebuilt on demand so polling clients always see current truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebuggerState {
    pub run_id: Uuid,
    pub attached: bool,
    pub status: RunStatus,
    /// Node the kernel will dispatch next (or is currently dispatching).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    /// Sorted breakpoint node ids.
    pub breakpoints: Vec<String>,
}

// ---------------------------------------------------------------------------
// DebuggerCommand
// ---------------------------------------------------------------------------

/// One debugger request, tagged by operation name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DebuggerCommand {
    Attach {
        run_id: Uuid,
    },
    Detach {
        run_id: Uuid,
    },
    Pause {
        run_id: Uuid,
    },
    Resume {
        run_id: Uuid,
    },
    StepOver {
        run_id: Uuid,
    },
    SetBreakpoints {
        run_id: Uuid,
        node_ids: Vec<String>,
    },
    AddBreakpoint {
        run_id: Uuid,
        node_id: String,
    },
    RemoveBreakpoint {
        run_id: Uuid,
        node_id: String,
    },
    GetState {
        run_id: Uuid,
    },
    GetVar {
        run_id: Uuid,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<usize>,
    },
    SetVar {
        run_id: Uuid,
        name: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<usize>,
    },
}

// ---------------------------------------------------------------------------
// DebuggerResponse
// ---------------------------------------------------------------------------

/// One debugger response. Constructors keep the wire shape honest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebuggerResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DebuggerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DebuggerResponse {
    /// Success carrying the resulting state.
    pub fn ok_state(state: DebuggerState) -> Self {
        Self {
            ok: true,
            state: Some(state),
            value: None,
            error: None,
        }
    }

    /// Success carrying a variable value.
    pub fn ok_value(value: Value) -> Self {
        Self {
            ok: true,
            state: None,
            value: Some(value),
            error: None,
        }
    }

    /// Failure with a descriptive message.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            state: None,
            value: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
