//! The node-handler wire contract.
//!
//! Handlers are implemented by external collaborators (click, type,
//! navigate, fetch, ...). The kernel only sees this shape:
//! `{status: "success", values?} | {status: "failure", error}`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HandlerOutcome {
    /// Named values to merge into the run's scope.
    Success {
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        values: HashMap<String, Value>,
    },
    /// Classified failure; the node's failure policy decides what happens.
    Failure { error: ErrorInfo },
}

impl HandlerOutcome {
    /// Success with no scope writes.
    pub fn success() -> Self {
        HandlerOutcome::Success {
            values: HashMap::new(),
        }
    }

    /// Success merging the given values.
    pub fn with_values(values: HashMap<String, Value>) -> Self {
        HandlerOutcome::Success { values }
    }

    /// Failure with a classification code and message.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerOutcome::Failure {
            error: ErrorInfo {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Error classification reported by a failed handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable classification (e.g. "target_not_found",
    /// "navigation_timeout", "subflow_failed").
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
