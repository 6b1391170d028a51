//! The legacy step-list interchange format.
//!
//! Older persisted scripts and external consumers use a strictly ordered
//! array of steps. Each step carries `id`, `type`, and kind-specific fields
//! that map one-to-one onto a node's `config`. The adapter in
//! `flowdeck-core` converts between this and the graph form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step in the legacy linear format. All keys other than `id` and
/// `type` are kind-specific and round-trip through a node's `config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LegacyStep {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}
