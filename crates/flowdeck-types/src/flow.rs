//! Flow domain types: the authored automation graph.
//!
//! A `Flow` is the immutable artifact the kernel executes: a set of typed
//! `Node`s connected by labelled `Edge`s, plus optional initial variable
//! bindings. Node `kind` is an open string: a small closed set of built-in
//! control-flow kinds is interpreted by the kernel directly, everything
//! else resolves through the plugin registry.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// An immutable authored automation graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Flow identifier, unique within the engine's flow table.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Nodes in storage order. Storage order matters: it is the fallback
    /// order for linearization and entry-node inference.
    pub nodes: Vec<Node>,
    /// Labelled directed edges between nodes.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Initial variable bindings seeded into a run's root scope.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub initial_vars: HashMap<String, Value>,
    /// Explicitly marked entry node. When absent, the entry is the first
    /// node (storage order) with no incoming edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

impl Flow {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The single outgoing edge from `from` carrying `label`, if any.
    pub fn outgoing(&self, from: &str, label: EdgeLabel) -> Option<&Edge> {
        self.edges.iter().find(|e| e.from == from && e.label == label)
    }

    /// Resolve the entry node: the explicit `entry` marker, else the first
    /// node in storage order with no incoming edge.
    pub fn entry_node(&self) -> Option<&Node> {
        if let Some(entry) = &self.entry {
            return self.node(entry);
        }
        let targets: HashSet<&str> = self.edges.iter().map(|e| e.to.as_str()).collect();
        self.nodes.iter().find(|n| !targets.contains(n.id.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A single typed step in a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node id, unique within the flow.
    pub id: String,
    /// Kind discriminator: a built-in control-flow kind or a registered
    /// handler kind.
    pub kind: String,
    /// Kind-specific configuration, interpreted by the handler or kernel.
    #[serde(default)]
    pub config: Value,
    /// What the kernel does when this node's handler reports failure.
    #[serde(default, skip_serializing_if = "FailurePolicy::is_stop")]
    pub on_failure: FailurePolicy,
}

impl Node {
    /// Construct a node with default (stop) failure policy.
    pub fn new(id: impl Into<String>, kind: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            config,
            on_failure: FailurePolicy::default(),
        }
    }
}

/// The closed set of node kinds the kernel interprets itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    If,
    Foreach,
    While,
    LoopElements,
    ExecuteFlow,
}

impl BuiltinKind {
    /// Map a node `kind` string to a built-in, if it is one.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "if" => Some(Self::If),
            "foreach" => Some(Self::Foreach),
            "while" => Some(Self::While),
            "loopElements" => Some(Self::LoopElements),
            "executeFlow" => Some(Self::ExecuteFlow),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A labelled directed connection between two nodes. The kernel selects
/// exactly one outgoing edge after each node completes, keyed by label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub label: EdgeLabel,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        label: EdgeLabel,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            label,
        }
    }
}

/// Edge labels the kernel knows how to follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeLabel {
    #[default]
    Default,
    True,
    False,
    LoopBody,
    LoopExit,
}

// ---------------------------------------------------------------------------
// Failure policy
// ---------------------------------------------------------------------------

/// What to do when a node's handler reports failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Propagate the failure and fail the run (or enclosing frame).
    #[default]
    Stop,
    /// Log the failure and proceed along the default edge.
    Continue,
    /// Re-invoke the handler a bounded number of times with backoff, then
    /// fall back to stop or continue.
    Retry {
        max_attempts: u32,
        #[serde(default)]
        backoff_ms: u64,
        #[serde(default)]
        on_exhausted: ExhaustedPolicy,
    },
}

impl FailurePolicy {
    /// Used to omit the default policy from serialized nodes.
    pub fn is_stop(&self) -> bool {
        matches!(self, FailurePolicy::Stop)
    }
}

/// Fallback once retry attempts are exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    #[default]
    Stop,
    Continue,
}

// ---------------------------------------------------------------------------
// Built-in node config payloads
// ---------------------------------------------------------------------------

/// Config for an `if` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfConfig {
    /// Condition expression evaluated against the run's scope.
    pub condition: String,
}

/// Config for a `foreach` node: iterate an ordered collection held in a
/// scope variable, executing a subflow once per item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeachConfig {
    /// Name of the scope variable holding the collection.
    pub items: String,
    /// Name bound to the current item inside the loop body's scope.
    pub item_var: String,
    /// Id of the subflow executed once per item.
    pub flow: String,
}

/// Config for a `loopElements` node: like `foreach`, but the collection is
/// a live enumeration supplied by an external element provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopElementsConfig {
    /// Opaque selector passed to the element provider.
    pub selector: String,
    /// Name bound to the current element inside the loop body's scope.
    pub item_var: String,
    /// Id of the subflow executed once per element.
    pub flow: String,
}

/// Config for a `while` node. `max_iterations` is a mandatory positive
/// bound; exceeding it fails the enclosing frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhileConfig {
    /// Condition expression re-evaluated before each body execution.
    pub condition: String,
    /// Id of the subflow executed as the loop body.
    pub flow: String,
    /// Hard upper bound on body executions.
    pub max_iterations: u32,
}

/// Config for an `executeFlow` node (subflow call).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteFlowConfig {
    /// Id of the flow to execute.
    pub flow: String,
    /// When true, the subflow shares the caller's scope and its writes are
    /// visible to the caller. When false, the subflow's writes stay
    /// isolated and only `returns` bindings propagate back.
    #[serde(default)]
    pub inline: bool,
    /// Variable names copied back into the caller's scope when
    /// `inline = false`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub returns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
