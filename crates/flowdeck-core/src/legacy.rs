//! Conversion between the legacy step-list format and the graph format.
//!
//! Older persisted scripts are strictly ordered step arrays. The adapter
//! turns them into graph flows (synthesizing sequential `default` edges)
//! and back. Conversions are total: every step becomes a node and every
//! node becomes a step, so counts are preserved in both directions.

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use flowdeck_types::flow::{Edge, EdgeLabel, Node};
use flowdeck_types::legacy::LegacyStep;

/// Fields whose values are selector descriptors and get normalized to the
/// `{candidates: [...]}` shape the handlers expect.
const TARGET_FIELDS: [&str; 3] = ["target", "start", "end"];

// ---------------------------------------------------------------------------
// Steps -> nodes
// ---------------------------------------------------------------------------

/// Convert legacy steps into nodes, preserving order. All fields except
/// `id` and `type` become the node's config; selector-bearing fields are
/// normalized to candidate lists. A `wait` step becomes a `delay` node
/// with `duration` renamed to `ms`; its other fields carry over.
pub fn steps_to_nodes(steps: &[LegacyStep]) -> Vec<Node> {
    steps.iter().map(step_to_node).collect()
}

/// Convert legacy steps into nodes plus the synthesized sequential
/// `default` edges. Edge ids embed the position index, so repeated step
/// ids cannot collide.
pub fn steps_to_dag(steps: &[LegacyStep]) -> (Vec<Node>, Vec<Edge>) {
    let nodes = steps_to_nodes(steps);
    let edges = nodes
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            Edge::new(
                format!("e-{}-{}", i, i + 1),
                &pair[0].id,
                &pair[1].id,
                EdgeLabel::Default,
            )
        })
        .collect();
    (nodes, edges)
}

fn step_to_node(step: &LegacyStep) -> Node {
    let mut config = Map::new();
    for (key, value) in &step.fields {
        let value = if TARGET_FIELDS.contains(&key.as_str()) {
            normalize_target(value)
        } else {
            value.clone()
        };
        config.insert(key.clone(), value);
    }

    if step.step_type == "wait" {
        let ms = config
            .remove("duration")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        config.insert("ms".to_string(), json!(ms));
        return Node::new(&step.id, "delay", Value::Object(config));
    }
    Node::new(&step.id, &step.step_type, Value::Object(config))
}

/// Wrap a bare selector descriptor as `{candidates: [..]}`. Values that
/// already carry a candidate list pass through untouched.
fn normalize_target(value: &Value) -> Value {
    match value {
        Value::Object(map) if map.contains_key("candidates") => value.clone(),
        other => json!({"candidates": [other]}),
    }
}

// ---------------------------------------------------------------------------
// Nodes -> steps
// ---------------------------------------------------------------------------

/// Convert nodes back into legacy steps, preserving order. A `delay` node
/// becomes a `wait` step with `ms` renamed back to `duration`; its other
/// fields carry over.
pub fn nodes_to_steps(nodes: &[Node]) -> Vec<LegacyStep> {
    nodes.iter().map(node_to_step).collect()
}

fn node_to_step(node: &Node) -> LegacyStep {
    let mut step = LegacyStep::new(&node.id, &node.kind);
    if let Value::Object(map) = &node.config {
        step.fields = map.clone();
    }

    if node.kind == "delay" {
        let ms = step
            .fields
            .remove("ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        step.fields.insert("duration".to_string(), json!(ms));
        step.step_type = "wait".to_string();
    }
    step
}

// ---------------------------------------------------------------------------
// Linearization
// ---------------------------------------------------------------------------

/// Topologically order nodes by the edges carrying `label`. On a cycle,
/// or any other sort failure, falls back to storage order. The returned
/// ids always cover every input node exactly once.
pub fn topo_order(nodes: &[Node], edges: &[Edge], label: EdgeLabel) -> Vec<String> {
    let storage_order = || nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>();
    if nodes.is_empty() {
        return Vec::new();
    }

    let id_to_idx: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = nodes.iter().map(|n| graph.add_node(n.id.as_str())).collect();

    for edge in edges {
        if edge.label != label {
            continue;
        }
        let (Some(&from), Some(&to)) = (
            id_to_idx.get(edge.from.as_str()),
            id_to_idx.get(edge.to.as_str()),
        ) else {
            // Edge references a node outside this set; ignore it rather
            // than fail the whole linearization.
            continue;
        };
        graph.add_edge(node_indices[from], node_indices[to], ());
    }

    match toposort(&graph, None) {
        Ok(sorted) => sorted.into_iter().map(|idx| graph[idx].to_string()).collect(),
        Err(cycle) => {
            tracing::debug!(
                node_id = graph[cycle.node_id()],
                "cycle in flow graph, linearizing in storage order"
            );
            storage_order()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
