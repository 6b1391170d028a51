//! Structural validation of flows before they are registered.
//!
//! Validation runs once at registration time so the kernel can assume a
//! well-formed graph: unique node ids, resolvable edge endpoints, at most
//! one outgoing edge per (node, label), a resolvable entry node, and
//! deserializable built-in configs.

use std::collections::HashSet;

use flowdeck_types::flow::{
    BuiltinKind, ExecuteFlowConfig, Flow, ForeachConfig, IfConfig, LoopElementsConfig,
    WhileConfig,
};

/// Why a flow was rejected at registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("flow has no nodes")]
    NoNodes,

    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("duplicate edge id '{0}'")]
    DuplicateEdgeId(String),

    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    UnknownEndpoint { edge_id: String, node_id: String },

    #[error("node '{node_id}' has multiple outgoing '{label}' edges")]
    AmbiguousEdge { node_id: String, label: String },

    #[error("entry node cannot be resolved (explicit entry missing or every node has an incoming edge)")]
    NoEntry,

    #[error("node '{node_id}' has invalid config: {message}")]
    InvalidConfig { node_id: String, message: String },
}

/// Validate a flow's structure. Returns the first violation found.
pub fn validate_flow(flow: &Flow) -> Result<(), FlowError> {
    if flow.nodes.is_empty() {
        return Err(FlowError::NoNodes);
    }

    let mut node_ids = HashSet::new();
    for node in &flow.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(FlowError::DuplicateNodeId(node.id.clone()));
        }
    }

    let mut edge_ids = HashSet::new();
    let mut outgoing = HashSet::new();
    for edge in &flow.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            return Err(FlowError::DuplicateEdgeId(edge.id.clone()));
        }
        for endpoint in [&edge.from, &edge.to] {
            if !node_ids.contains(endpoint.as_str()) {
                return Err(FlowError::UnknownEndpoint {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
        if !outgoing.insert((edge.from.as_str(), edge.label)) {
            return Err(FlowError::AmbiguousEdge {
                node_id: edge.from.clone(),
                label: format!("{:?}", edge.label).to_lowercase(),
            });
        }
    }

    if flow.entry_node().is_none() {
        return Err(FlowError::NoEntry);
    }

    for node in &flow.nodes {
        validate_builtin_config(node)?;
    }

    Ok(())
}

/// Built-in node configs must deserialize up front; handler configs are
/// opaque and validated by the handler at dispatch.
fn validate_builtin_config(node: &flowdeck_types::flow::Node) -> Result<(), FlowError> {
    let invalid = |message: String| FlowError::InvalidConfig {
        node_id: node.id.clone(),
        message,
    };
    match BuiltinKind::from_kind(&node.kind) {
        Some(BuiltinKind::If) => {
            serde_json::from_value::<IfConfig>(node.config.clone())
                .map_err(|e| invalid(e.to_string()))?;
        }
        Some(BuiltinKind::Foreach) => {
            serde_json::from_value::<ForeachConfig>(node.config.clone())
                .map_err(|e| invalid(e.to_string()))?;
        }
        Some(BuiltinKind::LoopElements) => {
            serde_json::from_value::<LoopElementsConfig>(node.config.clone())
                .map_err(|e| invalid(e.to_string()))?;
        }
        Some(BuiltinKind::While) => {
            let cfg = serde_json::from_value::<WhileConfig>(node.config.clone())
                .map_err(|e| invalid(e.to_string()))?;
            if cfg.max_iterations == 0 {
                return Err(invalid("maxIterations must be at least 1".to_string()));
            }
        }
        Some(BuiltinKind::ExecuteFlow) => {
            serde_json::from_value::<ExecuteFlowConfig>(node.config.clone())
                .map_err(|e| invalid(e.to_string()))?;
        }
        None => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeck_types::flow::{Edge, EdgeLabel, Node};
    use serde_json::json;
    use std::collections::HashMap;

    fn flow(nodes: Vec<Node>, edges: Vec<Edge>) -> Flow {
        Flow {
            id: "f".to_string(),
            name: String::new(),
            nodes,
            edges,
            initial_vars: HashMap::new(),
            entry: None,
        }
    }

    #[test]
    fn accepts_linear_flow() {
        let f = flow(
            vec![
                Node::new("n1", "navigate", json!({"url": "https://example.com"})),
                Node::new("n2", "click", json!({})),
            ],
            vec![Edge::new("e1", "n1", "n2", EdgeLabel::Default)],
        );
        assert!(validate_flow(&f).is_ok());
    }

    #[test]
    fn rejects_empty_flow() {
        assert_eq!(validate_flow(&flow(vec![], vec![])), Err(FlowError::NoNodes));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let f = flow(
            vec![
                Node::new("n1", "click", json!({})),
                Node::new("n1", "click", json!({})),
            ],
            vec![],
        );
        assert_eq!(
            validate_flow(&f),
            Err(FlowError::DuplicateNodeId("n1".to_string()))
        );
    }

    #[test]
    fn rejects_unknown_edge_endpoint() {
        let f = flow(
            vec![Node::new("n1", "click", json!({}))],
            vec![Edge::new("e1", "n1", "ghost", EdgeLabel::Default)],
        );
        assert!(matches!(
            validate_flow(&f),
            Err(FlowError::UnknownEndpoint { node_id, .. }) if node_id == "ghost"
        ));
    }

    #[test]
    fn rejects_two_default_edges_from_one_node() {
        let f = flow(
            vec![
                Node::new("n1", "click", json!({})),
                Node::new("n2", "click", json!({})),
                Node::new("n3", "click", json!({})),
            ],
            vec![
                Edge::new("e1", "n1", "n2", EdgeLabel::Default),
                Edge::new("e2", "n1", "n3", EdgeLabel::Default),
            ],
        );
        assert!(matches!(
            validate_flow(&f),
            Err(FlowError::AmbiguousEdge { node_id, .. }) if node_id == "n1"
        ));
    }

    #[test]
    fn accepts_distinct_labels_from_one_node() {
        let f = flow(
            vec![
                Node::new("gate", "if", json!({"condition": "vars.x"})),
                Node::new("a", "click", json!({})),
                Node::new("b", "click", json!({})),
            ],
            vec![
                Edge::new("e1", "gate", "a", EdgeLabel::True),
                Edge::new("e2", "gate", "b", EdgeLabel::False),
            ],
        );
        assert!(validate_flow(&f).is_ok());
    }

    #[test]
    fn rejects_unresolvable_entry() {
        let mut f = flow(
            vec![
                Node::new("n1", "click", json!({})),
                Node::new("n2", "click", json!({})),
            ],
            vec![
                Edge::new("e1", "n1", "n2", EdgeLabel::Default),
                Edge::new("e2", "n2", "n1", EdgeLabel::Default),
            ],
        );
        assert_eq!(validate_flow(&f), Err(FlowError::NoEntry));

        f.entry = Some("ghost".to_string());
        assert_eq!(validate_flow(&f), Err(FlowError::NoEntry));
    }

    #[test]
    fn rejects_malformed_if_config() {
        let f = flow(vec![Node::new("gate", "if", json!({}))], vec![]);
        assert!(matches!(
            validate_flow(&f),
            Err(FlowError::InvalidConfig { node_id, .. }) if node_id == "gate"
        ));
    }

    #[test]
    fn rejects_zero_max_iterations() {
        let f = flow(
            vec![Node::new(
                "loop",
                "while",
                json!({"condition": "vars.more", "flow": "body", "maxIterations": 0}),
            )],
            vec![],
        );
        assert!(matches!(
            validate_flow(&f),
            Err(FlowError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn handler_configs_are_opaque() {
        // Unknown kinds carry arbitrary config, validated by the handler.
        let f = flow(
            vec![Node::new("n1", "customKind", json!({"whatever": [1, 2]}))],
            vec![],
        );
        assert!(validate_flow(&f).is_ok());
    }
}
