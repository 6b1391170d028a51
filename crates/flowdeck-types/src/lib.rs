//! Shared domain types for the flowdeck execution engine.
//!
//! This crate contains the data model shared across the engine: flows and
//! their nodes/edges, run status and trace records, debugger protocol
//! types, the node-handler wire contract, and the legacy step-list format.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid,
//! chrono.

pub mod debug;
pub mod event;
pub mod flow;
pub mod handler;
pub mod legacy;
pub mod run;
