//! Debugger controller: a command facade over live runs.
//!
//! Each operation addresses a run by id, checks attachment and status
//! preconditions synchronously, and mutates nothing when a precondition
//! fails. State-changing operations return the resulting `DebuggerState`
//! snapshot. `handle_command` adapts the typed API to the RPC wire shape.

use std::sync::Arc;

use flowdeck_types::debug::{DebuggerCommand, DebuggerResponse, DebuggerState};
use flowdeck_types::run::RunStatus;
use serde_json::Value;
use uuid::Uuid;

use crate::engine::{FlowEngine, RunHandle};

/// Why a debugger command was rejected. Rejection is side-effect free.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DebuggerCommandError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("run {0} has no debugger attached")]
    NotAttached(Uuid),

    #[error("run {run_id} is {actual:?}, expected {expected:?}")]
    InvalidStatus {
        run_id: Uuid,
        expected: RunStatus,
        actual: RunStatus,
    },

    #[error("variable '{0}' not found")]
    VarNotFound(String),

    #[error("frame index {0} out of range")]
    FrameOutOfRange(usize),
}

/// Typed debugger API over the engine's run table.
#[derive(Clone, Debug)]
pub struct DebuggerController {
    engine: FlowEngine,
}

impl DebuggerController {
    pub fn new(engine: FlowEngine) -> Self {
        Self { engine }
    }

    fn handle(&self, run_id: Uuid) -> Result<Arc<RunHandle>, DebuggerCommandError> {
        self.engine
            .run(run_id)
            .ok_or(DebuggerCommandError::RunNotFound(run_id))
    }

    fn attached(&self, run_id: Uuid) -> Result<Arc<RunHandle>, DebuggerCommandError> {
        let handle = self.handle(run_id)?;
        if !handle.is_attached() {
            return Err(DebuggerCommandError::NotAttached(run_id));
        }
        Ok(handle)
    }

    fn expect_status(
        handle: &RunHandle,
        expected: RunStatus,
    ) -> Result<(), DebuggerCommandError> {
        let actual = handle.status();
        if actual != expected {
            return Err(DebuggerCommandError::InvalidStatus {
                run_id: handle.id(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    pub async fn attach(&self, run_id: Uuid) -> Result<DebuggerState, DebuggerCommandError> {
        let handle = self.handle(run_id)?;
        handle.set_attached(true);
        tracing::debug!(run_id = %run_id, "debugger attached");
        Ok(handle.snapshot().await)
    }

    /// Detach: clears breakpoints and lets a paused run continue, so a
    /// disappearing client cannot strand a run.
    pub async fn detach(&self, run_id: Uuid) -> Result<DebuggerState, DebuggerCommandError> {
        let handle = self.handle(run_id)?;
        handle.set_attached(false);
        handle.set_breakpoints(Vec::new()).await;
        if handle.status() == RunStatus::Paused {
            handle.grant_resume(None).await;
        }
        tracing::debug!(run_id = %run_id, "debugger detached");
        Ok(handle.snapshot().await)
    }

    // -----------------------------------------------------------------------
    // Execution control
    // -----------------------------------------------------------------------

    /// Ask a running run to pause before its next dispatch.
    pub async fn pause(&self, run_id: Uuid) -> Result<DebuggerState, DebuggerCommandError> {
        let handle = self.attached(run_id)?;
        Self::expect_status(&handle, RunStatus::Running)?;
        handle.request_pause();
        Ok(handle.snapshot().await)
    }

    /// Resume a paused run.
    pub async fn resume(&self, run_id: Uuid) -> Result<DebuggerState, DebuggerCommandError> {
        let handle = self.attached(run_id)?;
        Self::expect_status(&handle, RunStatus::Paused)?;
        handle.grant_resume(None).await;
        Ok(handle.snapshot().await)
    }

    /// Resume a paused run for exactly one dispatch, then pause again.
    pub async fn step_over(&self, run_id: Uuid) -> Result<DebuggerState, DebuggerCommandError> {
        let handle = self.attached(run_id)?;
        Self::expect_status(&handle, RunStatus::Paused)?;
        handle.grant_resume(Some(1)).await;
        Ok(handle.snapshot().await)
    }

    // -----------------------------------------------------------------------
    // Breakpoints
    // -----------------------------------------------------------------------

    pub async fn set_breakpoints(
        &self,
        run_id: Uuid,
        node_ids: Vec<String>,
    ) -> Result<DebuggerState, DebuggerCommandError> {
        let handle = self.attached(run_id)?;
        handle.set_breakpoints(node_ids).await;
        Ok(handle.snapshot().await)
    }

    pub async fn add_breakpoint(
        &self,
        run_id: Uuid,
        node_id: String,
    ) -> Result<DebuggerState, DebuggerCommandError> {
        let handle = self.attached(run_id)?;
        handle.add_breakpoint(node_id).await;
        Ok(handle.snapshot().await)
    }

    pub async fn remove_breakpoint(
        &self,
        run_id: Uuid,
        node_id: &str,
    ) -> Result<DebuggerState, DebuggerCommandError> {
        let handle = self.attached(run_id)?;
        handle.remove_breakpoint(node_id).await;
        Ok(handle.snapshot().await)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub async fn get_state(&self, run_id: Uuid) -> Result<DebuggerState, DebuggerCommandError> {
        let handle = self.handle(run_id)?;
        Ok(handle.snapshot().await)
    }

    /// Read a variable from the run's top-level scope, or from one exact
    /// frame when an index is supplied.
    pub async fn get_var(
        &self,
        run_id: Uuid,
        name: &str,
        frame: Option<usize>,
    ) -> Result<Value, DebuggerCommandError> {
        let handle = self.attached(run_id)?;
        handle
            .get_var(name, frame)
            .await
            .ok_or_else(|| DebuggerCommandError::VarNotFound(name.to_string()))
    }

    /// Write a variable into the run's top-level scope, or into one exact
    /// frame when an index is supplied.
    pub async fn set_var(
        &self,
        run_id: Uuid,
        name: impl Into<String>,
        value: Value,
        frame: Option<usize>,
    ) -> Result<DebuggerState, DebuggerCommandError> {
        let handle = self.attached(run_id)?;
        if !handle.set_var(name, value, frame).await {
            return Err(DebuggerCommandError::FrameOutOfRange(frame.unwrap_or(0)));
        }
        Ok(handle.snapshot().await)
    }

    // -----------------------------------------------------------------------
    // Wire adapter
    // -----------------------------------------------------------------------

    /// Execute one wire command, mapping results onto the
    /// `{ok, state?, value?} | {ok: false, error}` response shape.
    pub async fn handle_command(&self, command: DebuggerCommand) -> DebuggerResponse {
        let result = match command {
            DebuggerCommand::Attach { run_id } => self.attach(run_id).await,
            DebuggerCommand::Detach { run_id } => self.detach(run_id).await,
            DebuggerCommand::Pause { run_id } => self.pause(run_id).await,
            DebuggerCommand::Resume { run_id } => self.resume(run_id).await,
            DebuggerCommand::StepOver { run_id } => self.step_over(run_id).await,
            DebuggerCommand::SetBreakpoints { run_id, node_ids } => {
                self.set_breakpoints(run_id, node_ids).await
            }
            DebuggerCommand::AddBreakpoint { run_id, node_id } => {
                self.add_breakpoint(run_id, node_id).await
            }
            DebuggerCommand::RemoveBreakpoint { run_id, node_id } => {
                self.remove_breakpoint(run_id, &node_id).await
            }
            DebuggerCommand::GetState { run_id } => self.get_state(run_id).await,
            DebuggerCommand::GetVar {
                run_id,
                name,
                frame,
            } => {
                return match self.get_var(run_id, &name, frame).await {
                    Ok(value) => DebuggerResponse::ok_value(value),
                    Err(err) => DebuggerResponse::err(err.to_string()),
                };
            }
            DebuggerCommand::SetVar {
                run_id,
                name,
                value,
                frame,
            } => self.set_var(run_id, name, value, frame).await,
        };
        match result {
            Ok(state) => DebuggerResponse::ok_state(state),
            Err(err) => DebuggerResponse::err(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FnHandler, HandlerContext, PluginRegistry};
    use flowdeck_types::event::FlowEvent;
    use flowdeck_types::flow::{Edge, EdgeLabel, Flow, Node};
    use flowdeck_types::handler::HandlerOutcome;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    fn registry_with_gate() -> (PluginRegistry, Arc<Notify>) {
        let registry = PluginRegistry::new();
        registry
            .register(
                "emit",
                Arc::new(FnHandler::new(|ctx: HandlerContext| async move {
                    let mut values = HashMap::new();
                    if let serde_json::Value::Object(map) = ctx.config {
                        for (k, v) in map {
                            values.insert(k, v);
                        }
                    }
                    HandlerOutcome::with_values(values)
                })),
            )
            .unwrap();
        let gate = Arc::new(Notify::new());
        let opened = Arc::clone(&gate);
        registry
            .register(
                "gate",
                Arc::new(FnHandler::new(move |_ctx: HandlerContext| {
                    let opened = Arc::clone(&opened);
                    async move {
                        opened.notified().await;
                        HandlerOutcome::success()
                    }
                })),
            )
            .unwrap();
        (registry, gate)
    }

    fn chain(id: &str, nodes: Vec<Node>) -> Flow {
        let edges = nodes
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                Edge::new(format!("e{i}"), &pair[0].id, &pair[1].id, EdgeLabel::Default)
            })
            .collect();
        Flow {
            id: id.to_string(),
            name: String::new(),
            nodes,
            edges,
            initial_vars: HashMap::new(),
            entry: None,
        }
    }

    /// Engine with a gated 3-node flow, paused deterministically at n2.
    async fn paused_session() -> (DebuggerController, Uuid) {
        let (registry, gate) = registry_with_gate();
        let engine = FlowEngine::new(registry);
        let mut flow = chain(
            "f",
            vec![
                Node::new("n1", "gate", json!({})),
                Node::new("n2", "emit", json!({"a": 1})),
                Node::new("n3", "emit", json!({"b": 2})),
            ],
        );
        flow.initial_vars.insert("x".to_string(), json!(5));
        engine.register_flow(flow).unwrap();

        let mut rx = engine.subscribe();
        let handle = engine.start("f").unwrap();
        let run_id = handle.id();

        let debugger = DebuggerController::new(engine);
        debugger.attach(run_id).await.unwrap();
        debugger
            .set_breakpoints(run_id, vec!["n2".to_string()])
            .await
            .unwrap();
        gate.notify_one();

        loop {
            let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            if matches!(event, FlowEvent::RunPaused { .. }) {
                break;
            }
        }
        (debugger, run_id)
    }

    // -------------------------------------------------------------------
    // Preconditions
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn unknown_run_is_rejected() {
        let (registry, _gate) = registry_with_gate();
        let debugger = DebuggerController::new(FlowEngine::new(registry));
        let ghost = Uuid::now_v7();
        assert_eq!(
            debugger.attach(ghost).await,
            Err(DebuggerCommandError::RunNotFound(ghost))
        );
    }

    #[tokio::test]
    async fn control_requires_attachment() {
        let (registry, gate) = registry_with_gate();
        let engine = FlowEngine::new(registry);
        engine
            .register_flow(chain("f", vec![Node::new("n1", "gate", json!({}))]))
            .unwrap();
        let handle = engine.start("f").unwrap();
        let run_id = handle.id();

        let debugger = DebuggerController::new(engine);
        assert_eq!(
            debugger.pause(run_id).await,
            Err(DebuggerCommandError::NotAttached(run_id))
        );
        assert_eq!(
            debugger.get_var(run_id, "x", None).await,
            Err(DebuggerCommandError::NotAttached(run_id))
        );
        // get_state works without attachment.
        assert!(debugger.get_state(run_id).await.is_ok());

        gate.notify_one();
        handle.wait_terminal().await;
    }

    #[tokio::test]
    async fn resume_requires_paused() {
        let (registry, gate) = registry_with_gate();
        let engine = FlowEngine::new(registry);
        engine
            .register_flow(chain("f", vec![Node::new("n1", "gate", json!({}))]))
            .unwrap();
        let handle = engine.start("f").unwrap();
        let run_id = handle.id();

        let debugger = DebuggerController::new(engine);
        debugger.attach(run_id).await.unwrap();
        // The run is running (or pending), not paused.
        let err = debugger.resume(run_id).await.unwrap_err();
        assert!(matches!(err, DebuggerCommandError::InvalidStatus { .. }));
        let err = debugger.step_over(run_id).await.unwrap_err();
        assert!(matches!(err, DebuggerCommandError::InvalidStatus { .. }));

        gate.notify_one();
        handle.wait_terminal().await;
    }

    // -------------------------------------------------------------------
    // Paused-session operations
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn get_and_set_var_while_paused() {
        let (debugger, run_id) = paused_session().await;

        assert_eq!(debugger.get_var(run_id, "x", None).await, Ok(json!(5)));
        assert_eq!(
            debugger.get_var(run_id, "missing", None).await,
            Err(DebuggerCommandError::VarNotFound("missing".to_string()))
        );

        debugger
            .set_var(run_id, "x", json!(99), None)
            .await
            .unwrap();
        assert_eq!(debugger.get_var(run_id, "x", None).await, Ok(json!(99)));

        assert_eq!(
            debugger
                .set_var(run_id, "x", json!(0), Some(7))
                .await
                .unwrap_err(),
            DebuggerCommandError::FrameOutOfRange(7)
        );

        debugger.resume(run_id).await.unwrap();
    }

    #[tokio::test]
    async fn default_var_addressing_skips_subflow_frames() {
        let (registry, gate) = registry_with_gate();
        let engine = FlowEngine::new(registry);
        engine
            .register_flow(chain("body", vec![Node::new("b1", "emit", json!({}))]))
            .unwrap();
        let mut flow = chain(
            "main",
            vec![
                Node::new("n1", "gate", json!({})),
                Node::new(
                    "loop",
                    "foreach",
                    json!({"items": "items", "itemVar": "item", "flow": "body"}),
                ),
            ],
        );
        flow.initial_vars.insert("items".to_string(), json!([1, 2]));
        engine.register_flow(flow).unwrap();

        let mut rx = engine.subscribe();
        let handle = engine.start("main").unwrap();
        let run_id = handle.id();

        let debugger = DebuggerController::new(engine);
        debugger.attach(run_id).await.unwrap();
        debugger
            .set_breakpoints(run_id, vec!["b1".to_string()])
            .await
            .unwrap();
        gate.notify_one();

        loop {
            let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            if matches!(event, FlowEvent::RunPaused { .. }) {
                break;
            }
        }

        // The loop binding lives in the body frame, not the top-level
        // scope, so the default read misses it.
        assert_eq!(
            debugger.get_var(run_id, "item", None).await,
            Err(DebuggerCommandError::VarNotFound("item".to_string()))
        );
        assert_eq!(
            debugger.get_var(run_id, "item", Some(1)).await,
            Ok(json!(1))
        );
        // Default writes land in the top-level scope, never the body frame.
        debugger
            .set_var(run_id, "patched", json!(true), None)
            .await
            .unwrap();
        assert_eq!(
            debugger.get_var(run_id, "patched", Some(0)).await,
            Ok(json!(true))
        );

        debugger.set_breakpoints(run_id, Vec::new()).await.unwrap();
        debugger.resume(run_id).await.unwrap();
    }

    #[tokio::test]
    async fn state_snapshot_reflects_pause() {
        let (debugger, run_id) = paused_session().await;

        let state = debugger.get_state(run_id).await.unwrap();
        assert!(state.attached);
        assert_eq!(state.status, flowdeck_types::run::RunStatus::Paused);
        assert_eq!(state.current_node, Some("n2".to_string()));
        assert_eq!(state.breakpoints, vec!["n2".to_string()]);

        debugger.resume(run_id).await.unwrap();
    }

    #[tokio::test]
    async fn detach_resumes_paused_run() {
        let (debugger, run_id) = paused_session().await;

        let state = debugger.detach(run_id).await.unwrap();
        assert!(!state.attached);
        assert!(state.breakpoints.is_empty());

        let handle = debugger.engine.run(run_id).unwrap();
        assert_eq!(
            timeout(Duration::from_secs(5), handle.wait_terminal())
                .await
                .unwrap(),
            flowdeck_types::run::RunStatus::Completed
        );
    }

    // -------------------------------------------------------------------
    // Wire adapter
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn handle_command_maps_success_and_error() {
        let (debugger, run_id) = paused_session().await;

        let resp = debugger
            .handle_command(DebuggerCommand::GetVar {
                run_id,
                name: "x".to_string(),
                frame: None,
            })
            .await;
        assert!(resp.ok);
        assert_eq!(resp.value, Some(json!(5)));

        let resp = debugger
            .handle_command(DebuggerCommand::GetState { run_id })
            .await;
        assert!(resp.ok);
        assert_eq!(resp.state.unwrap().current_node, Some("n2".to_string()));

        let resp = debugger
            .handle_command(DebuggerCommand::Pause { run_id })
            .await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("expected Running"));

        let resp = debugger
            .handle_command(DebuggerCommand::Resume { run_id })
            .await;
        assert!(resp.ok);
    }

    #[tokio::test]
    async fn handle_command_unknown_run() {
        let (registry, _gate) = registry_with_gate();
        let debugger = DebuggerController::new(FlowEngine::new(registry));
        let resp = debugger
            .handle_command(DebuggerCommand::GetState {
                run_id: Uuid::now_v7(),
            })
            .await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("not found"));
    }
}
