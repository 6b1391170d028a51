//! The run kernel: a strictly sequential graph walker.
//!
//! One kernel per run, driving exactly one node dispatch at a time.
//! Before every dispatch it runs the atomic pre-dispatch check, in order:
//! cancellation, explicit pause request, exhausted step budget, breakpoint
//! membership. Control-flow kinds (`if`, `foreach`, `while`,
//! `loopElements`, `executeFlow`) are interpreted here; everything else is
//! dispatched through the plugin registry. Subflows execute on the same
//! kernel, scope stack, and event bus, so breakpoints and pause work at
//! any depth.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flowdeck_types::event::FlowEvent;
use flowdeck_types::flow::{
    BuiltinKind, EdgeLabel, ExecuteFlowConfig, ExhaustedPolicy, FailurePolicy, Flow,
    ForeachConfig, IfConfig, LoopElementsConfig, Node, WhileConfig,
};
use flowdeck_types::handler::{ErrorInfo, HandlerOutcome};
use flowdeck_types::run::{NodeOutcome, RunStatus, TraceEntry};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::event::FlowEventBus;
use crate::expr::evaluate_condition;
use crate::registry::{HandlerContext, PluginRegistry};

use super::control::RunHandle;

/// Hard cap on subflow nesting.
pub const MAX_SUBFLOW_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// KernelError
// ---------------------------------------------------------------------------

/// Terminal errors a run can fail with.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    /// A node's handler reported failure and its policy said stop.
    #[error("node '{node_id}' failed: {error}")]
    Handler { node_id: String, error: ErrorInfo },

    /// A `while` body ran its full iteration budget with the condition
    /// still true.
    #[error("node '{node_id}' exceeded loop limit of {limit} iterations")]
    LoopLimitExceeded { node_id: String, limit: u32 },

    /// A node kind with no registered handler. Fatal, never retried.
    #[error("node '{node_id}' has unknown kind '{kind}'")]
    UnknownKind { node_id: String, kind: String },

    /// A built-in node whose config does not deserialize.
    #[error("node '{node_id}' has invalid config: {message}")]
    InvalidConfig { node_id: String, message: String },

    /// A referenced flow id is not registered.
    #[error("flow '{0}' not found")]
    FlowNotFound(String),

    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,
}

/// Outcome of one dispatch after the failure policy has been applied.
struct StepResult {
    label: EdgeLabel,
    outcome: NodeOutcome,
}

/// Outcome of a single execution attempt, before the failure policy.
enum OnceError {
    /// Handler-level failure; the node's policy decides.
    Failed(ErrorInfo),
    /// Failure that bypasses the policy entirely.
    Fatal(KernelError),
}

// ---------------------------------------------------------------------------
// RunKernel
// ---------------------------------------------------------------------------

pub(crate) struct RunKernel {
    flows: Arc<DashMap<String, Arc<Flow>>>,
    registry: PluginRegistry,
    bus: FlowEventBus,
    handle: Arc<RunHandle>,
}

impl RunKernel {
    pub(crate) fn new(
        flows: Arc<DashMap<String, Arc<Flow>>>,
        registry: PluginRegistry,
        bus: FlowEventBus,
        handle: Arc<RunHandle>,
    ) -> Self {
        Self {
            flows,
            registry,
            bus,
            handle,
        }
    }

    /// Drive the run to a terminal status, emitting the matching event.
    pub(crate) async fn run_to_completion(self, flow: Arc<Flow>) {
        let run_id = self.handle.id();
        self.handle.set_status(RunStatus::Running);
        tracing::info!(run_id = %run_id, flow_id = %flow.id, "run started");

        match self.exec_frame(&flow, 0).await {
            Ok(()) => {
                self.handle.set_status(RunStatus::Completed);
                self.bus.publish(FlowEvent::RunCompleted { run_id });
                tracing::info!(run_id = %run_id, "run completed");
            }
            Err(KernelError::Cancelled) => {
                self.handle.set_status(RunStatus::Cancelled);
                self.bus.publish(FlowEvent::RunCancelled { run_id });
                tracing::info!(run_id = %run_id, "run cancelled");
            }
            Err(err) => {
                self.handle.set_error(err.to_string()).await;
                self.handle.set_status(RunStatus::Failed);
                self.bus.publish(FlowEvent::RunFailed {
                    run_id,
                    error: err.to_string(),
                });
                tracing::warn!(run_id = %run_id, error = %err, "run failed");
            }
        }
    }

    /// Walk one flow (the root flow or a subflow body) to completion.
    fn exec_frame<'a>(
        &'a self,
        flow: &'a Flow,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), KernelError>> {
        async move {
            let run_id = self.handle.id();
            let mut current = flow.entry_node().map(|n| n.id.clone());

            while let Some(node_id) = current {
                let node = match flow.node(&node_id) {
                    Some(node) => node,
                    // Dangling edge target; validation rejects these at
                    // registration, so treat it as frame completion.
                    None => break,
                };

                self.handle.set_current_node(Some(node_id.clone())).await;
                self.pre_dispatch(&node_id).await?;

                self.bus.publish(FlowEvent::NodeStarted {
                    run_id,
                    node_id: node_id.clone(),
                });
                tracing::debug!(
                    run_id = %run_id,
                    node_id = %node_id,
                    kind = %node.kind,
                    depth,
                    "dispatching node"
                );

                match self.dispatch(node, depth).await {
                    Ok(step) => {
                        match &step.outcome {
                            NodeOutcome::Completed => {
                                self.handle
                                    .push_trace(TraceEntry::completed(&node_id))
                                    .await;
                                self.bus.publish(FlowEvent::NodeCompleted {
                                    run_id,
                                    node_id: node_id.clone(),
                                });
                            }
                            NodeOutcome::Failed { error } => {
                                // Failed but the policy said keep going.
                                self.handle
                                    .push_trace(TraceEntry::failed(&node_id, error))
                                    .await;
                                self.bus.publish(FlowEvent::NodeFailed {
                                    run_id,
                                    node_id: node_id.clone(),
                                    error: error.clone(),
                                });
                            }
                        }
                        current = flow
                            .outgoing(&node_id, step.label)
                            .map(|edge| edge.to.clone());
                    }
                    Err(KernelError::Cancelled) => return Err(KernelError::Cancelled),
                    Err(err) => {
                        self.handle
                            .push_trace(TraceEntry::failed(&node_id, err.to_string()))
                            .await;
                        self.bus.publish(FlowEvent::NodeFailed {
                            run_id,
                            node_id: node_id.clone(),
                            error: err.to_string(),
                        });
                        return Err(err);
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// The atomic pre-dispatch check. Pauses here block until a resume is
    /// granted; cancellation wins from any state.
    async fn pre_dispatch(&self, node_id: &str) -> Result<(), KernelError> {
        if self.handle.cancel_token().is_cancelled() {
            return Err(KernelError::Cancelled);
        }

        let should_pause = self.handle.take_pause_request()
            || self.handle.step_budget_exhausted().await
            || self.handle.has_breakpoint(node_id).await;

        if should_pause {
            let run_id = self.handle.id();
            self.handle.set_status(RunStatus::Paused);
            self.bus.publish(FlowEvent::RunPaused {
                run_id,
                node_id: node_id.to_string(),
            });
            tracing::info!(run_id = %run_id, node_id = %node_id, "run paused");

            self.handle.wait_resume().await?;

            self.handle.set_status(RunStatus::Running);
            self.bus.publish(FlowEvent::RunResumed { run_id });
            tracing::info!(run_id = %run_id, node_id = %node_id, "run resumed");
        }

        self.handle.consume_step().await;
        Ok(())
    }

    /// Execute one node, applying its failure policy around attempts.
    async fn dispatch(&self, node: &Node, depth: usize) -> Result<StepResult, KernelError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match self.execute_once(node, depth).await {
                Ok(label) => {
                    return Ok(StepResult {
                        label,
                        outcome: NodeOutcome::Completed,
                    });
                }
                Err(OnceError::Fatal(err)) => return Err(err),
                Err(OnceError::Failed(error)) => error,
            };

            match &node.on_failure {
                FailurePolicy::Stop => {
                    return Err(KernelError::Handler {
                        node_id: node.id.clone(),
                        error,
                    });
                }
                FailurePolicy::Continue => {
                    tracing::warn!(
                        run_id = %self.handle.id(),
                        node_id = %node.id,
                        error = %error,
                        "node failed, continuing per policy"
                    );
                    return Ok(StepResult {
                        label: success_label(node),
                        outcome: NodeOutcome::Failed {
                            error: error.to_string(),
                        },
                    });
                }
                FailurePolicy::Retry {
                    max_attempts,
                    backoff_ms,
                    on_exhausted,
                } => {
                    if attempt < *max_attempts {
                        tracing::warn!(
                            run_id = %self.handle.id(),
                            node_id = %node.id,
                            attempt,
                            max_attempts,
                            error = %error,
                            "node failed, retrying after backoff"
                        );
                        if *backoff_ms > 0 {
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_millis(*backoff_ms)) => {}
                                _ = self.handle.cancel_token().cancelled() => {
                                    return Err(KernelError::Cancelled);
                                }
                            }
                        }
                        continue;
                    }
                    match on_exhausted {
                        ExhaustedPolicy::Stop => {
                            return Err(KernelError::Handler {
                                node_id: node.id.clone(),
                                error,
                            });
                        }
                        ExhaustedPolicy::Continue => {
                            tracing::warn!(
                                run_id = %self.handle.id(),
                                node_id = %node.id,
                                attempts = attempt,
                                error = %error,
                                "retries exhausted, continuing per policy"
                            );
                            return Ok(StepResult {
                                label: success_label(node),
                                outcome: NodeOutcome::Failed {
                                    error: error.to_string(),
                                },
                            });
                        }
                    }
                }
            }
        }
    }

    /// One execution attempt, by kind.
    async fn execute_once(&self, node: &Node, depth: usize) -> Result<EdgeLabel, OnceError> {
        match BuiltinKind::from_kind(&node.kind) {
            None => self.run_handler(node).await,
            Some(BuiltinKind::If) => {
                let cfg: IfConfig = parse_config(node)?;
                let scope = self.handle.scope_snapshot().await;
                let met = evaluate_condition(&cfg.condition, &scope);
                tracing::debug!(
                    run_id = %self.handle.id(),
                    node_id = %node.id,
                    condition = %cfg.condition,
                    result = met,
                    "branch condition evaluated"
                );
                Ok(if met { EdgeLabel::True } else { EdgeLabel::False })
            }
            Some(BuiltinKind::Foreach) => {
                let cfg: ForeachConfig = parse_config(node)?;
                let items = { self.handle.scope().await.get(&cfg.items).cloned() };
                let items = match items {
                    Some(Value::Array(items)) => items,
                    _ => {
                        tracing::warn!(
                            run_id = %self.handle.id(),
                            node_id = %node.id,
                            var = %cfg.items,
                            "foreach variable missing or not an array, iterating zero times"
                        );
                        return Ok(EdgeLabel::LoopExit);
                    }
                };
                for item in items {
                    self.exec_subflow(
                        node,
                        &cfg.flow,
                        HashMap::from([(cfg.item_var.clone(), item)]),
                        false,
                        depth,
                    )
                    .await?;
                }
                Ok(EdgeLabel::LoopExit)
            }
            Some(BuiltinKind::LoopElements) => {
                let cfg: LoopElementsConfig = parse_config(node)?;
                let provider = self.registry.element_provider().ok_or_else(|| {
                    OnceError::Failed(ErrorInfo::new(
                        "no_element_provider",
                        "loopElements requires an element provider",
                    ))
                })?;
                let mut elements = provider.enumerate(
                    cfg.selector.clone(),
                    self.handle.cancel_token().child_token(),
                );
                while let Some(item) = elements.next().await {
                    self.exec_subflow(
                        node,
                        &cfg.flow,
                        HashMap::from([(cfg.item_var.clone(), item)]),
                        false,
                        depth,
                    )
                    .await?;
                }
                Ok(EdgeLabel::LoopExit)
            }
            Some(BuiltinKind::While) => {
                let cfg: WhileConfig = parse_config(node)?;
                let mut iterations: u32 = 0;
                loop {
                    let scope = self.handle.scope_snapshot().await;
                    if !evaluate_condition(&cfg.condition, &scope) {
                        break;
                    }
                    if iterations >= cfg.max_iterations {
                        return Err(OnceError::Fatal(KernelError::LoopLimitExceeded {
                            node_id: node.id.clone(),
                            limit: cfg.max_iterations,
                        }));
                    }
                    self.exec_subflow(node, &cfg.flow, HashMap::new(), false, depth)
                        .await?;
                    iterations += 1;
                }
                Ok(EdgeLabel::LoopExit)
            }
            Some(BuiltinKind::ExecuteFlow) => {
                let cfg: ExecuteFlowConfig = parse_config(node)?;
                if cfg.inline {
                    self.exec_subflow(node, &cfg.flow, HashMap::new(), false, depth)
                        .await?;
                } else {
                    let produced = self
                        .exec_subflow(node, &cfg.flow, HashMap::new(), true, depth)
                        .await?;
                    let mut scope = self.handle.scope().await;
                    for name in &cfg.returns {
                        if let Some(value) = produced.get(name) {
                            scope.set(name.clone(), value.clone());
                        }
                    }
                }
                Ok(EdgeLabel::Default)
            }
        }
    }

    /// Dispatch a primitive node through its registered handler.
    async fn run_handler(&self, node: &Node) -> Result<EdgeLabel, OnceError> {
        let handler = self.registry.get(&node.kind).ok_or_else(|| {
            OnceError::Fatal(KernelError::UnknownKind {
                node_id: node.id.clone(),
                kind: node.kind.clone(),
            })
        })?;

        let ctx = HandlerContext {
            run_id: self.handle.id(),
            node_id: node.id.clone(),
            config: node.config.clone(),
            vars: self.handle.scope_snapshot().await,
            cancel: self.handle.cancel_token().child_token(),
        };

        // Await settlement even if cancellation fires mid-flight; the
        // handler observes the child token and winds down on its own.
        match handler.execute(ctx).await {
            HandlerOutcome::Success { values } => {
                let mut scope = self.handle.scope().await;
                for (name, value) in values {
                    scope.set(name, value);
                }
                Ok(EdgeLabel::Default)
            }
            HandlerOutcome::Failure { error } => Err(OnceError::Failed(error)),
        }
    }

    /// Execute a referenced subflow in a new scope frame on the shared
    /// kernel. Returns the frame's final bindings (used for isolated
    /// `returns` copy-back).
    async fn exec_subflow(
        &self,
        invoker: &Node,
        flow_id: &str,
        bindings: HashMap<String, Value>,
        barrier: bool,
        depth: usize,
    ) -> Result<HashMap<String, Value>, OnceError> {
        if depth >= MAX_SUBFLOW_DEPTH {
            return Err(OnceError::Failed(ErrorInfo::new(
                "subflow_depth_exceeded",
                format!("subflow nesting exceeds {MAX_SUBFLOW_DEPTH}"),
            )));
        }
        let subflow = self
            .flows
            .get(flow_id)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| {
                OnceError::Fatal(KernelError::FlowNotFound(flow_id.to_string()))
            })?;

        // Frame is seeded with the subflow's initial vars; explicit
        // bindings (the loop item) win on collision.
        let mut seeded = subflow.initial_vars.clone();
        seeded.extend(bindings);
        {
            let mut scope = self.handle.scope().await;
            if barrier {
                scope.push_barrier(seeded);
            } else {
                scope.push(seeded);
            }
        }

        let result = self.exec_frame(&subflow, depth + 1).await;
        let produced = { self.handle.scope().await.pop().unwrap_or_default() };

        match result {
            Ok(()) => Ok(produced),
            Err(KernelError::Cancelled) => Err(OnceError::Fatal(KernelError::Cancelled)),
            Err(err) => {
                tracing::debug!(
                    run_id = %self.handle.id(),
                    node_id = %invoker.id,
                    subflow = %flow_id,
                    error = %err,
                    "subflow failed, surfacing to invoking node"
                );
                Err(OnceError::Failed(ErrorInfo::new(
                    "subflow_failed",
                    err.to_string(),
                )))
            }
        }
    }
}

/// The edge a node follows when it completes (or when its policy says
/// continue past a failure).
fn success_label(node: &Node) -> EdgeLabel {
    match BuiltinKind::from_kind(&node.kind) {
        Some(BuiltinKind::Foreach)
        | Some(BuiltinKind::LoopElements)
        | Some(BuiltinKind::While) => EdgeLabel::LoopExit,
        _ => EdgeLabel::Default,
    }
}

/// Deserialize a built-in node's config, surfacing failures as
/// `InvalidConfig`.
fn parse_config<T: DeserializeOwned>(node: &Node) -> Result<T, OnceError> {
    serde_json::from_value(node.config.clone()).map_err(|err| {
        OnceError::Fatal(KernelError::InvalidConfig {
            node_id: node.id.clone(),
            message: err.to_string(),
        })
    })
}
