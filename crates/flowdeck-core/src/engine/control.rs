//! Live run state and the pause/resume protocol.
//!
//! One `RunHandle` per run, shared between the kernel task and the
//! debugger. The kernel is the only writer of status and trace; the
//! debugger flips control flags (pause request, resume grant, step budget,
//! breakpoints) and the kernel observes them at well-defined points.
//! Locks are never held across an await.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowdeck_types::debug::DebuggerState;
use flowdeck_types::flow::Flow;
use flowdeck_types::run::{RunStatus, TraceEntry};
use serde_json::Value;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::scope::ScopeStack;
use super::KernelError;

/// Shared state of one run.
pub struct RunHandle {
    id: Uuid,
    flow_id: String,
    started_at: DateTime<Utc>,
    status: watch::Sender<RunStatus>,
    current_node: RwLock<Option<String>>,
    breakpoints: RwLock<HashSet<String>>,
    attached: AtomicBool,
    pause_requested: AtomicBool,
    resume_granted: AtomicBool,
    step_budget: Mutex<Option<u32>>,
    resume: Notify,
    cancel: CancellationToken,
    scope: Mutex<ScopeStack>,
    trace: Mutex<Vec<TraceEntry>>,
    error: RwLock<Option<String>>,
}

impl RunHandle {
    /// Create the handle for a fresh run of `flow`, seeded with the flow's
    /// initial variables.
    pub fn new(flow: &Flow) -> Arc<Self> {
        let (status, _) = watch::channel(RunStatus::Pending);
        Arc::new(Self {
            id: Uuid::now_v7(),
            flow_id: flow.id.clone(),
            started_at: Utc::now(),
            status,
            current_node: RwLock::new(None),
            breakpoints: RwLock::new(HashSet::new()),
            attached: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            resume_granted: AtomicBool::new(false),
            step_budget: Mutex::new(None),
            resume: Notify::new(),
            cancel: CancellationToken::new(),
            scope: Mutex::new(ScopeStack::new(flow.initial_vars.clone())),
            trace: Mutex::new(Vec::new()),
            error: RwLock::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub(crate) fn set_status(&self, status: RunStatus) {
        self.status.send_replace(status);
    }

    /// Wait until the run reaches a terminal status, returning it.
    pub async fn wait_terminal(&self) -> RunStatus {
        let mut rx = self.status.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            // The sender lives in self, so the channel cannot close here.
            if rx.changed().await.is_err() {
                return status;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cancellation. The kernel observes this before the next
    /// dispatch and while paused; in-flight handlers see a child token.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    // -----------------------------------------------------------------------
    // Debugger attachment and control flags
    // -----------------------------------------------------------------------

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub(crate) fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    /// Ask the kernel to pause before the next dispatch.
    pub(crate) fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending pause request, if any.
    pub(crate) fn take_pause_request(&self) -> bool {
        self.pause_requested.swap(false, Ordering::SeqCst)
    }

    /// Let a paused kernel proceed. `step_budget` of `Some(1)` is a
    /// step-over: the kernel dispatches one node and pauses again.
    pub(crate) async fn grant_resume(&self, step_budget: Option<u32>) {
        *self.step_budget.lock().await = step_budget;
        self.resume_granted.store(true, Ordering::SeqCst);
        self.resume.notify_one();
    }

    /// Block until a resume is granted or the run is cancelled.
    pub(crate) async fn wait_resume(&self) -> Result<(), KernelError> {
        loop {
            let notified = self.resume.notified();
            if self.resume_granted.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            tokio::select! {
                _ = notified => {}
                _ = self.cancel.cancelled() => return Err(KernelError::Cancelled),
            }
        }
    }

    /// True when a step-over budget has run out. Clears the budget so the
    /// next resume starts clean.
    pub(crate) async fn step_budget_exhausted(&self) -> bool {
        let mut budget = self.step_budget.lock().await;
        if *budget == Some(0) {
            *budget = None;
            true
        } else {
            false
        }
    }

    /// Spend one step of the budget when a dispatch proceeds.
    pub(crate) async fn consume_step(&self) {
        let mut budget = self.step_budget.lock().await;
        if let Some(n) = *budget {
            *budget = Some(n.saturating_sub(1));
        }
    }

    // -----------------------------------------------------------------------
    // Breakpoints
    // -----------------------------------------------------------------------

    pub async fn has_breakpoint(&self, node_id: &str) -> bool {
        self.breakpoints.read().await.contains(node_id)
    }

    pub(crate) async fn set_breakpoints(&self, node_ids: Vec<String>) {
        *self.breakpoints.write().await = node_ids.into_iter().collect();
    }

    pub(crate) async fn add_breakpoint(&self, node_id: String) {
        self.breakpoints.write().await.insert(node_id);
    }

    pub(crate) async fn remove_breakpoint(&self, node_id: &str) {
        self.breakpoints.write().await.remove(node_id);
    }

    // -----------------------------------------------------------------------
    // Position, scope, trace
    // -----------------------------------------------------------------------

    pub async fn current_node(&self) -> Option<String> {
        self.current_node.read().await.clone()
    }

    pub(crate) async fn set_current_node(&self, node_id: Option<String>) {
        *self.current_node.write().await = node_id;
    }

    /// Lock the scope stack for a short, await-free critical section.
    pub(crate) async fn scope(&self) -> tokio::sync::MutexGuard<'_, ScopeStack> {
        self.scope.lock().await
    }

    /// Flattened snapshot of the visible scope.
    pub async fn scope_snapshot(&self) -> std::collections::HashMap<String, Value> {
        self.scope.lock().await.flatten()
    }

    /// Read a variable from the run's top-level scope, or from one exact
    /// frame when an index is given. Subflow frames are never consulted
    /// implicitly.
    pub async fn get_var(&self, name: &str, frame: Option<usize>) -> Option<Value> {
        let scope = self.scope.lock().await;
        scope.get_in_frame(frame.unwrap_or(0), name).cloned()
    }

    /// Write a variable into the run's top-level scope, or into one exact
    /// frame when an index is given. Returns false if the frame index is
    /// out of range.
    pub async fn set_var(&self, name: impl Into<String>, value: Value, frame: Option<usize>) -> bool {
        let mut scope = self.scope.lock().await;
        scope.set_in_frame(frame.unwrap_or(0), name, value)
    }

    pub(crate) async fn push_trace(&self, entry: TraceEntry) {
        self.trace.lock().await.push(entry);
    }

    /// Copy of the append-only trace.
    pub async fn trace(&self) -> Vec<TraceEntry> {
        self.trace.lock().await.clone()
    }

    pub(crate) async fn set_error(&self, error: String) {
        *self.error.write().await = Some(error);
    }

    /// Terminal error message, once the run has failed.
    pub async fn error(&self) -> Option<String> {
        self.error.read().await.clone()
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    /// Build the protocol-facing snapshot of this run.
    pub async fn snapshot(&self) -> DebuggerState {
        let mut breakpoints: Vec<String> =
            self.breakpoints.read().await.iter().cloned().collect();
        breakpoints.sort();
        DebuggerState {
            run_id: self.id,
            attached: self.is_attached(),
            status: self.status(),
            current_node: self.current_node().await,
            breakpoints,
        }
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.id)
            .field("flow_id", &self.flow_id)
            .field("status", &self.status())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
