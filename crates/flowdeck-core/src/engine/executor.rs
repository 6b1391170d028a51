//! The run manager: flow table, run table, and run spawning.
//!
//! `FlowEngine` owns the registered flows, the plugin registry, the event
//! bus, and one `RunHandle` per run. Each run executes on its own spawned
//! task; within a run execution is strictly sequential. Handles outlive
//! completion so state and traces stay inspectable until `discard`.

use std::sync::Arc;

use dashmap::DashMap;
use flowdeck_types::event::FlowEvent;
use flowdeck_types::flow::Flow;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::event::FlowEventBus;
use crate::registry::PluginRegistry;
use crate::validate::{validate_flow, FlowError};

use super::control::RunHandle;
use super::kernel::{KernelError, RunKernel};

/// The engine facade: register flows, start runs, observe events.
///
/// Cloning shares all underlying state.
#[derive(Clone)]
pub struct FlowEngine {
    flows: Arc<DashMap<String, Arc<Flow>>>,
    registry: PluginRegistry,
    bus: FlowEventBus,
    runs: Arc<DashMap<Uuid, Arc<RunHandle>>>,
}

impl FlowEngine {
    pub fn new(registry: PluginRegistry) -> Self {
        Self {
            flows: Arc::new(DashMap::new()),
            registry,
            bus: FlowEventBus::default(),
            runs: Arc::new(DashMap::new()),
        }
    }

    /// Validate and register a flow, replacing any flow with the same id.
    pub fn register_flow(&self, flow: Flow) -> Result<(), FlowError> {
        validate_flow(&flow)?;
        tracing::debug!(flow_id = %flow.id, nodes = flow.nodes.len(), "flow registered");
        self.flows.insert(flow.id.clone(), Arc::new(flow));
        Ok(())
    }

    pub fn flow(&self, flow_id: &str) -> Option<Arc<Flow>> {
        self.flows.get(flow_id).map(|entry| Arc::clone(&entry))
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Subscribe to run and node lifecycle events across all runs.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.bus.subscribe()
    }

    /// Start a run of a registered flow. The kernel executes on its own
    /// task; the returned handle observes and controls it.
    pub fn start(&self, flow_id: &str) -> Result<Arc<RunHandle>, KernelError> {
        let flow = self
            .flows
            .get(flow_id)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| KernelError::FlowNotFound(flow_id.to_string()))?;

        let handle = RunHandle::new(&flow);
        self.runs.insert(handle.id(), Arc::clone(&handle));

        let kernel = RunKernel::new(
            Arc::clone(&self.flows),
            self.registry.clone(),
            self.bus.clone(),
            Arc::clone(&handle),
        );
        tokio::spawn(kernel.run_to_completion(flow));

        Ok(handle)
    }

    pub fn run(&self, run_id: Uuid) -> Option<Arc<RunHandle>> {
        self.runs.get(&run_id).map(|entry| Arc::clone(&entry))
    }

    /// Ids of all known runs, live and finished.
    pub fn run_ids(&self) -> Vec<Uuid> {
        self.runs.iter().map(|entry| *entry.key()).collect()
    }

    /// Cancel a run. Returns false for unknown run ids.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.run(run_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop a run's handle from the table, cancelling it first if it is
    /// still live. Returns false for unknown run ids.
    pub fn discard(&self, run_id: Uuid) -> bool {
        match self.runs.remove(&run_id) {
            Some((_, handle)) => {
                if !handle.status().is_terminal() {
                    handle.cancel();
                }
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("flows", &self.flows.len())
            .field("runs", &self.runs.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
