//! Plugin registry mapping node kinds to handlers.
//!
//! Every non-control-flow node kind (click, type, navigate, fetch, ...) is
//! executed by a registered `NodeHandler`. Control-flow kinds are
//! interpreted by the kernel itself and can never be registered. Handlers
//! never fail at the Rust level: every outcome, including crashes on the
//! handler's side, is reported as a `HandlerOutcome`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use flowdeck_types::flow::BuiltinKind;
use flowdeck_types::handler::HandlerOutcome;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Everything a handler gets for one dispatch.
///
/// `vars` is a read-only snapshot of the scope visible at the node; writes
/// happen only through the returned `HandlerOutcome`. The cancellation
/// token is a child of the run's token, so a cancelled run interrupts
/// in-flight handlers that choose to observe it.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub run_id: Uuid,
    pub node_id: String,
    pub config: Value,
    pub vars: HashMap<String, Value>,
    pub cancel: CancellationToken,
}

// ---------------------------------------------------------------------------
// NodeHandler
// ---------------------------------------------------------------------------

/// An executor for one node kind.
///
/// Implementations live outside the engine (browser drivers, HTTP
/// clients, test doubles). The contract is total: a handler reports
/// failure through `HandlerOutcome::Failure`, never by panicking.
pub trait NodeHandler: Send + Sync {
    fn execute(&self, ctx: HandlerContext) -> BoxFuture<'static, HandlerOutcome>;
}

/// Adapter turning an async closure into a `NodeHandler`.
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> NodeHandler for FnHandler<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    fn execute(&self, ctx: HandlerContext) -> BoxFuture<'static, HandlerOutcome> {
        (self.f)(ctx).boxed()
    }
}

// ---------------------------------------------------------------------------
// ElementProvider
// ---------------------------------------------------------------------------

/// Enumerates a `loopElements` selector as a lazy, finite stream of items.
///
/// In production this queries the live page between iterations; tests plug
/// in a fixed list. The cancellation token lets a provider abandon an
/// expensive enumeration when the run is cancelled.
pub trait ElementProvider: Send + Sync {
    fn enumerate(
        &self,
        selector: String,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Value>;
}

/// Adapter turning a plain closure producing a batch into an
/// `ElementProvider`.
pub struct FnElementProvider<F> {
    f: F,
}

impl<F> FnElementProvider<F>
where
    F: Fn(String) -> Vec<Value> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ElementProvider for FnElementProvider<F>
where
    F: Fn(String) -> Vec<Value> + Send + Sync,
{
    fn enumerate(
        &self,
        selector: String,
        _cancel: CancellationToken,
    ) -> BoxStream<'static, Value> {
        futures_util::stream::iter((self.f)(selector)).boxed()
    }
}

// ---------------------------------------------------------------------------
// PluginRegistry
// ---------------------------------------------------------------------------

/// Errors from handler registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Control-flow kinds belong to the kernel.
    #[error("kind '{0}' is a control-flow kind and cannot be registered")]
    ReservedKind(String),
}

/// Concurrent map from node kind to handler.
///
/// Cloning the registry shares the underlying maps, so handlers registered
/// after engine start are visible to running flows.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    handlers: Arc<DashMap<String, Arc<dyn NodeHandler>>>,
    element_provider: Arc<RwLock<Option<Arc<dyn ElementProvider>>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a node kind, replacing any previous one.
    pub fn register(
        &self,
        kind: impl Into<String>,
        handler: Arc<dyn NodeHandler>,
    ) -> Result<(), RegistryError> {
        let kind = kind.into();
        if BuiltinKind::from_kind(&kind).is_some() {
            return Err(RegistryError::ReservedKind(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Look up the handler for a kind.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(kind).map(|entry| Arc::clone(&entry))
    }

    /// Whether a kind has a handler.
    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// All registered kinds, unordered.
    pub fn kinds(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    /// Install the element provider used by `loopElements` nodes.
    pub fn set_element_provider(&self, provider: Arc<dyn ElementProvider>) {
        if let Ok(mut slot) = self.element_provider.write() {
            *slot = Some(provider);
        }
    }

    pub fn element_provider(&self) -> Option<Arc<dyn ElementProvider>> {
        self.element_provider.read().ok().and_then(|slot| slot.clone())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("kinds", &self.handlers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_handler() -> Arc<dyn NodeHandler> {
        Arc::new(FnHandler::new(|_ctx| async { HandlerOutcome::success() }))
    }

    fn ctx(config: Value) -> HandlerContext {
        HandlerContext {
            run_id: Uuid::now_v7(),
            node_id: "n1".to_string(),
            config,
            vars: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn register_and_dispatch() {
        let registry = PluginRegistry::new();
        registry
            .register(
                "click",
                Arc::new(FnHandler::new(|ctx: HandlerContext| async move {
                    HandlerOutcome::with_values(HashMap::from([(
                        "clicked".to_string(),
                        ctx.config["selector"].clone(),
                    )]))
                })),
            )
            .unwrap();

        let handler = registry.get("click").unwrap();
        let outcome = handler
            .execute(ctx(json!({"selector": "#submit"})))
            .await;
        match outcome {
            HandlerOutcome::Success { values } => {
                assert_eq!(values["clicked"], json!("#submit"));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn control_flow_kinds_are_reserved() {
        let registry = PluginRegistry::new();
        for kind in ["if", "foreach", "while", "loopElements", "executeFlow"] {
            assert!(matches!(
                registry.register(kind, noop_handler()),
                Err(RegistryError::ReservedKind(_))
            ));
        }
    }

    #[test]
    fn unknown_kind_is_none() {
        let registry = PluginRegistry::new();
        assert!(registry.get("hover").is_none());
        assert!(!registry.contains("hover"));
    }

    #[test]
    fn re_register_replaces() {
        let registry = PluginRegistry::new();
        registry.register("click", noop_handler()).unwrap();
        registry.register("click", noop_handler()).unwrap();
        assert_eq!(registry.kinds(), vec!["click".to_string()]);
    }

    #[tokio::test]
    async fn element_provider_streams_items() {
        let registry = PluginRegistry::new();
        assert!(registry.element_provider().is_none());

        registry.set_element_provider(Arc::new(FnElementProvider::new(
            |selector: String| {
                vec![json!({"selector": selector, "index": 0}), json!({"selector": selector, "index": 1})]
            },
        )));

        let provider = registry.element_provider().unwrap();
        let items: Vec<Value> = provider
            .enumerate(".row".to_string(), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["selector"], ".row");
        assert_eq!(items[1]["index"], 1);
    }
}
