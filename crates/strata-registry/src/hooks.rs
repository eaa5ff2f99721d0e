//! Lifecycle event bus.
//!
//! The engine and the registry publish events; plug-ins observe them.
//! Handlers run synchronously in registration order against a copy-on-write
//! snapshot, and a failing handler is logged and swallowed: hooks are for
//! side effects, not decisions.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strata_core::Value;

/// Lifecycle events published by the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    BeforeFlow,
    AfterFlow,
    BeforeNode,
    AfterNode,
    OnCacheHit,
    OnCacheMiss,
    OnMethodExecute,
    OnFailure,
    AfterMethodRegistered,
    AfterRegistryRefresh,
}

impl HookEvent {
    pub const ALL: [HookEvent; 10] = [
        HookEvent::BeforeFlow,
        HookEvent::AfterFlow,
        HookEvent::BeforeNode,
        HookEvent::AfterNode,
        HookEvent::OnCacheHit,
        HookEvent::OnCacheMiss,
        HookEvent::OnMethodExecute,
        HookEvent::OnFailure,
        HookEvent::AfterMethodRegistered,
        HookEvent::AfterRegistryRefresh,
    ];
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookEvent::BeforeFlow => "before_flow",
            HookEvent::AfterFlow => "after_flow",
            HookEvent::BeforeNode => "before_node",
            HookEvent::AfterNode => "after_node",
            HookEvent::OnCacheHit => "on_cache_hit",
            HookEvent::OnCacheMiss => "on_cache_miss",
            HookEvent::OnMethodExecute => "on_method_execute",
            HookEvent::OnFailure => "on_failure",
            HookEvent::AfterMethodRegistered => "after_method_registered",
            HookEvent::AfterRegistryRefresh => "after_registry_refresh",
        };
        write!(f, "{}", name)
    }
}

/// Payload delivered to handlers.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub event: HookEvent,
    /// Step name for node-scoped events.
    pub step: Option<String>,
    /// Event-specific data (signature, duration, error text, ...).
    pub data: Value,
}

impl HookContext {
    pub fn flow(event: HookEvent, data: Value) -> Self {
        Self {
            event,
            step: None,
            data,
        }
    }

    pub fn node(event: HookEvent, step: impl Into<String>, data: Value) -> Self {
        Self {
            event,
            step: Some(step.into()),
            data,
        }
    }
}

/// An observer of lifecycle events.
pub trait HookHandler: Send + Sync {
    fn handle(&self, ctx: &HookContext) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

impl<F> HookHandler for FnHandler<F>
where
    F: Fn(&HookContext) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, ctx: &HookContext) -> anyhow::Result<()> {
        (self.0)(ctx)
    }
}

/// Identifier returned by `register`, used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type HandlerList = Vec<(HandlerId, Arc<dyn HookHandler>)>;

/// Event dispatch bus. Handler lists are copy-on-write: `emit` iterates a
/// snapshot, so handlers may (un)register from inside a callback.
pub struct HookBus {
    handlers: RwLock<HashMap<HookEvent, Arc<HandlerList>>>,
    counters: RwLock<HashMap<HookEvent, u64>>,
    next_id: AtomicU64,
}

static GLOBAL: Lazy<Arc<HookBus>> = Lazy::new(|| Arc::new(HookBus::new()));

impl Default for HookBus {
    fn default() -> Self {
        Self::new()
    }
}

impl HookBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide bus shared by registry and engine.
    pub fn global() -> Arc<HookBus> {
        Arc::clone(&GLOBAL)
    }

    pub fn register(&self, event: HookEvent, handler: Arc<dyn HookHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write();
        let list = handlers.entry(event).or_insert_with(|| Arc::new(Vec::new()));
        let mut next = (**list).clone();
        next.push((id, handler));
        *list = Arc::new(next);
        id
    }

    /// Registers a closure handler.
    pub fn register_fn<F>(&self, event: HookEvent, f: F) -> HandlerId
    where
        F: Fn(&HookContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(event, Arc::new(FnHandler(f)))
    }

    /// Removes a handler; true when something was removed.
    pub fn unregister(&self, event: HookEvent, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(&event) {
            let mut next = (**list).clone();
            let before = next.len();
            next.retain(|(hid, _)| *hid != id);
            let removed = next.len() != before;
            *list = Arc::new(next);
            return removed;
        }
        false
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
        self.counters.write().clear();
    }

    /// Number of handlers registered for an event.
    pub fn handler_count(&self, event: HookEvent) -> usize {
        self.handlers
            .read()
            .get(&event)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// How many times an event has been emitted.
    pub fn invocation_count(&self, event: HookEvent) -> u64 {
        self.counters.read().get(&event).copied().unwrap_or(0)
    }

    /// Dispatches an event to every handler. Handler errors and panics are
    /// logged and swallowed.
    pub fn emit(&self, ctx: HookContext) {
        *self.counters.write().entry(ctx.event).or_insert(0) += 1;

        let snapshot = self.handlers.read().get(&ctx.event).cloned();
        let Some(snapshot) = snapshot else { return };

        for (id, handler) in snapshot.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(&ctx)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        target: "strata::hooks",
                        event = %ctx.event,
                        handler = id.0,
                        error = %err,
                        "hook handler failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        target: "strata::hooks",
                        event = %ctx.event,
                        handler = id.0,
                        "hook handler panicked"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = HookBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            bus.register_fn(HookEvent::BeforeNode, move |_| {
                order.lock().push(tag);
                Ok(())
            });
        }
        bus.emit(HookContext::node(HookEvent::BeforeNode, "s", Value::Null));
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn failing_handler_does_not_stop_dispatch() {
        let bus = HookBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.register_fn(HookEvent::OnFailure, |_| anyhow::bail!("boom"));
        bus.register_fn(HookEvent::OnFailure, |_| panic!("worse"));
        {
            let hits = Arc::clone(&hits);
            bus.register_fn(HookEvent::OnFailure, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        bus.emit(HookContext::flow(HookEvent::OnFailure, Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.invocation_count(HookEvent::OnFailure), 1);
    }

    #[test]
    fn unregister_removes_handler() {
        let bus = HookBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = {
            let hits = Arc::clone(&hits);
            bus.register_fn(HookEvent::AfterFlow, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        assert!(bus.unregister(HookEvent::AfterFlow, id));
        assert!(!bus.unregister(HookEvent::AfterFlow, id));
        bus.emit(HookContext::flow(HookEvent::AfterFlow, Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count(HookEvent::AfterFlow), 0);
    }

    #[test]
    fn counters_track_emissions_without_handlers() {
        let bus = HookBus::new();
        bus.emit(HookContext::flow(HookEvent::BeforeFlow, Value::Null));
        bus.emit(HookContext::flow(HookEvent::BeforeFlow, Value::Null));
        assert_eq!(bus.invocation_count(HookEvent::BeforeFlow), 2);
        assert_eq!(bus.invocation_count(HookEvent::AfterFlow), 0);
    }
}
