//! Late-binding method handles.
//!
//! Configuration finishes before every plug-in has registered, so node
//! configs carry handles instead of resolved implementations. A handle
//! captures intent (component, method, engine preference) and defers the
//! choice to execution time. Signature prediction runs the same selection
//! rule without committing the cache, which keeps cache keys stable against
//! transient registry states.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use strata_core::{strata_registry, EnginePref};

use crate::error::RegistryError;
use crate::registration::{ImplementationInfo, MethodArgs, Registration};
use crate::registry::Registry;
use crate::strategy::{DefaultStrategy, Strategy};

/// Handle tuning knobs.
#[derive(Clone, Debug)]
pub struct HandleOptions {
    /// Soft TTL for a cached resolution.
    pub resolve_ttl: Duration,
    /// Allow `resolve` to reuse a recent prediction (and `predict` to reuse
    /// a fresh resolution) within `resolve_ttl / 5`.
    pub predict_fastpath: bool,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            resolve_ttl: Duration::from_secs(5),
            predict_fastpath: true,
        }
    }
}

/// Why a resolution chose what it chose; surfaced by `explain()`.
#[derive(Clone, Debug, Serialize)]
pub struct ResolveExplain {
    pub component: String,
    pub method: String,
    pub strategy: &'static str,
    pub candidates: Vec<ImplementationInfo>,
    pub selected: Option<ImplementationInfo>,
    pub reason: String,
}

#[derive(Clone)]
struct CachedChoice {
    info: ImplementationInfo,
    at: Instant,
}

#[derive(Default)]
struct HandleState {
    resolved: Option<CachedChoice>,
    last_prediction: Option<CachedChoice>,
    explain: Option<ResolveExplain>,
}

/// A deferred method binding for one step's chain entry.
///
/// Cheap to construct; nothing touches the registry until `resolve` or
/// `predict_signature`. Safe to share across node tasks: the cache sits
/// behind a mutex, so at most one selection runs per handle at a time.
pub struct MethodHandle {
    component: String,
    method: String,
    prefer: EnginePref,
    opts: HandleOptions,
    state: Mutex<HandleState>,
}

impl MethodHandle {
    pub fn new(
        component: impl Into<String>,
        method: impl Into<String>,
        prefer: EnginePref,
    ) -> Self {
        Self::with_options(component, method, prefer, HandleOptions::default())
    }

    pub fn with_options(
        component: impl Into<String>,
        method: impl Into<String>,
        prefer: EnginePref,
        opts: HandleOptions,
    ) -> Self {
        Self {
            component: component.into(),
            method: method.into(),
            prefer,
            opts,
            state: Mutex::new(HandleState::default()),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn prefer(&self) -> &EnginePref {
        &self.prefer
    }

    /// `component.method@{fixed:engine | auto:engine | unresolved}`.
    pub fn identity(&self) -> String {
        let base = format!("{}.{}", self.component, self.method);
        match &self.prefer {
            EnginePref::Fixed(engine) => format!("{}@fixed:{}", base, engine),
            EnginePref::Auto => match &self.state.lock().resolved {
                Some(cached) => format!("{}@auto:{}", base, cached.info.engine),
                None => format!("{}@unresolved", base),
            },
        }
    }

    /// Resolves the implementation, caching the choice for the TTL.
    ///
    /// Fixed-engine handles short-circuit to their pinned engine. Auto
    /// handles run the default strategy; a cache younger than the TTL is
    /// authoritative, and with the fast path enabled a prediction younger
    /// than TTL/5 is promoted instead of re-selecting.
    pub fn resolve(&self, registry: &Registry) -> Result<ImplementationInfo, RegistryError> {
        let mut state = self.state.lock();

        if let EnginePref::Fixed(engine) = &self.prefer {
            let info = self.fixed_info(registry, engine)?;
            state.explain = Some(ResolveExplain {
                component: self.component.clone(),
                method: self.method.clone(),
                strategy: "fixed",
                candidates: Vec::new(),
                selected: Some(info.clone()),
                reason: "fixed_engine".to_string(),
            });
            state.resolved = Some(CachedChoice {
                info: info.clone(),
                at: Instant::now(),
            });
            return Ok(info);
        }

        if let Some(cached) = &state.resolved {
            if cached.at.elapsed() < self.opts.resolve_ttl {
                return Ok(cached.info.clone());
            }
        }

        if self.opts.predict_fastpath {
            if let Some(pred) = &state.last_prediction {
                if pred.at.elapsed() < self.fastpath_window() {
                    let info = pred.info.clone();
                    state.resolved = Some(CachedChoice {
                        info: info.clone(),
                        at: Instant::now(),
                    });
                    state.explain = Some(ResolveExplain {
                        component: self.component.clone(),
                        method: self.method.clone(),
                        strategy: "predicted_fastpath",
                        candidates: Vec::new(),
                        selected: Some(info.clone()),
                        reason: "recent prediction promoted".to_string(),
                    });
                    strata_registry!(
                        debug,
                        component = %self.component,
                        method = %self.method,
                        engine = %info.engine,
                        "resolve served from prediction fastpath"
                    );
                    return Ok(info);
                }
            }
        }

        let (info, explain) = self.run_selection(registry)?;
        state.resolved = Some(CachedChoice {
            info: info.clone(),
            at: Instant::now(),
        });
        state.explain = Some(explain);
        Ok(info)
    }

    /// Predicts the implementation this handle would resolve to, for cache
    /// key construction. Does not commit the resolution cache; a fresh
    /// resolution (younger than TTL/5) may be reused when the fast path is
    /// enabled. Returns `None` when no implementation is registered yet.
    pub fn predict_signature(&self, registry: &Registry) -> Option<ImplementationInfo> {
        let mut state = self.state.lock();

        if self.opts.predict_fastpath {
            if let Some(cached) = &state.resolved {
                if cached.at.elapsed() < self.fastpath_window() {
                    return Some(cached.info.clone());
                }
            }
        }

        if let EnginePref::Fixed(engine) = &self.prefer {
            return self.fixed_info(registry, engine).ok();
        }

        match self.run_selection(registry) {
            Ok((info, _)) => {
                state.last_prediction = Some(CachedChoice {
                    info: info.clone(),
                    at: Instant::now(),
                });
                Some(info)
            }
            Err(_) => None,
        }
    }

    /// Resolves, then dispatches through the registry.
    pub async fn execute(
        &self,
        registry: &Registry,
        args: MethodArgs,
    ) -> Result<strata_core::Value, RegistryError> {
        let info = self.resolve(registry)?;
        registry
            .execute_with_engine(&self.component, &info.engine, &self.method, args)
            .await
    }

    /// Drops the cached resolution and prediction.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.resolved = None;
        state.last_prediction = None;
    }

    /// The last resolution decision, if any.
    pub fn explain(&self) -> Option<ResolveExplain> {
        self.state.lock().explain.clone()
    }

    fn fastpath_window(&self) -> Duration {
        self.opts.resolve_ttl / 5
    }

    fn fixed_info(
        &self,
        registry: &Registry,
        engine: &str,
    ) -> Result<ImplementationInfo, RegistryError> {
        let cands = registry
            .describe(&self.component, &self.method)
            .map_err(|_| RegistryError::NoCandidate {
                component: self.component.clone(),
                method: self.method.clone(),
            })?;
        cands
            .into_iter()
            .find(|c| c.engine == engine)
            .ok_or_else(|| RegistryError::EngineNotFound {
                component: self.component.clone(),
                engine: engine.to_string(),
                method: self.method.clone(),
            })
    }

    fn run_selection(
        &self,
        registry: &Registry,
    ) -> Result<(ImplementationInfo, ResolveExplain), RegistryError> {
        let selected = registry
            .select(&self.component, &self.method, "default", None)
            .map_err(|err| match err {
                RegistryError::MethodNotFound { component, method } => {
                    RegistryError::NoCandidate { component, method }
                }
                other => other,
            })?;
        let candidates = registry
            .describe(&self.component, &self.method)
            .unwrap_or_default();
        let info = selected.info();
        let explain = ResolveExplain {
            component: self.component.clone(),
            method: self.method.clone(),
            strategy: DefaultStrategy.name(),
            candidates,
            selected: Some(info.clone()),
            reason: "priority desc, version desc, live first".to_string(),
        };
        Ok((info, explain))
    }
}

impl std::fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHandle")
            .field("identity", &self.identity())
            .finish()
    }
}

/// Builds the signature fragment for one chain entry:
/// `method@engine:version:priority`, with unknown placeholders when no
/// implementation is registered yet.
pub fn signature_part(method: &str, prediction: Option<&ImplementationInfo>) -> String {
    match prediction {
        Some(info) => info.signature_part(method),
        None => format!("{}@unknown:unknown:0", method),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookBus;
    use crate::registration::{fn_method, Registration};
    use crate::registry::{ConflictPolicy, RegistryConfig};
    use strata_core::Value;

    fn registry() -> Registry {
        Registry::with_hooks(
            RegistryConfig {
                conflict_policy: ConflictPolicy::OverwriteNewer,
            },
            Arc::new(HookBus::new()),
        )
    }

    fn reg(engine: &str, priority: i32) -> Registration {
        let tag = engine.to_string();
        Registration::new(
            "table",
            "clean",
            engine,
            fn_method(move |_| Ok(Value::from(tag.clone()))),
        )
        .with_priority(priority)
    }

    #[test]
    fn auto_resolves_by_default_strategy() {
        let r = registry();
        r.register(reg("v1", 1)).unwrap();
        r.register(reg("v2", 2)).unwrap();
        let handle = MethodHandle::new("table", "clean", EnginePref::Auto);
        assert_eq!(handle.resolve(&r).unwrap().engine, "v2");
        assert!(handle.identity().ends_with("@auto:v2"));
    }

    #[test]
    fn fixed_engine_short_circuits() {
        let r = registry();
        r.register(reg("v1", 1)).unwrap();
        r.register(reg("v2", 2)).unwrap();
        let handle =
            MethodHandle::new("table", "clean", EnginePref::Fixed("v1".to_string()));
        assert_eq!(handle.resolve(&r).unwrap().engine, "v1");
        assert_eq!(handle.explain().unwrap().strategy, "fixed");
    }

    #[test]
    fn cache_survives_registry_change_within_ttl() {
        let r = registry();
        r.register(reg("v1", 1)).unwrap();
        let handle = MethodHandle::new("table", "clean", EnginePref::Auto);
        assert_eq!(handle.resolve(&r).unwrap().engine, "v1");
        // a better candidate appears, but the cache is still authoritative
        r.register(reg("v9", 9)).unwrap();
        assert_eq!(handle.resolve(&r).unwrap().engine, "v1");
        // invalidation forces re-selection
        handle.invalidate();
        assert_eq!(handle.resolve(&r).unwrap().engine, "v9");
    }

    #[test]
    fn expired_ttl_reselects() {
        let r = registry();
        r.register(reg("v1", 1)).unwrap();
        let handle = MethodHandle::with_options(
            "table",
            "clean",
            EnginePref::Auto,
            HandleOptions {
                resolve_ttl: Duration::from_millis(0),
                predict_fastpath: false,
            },
        );
        assert_eq!(handle.resolve(&r).unwrap().engine, "v1");
        r.register(reg("v9", 9)).unwrap();
        assert_eq!(handle.resolve(&r).unwrap().engine, "v9");
    }

    #[test]
    fn predict_does_not_commit_resolution() {
        let r = registry();
        r.register(reg("v1", 1)).unwrap();
        let handle = MethodHandle::with_options(
            "table",
            "clean",
            EnginePref::Auto,
            HandleOptions {
                resolve_ttl: Duration::from_secs(5),
                predict_fastpath: false,
            },
        );
        assert_eq!(handle.predict_signature(&r).unwrap().engine, "v1");
        assert!(handle.identity().ends_with("@unresolved"));
        // a new registration changes the prediction immediately
        r.register(reg("v9", 9)).unwrap();
        assert_eq!(handle.predict_signature(&r).unwrap().engine, "v9");
    }

    #[test]
    fn predict_reuses_fresh_resolution_on_fastpath() {
        let r = registry();
        r.register(reg("v1", 1)).unwrap();
        let handle = MethodHandle::new("table", "clean", EnginePref::Auto);
        handle.resolve(&r).unwrap();
        r.register(reg("v9", 9)).unwrap();
        // fastpath: the second-old resolution still answers predictions
        assert_eq!(handle.predict_signature(&r).unwrap().engine, "v1");
    }

    #[test]
    fn missing_method_predicts_none_and_fails_resolve() {
        let r = registry();
        let handle = MethodHandle::new("table", "missing", EnginePref::Auto);
        assert!(handle.predict_signature(&r).is_none());
        assert!(matches!(
            handle.resolve(&r),
            Err(RegistryError::NoCandidate { .. })
        ));
        assert_eq!(
            signature_part("missing", None),
            "missing@unknown:unknown:0"
        );
    }

    #[tokio::test]
    async fn execute_dispatches_resolved_engine() {
        let r = registry();
        r.register(reg("v1", 1)).unwrap();
        r.register(reg("v2", 2)).unwrap();
        let handle = MethodHandle::new("table", "clean", EnginePref::Auto);
        let out = handle.execute(&r, MethodArgs::default()).await.unwrap();
        assert_eq!(out.as_str(), Some("v2"));
    }

    #[test]
    fn concurrent_resolution_is_single_flight() {
        let r = Arc::new(registry());
        r.register(reg("v1", 1)).unwrap();
        let handle = Arc::new(MethodHandle::new("table", "clean", EnginePref::Auto));
        let mut joins = Vec::new();
        for _ in 0..8 {
            let r = Arc::clone(&r);
            let handle = Arc::clone(&handle);
            joins.push(std::thread::spawn(move || {
                handle.resolve(&r).unwrap().engine
            }));
        }
        for join in joins {
            assert_eq!(join.join().unwrap(), "v1");
        }
    }
}
