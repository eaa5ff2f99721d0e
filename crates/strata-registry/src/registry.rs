//! The process-wide method registry.
//!
//! Reads dominate: during a flow run the index is effectively immutable, so
//! it sits behind a read-write lock and dispatch clones the `Arc`'d
//! registration out before awaiting the method body. Writes happen at
//! startup (plug-in scans) and on explicit `refresh()`, externally sequenced
//! with flow execution.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use strata_core::{strata_registry, Value};

use crate::error::RegistryError;
use crate::hooks::{HookBus, HookContext, HookEvent};
use crate::index::RegistryIndex;
use crate::metrics::{CallMetrics, EngineCallStats};
use crate::plugin::MethodPlugin;
use crate::registration::{full_key, ImplementationInfo, MethodArgs, Registration};
use crate::strategy::resolve_strategy;

/// What happens when a registration arrives under an existing full key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Fail with `DuplicateRegistration`.
    Reject,
    /// Silently keep the incumbent.
    KeepExisting,
    /// Replace the incumbent only when the incoming (priority, version)
    /// sorts at or above it.
    #[default]
    OverwriteNewer,
}

/// Input-style enforcement for method dispatch, from `ORCH_INPUT_STYLE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InputStyle {
    /// Reject a single-element list primary input handed to a method that
    /// did not declare a list-shaped input.
    #[default]
    StrictSingle,
    /// No validation.
    AllowList,
    /// Methods declaring list input must receive a list primary input.
    EnforceList,
}

/// Environment variable controlling input-style validation.
pub const INPUT_STYLE_ENV: &str = "ORCH_INPUT_STYLE";

impl InputStyle {
    pub fn from_env() -> Self {
        match std::env::var(INPUT_STYLE_ENV).as_deref() {
            Ok("allow_list") => InputStyle::AllowList,
            Ok("enforce_list") => InputStyle::EnforceList,
            _ => InputStyle::StrictSingle,
        }
    }
}

/// Registry construction options.
#[derive(Clone, Debug, Default)]
pub struct RegistryConfig {
    pub conflict_policy: ConflictPolicy,
}

/// Dispatch directives accepted by `execute`.
#[derive(Clone, Debug, Default)]
pub struct ExecuteOptions {
    /// Strategy name; `None` means `default`.
    pub strategy: Option<String>,
    /// Preferred engine tag; implies the `engine_override` strategy when no
    /// strategy is named.
    pub engine: Option<String>,
}

/// Aggregate registry statistics, as shown by `strata status`.
#[derive(Clone, Debug, Serialize)]
pub struct RegistryStats {
    pub registrations: usize,
    pub components: Vec<String>,
    pub success_rate: Option<f64>,
    pub calls: std::collections::HashMap<String, EngineCallStats>,
}

pub struct Registry {
    config: RegistryConfig,
    index: RwLock<RegistryIndex>,
    metrics: CallMetrics,
    hooks: Arc<HookBus>,
    plugins: Mutex<Vec<Arc<dyn MethodPlugin>>>,
}

static GLOBAL: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::new(RegistryConfig::default())));

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            index: RwLock::new(RegistryIndex::new()),
            metrics: CallMetrics::new(),
            hooks: HookBus::global(),
            plugins: Mutex::new(Vec::new()),
        }
    }

    /// Registry with a private hook bus; used by tests that must not share
    /// global handler state.
    pub fn with_hooks(config: RegistryConfig, hooks: Arc<HookBus>) -> Self {
        Self {
            config,
            index: RwLock::new(RegistryIndex::new()),
            metrics: CallMetrics::new(),
            hooks,
            plugins: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide registry instance.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL)
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hooks
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Inserts a registration under its full key, applying the conflict
    /// policy. Returns whether the registration was stored.
    pub fn register(&self, reg: Registration) -> Result<bool, RegistryError> {
        let key = reg.full_key();
        let reg = Arc::new(reg);
        {
            let mut index = self.index.write();
            if let Some(existing) = index.get_full(&key) {
                match self.config.conflict_policy {
                    ConflictPolicy::Reject => {
                        return Err(RegistryError::DuplicateRegistration { full_key: key });
                    }
                    ConflictPolicy::KeepExisting => {
                        strata_registry!(debug, full_key = %key, "duplicate registration ignored");
                        return Ok(false);
                    }
                    ConflictPolicy::OverwriteNewer => {
                        let incoming = (reg.priority, reg.version.clone());
                        let incumbent = (existing.priority, existing.version.clone());
                        if incoming < incumbent {
                            strata_registry!(
                                debug,
                                full_key = %key,
                                "duplicate registration older than incumbent, kept existing"
                            );
                            return Ok(false);
                        }
                    }
                }
            }
            index.add(Arc::clone(&reg));
        }

        strata_registry!(debug, full_key = %key, version = %reg.version, "registered method");
        self.hooks.emit(HookContext::flow(
            HookEvent::AfterMethodRegistered,
            Value::from(key),
        ));
        Ok(true)
    }

    /// Runs a plug-in's registrations and remembers it for `refresh()`.
    /// A disabled plug-in is remembered but not scanned.
    pub fn scan(
        &self,
        plugin: Arc<dyn MethodPlugin>,
        disabled: &HashSet<String>,
    ) -> Result<usize, RegistryError> {
        let count = if disabled.contains(plugin.name()) {
            strata_registry!(info, plugin = plugin.name(), "plugin disabled, skipping scan");
            0
        } else {
            plugin.register_methods(self)?
        };
        self.plugins.lock().push(plugin);
        Ok(count)
    }

    /// Clears the index and re-runs every remembered plug-in scan.
    pub fn refresh(&self, disabled: &HashSet<String>) -> Result<usize, RegistryError> {
        self.index.write().clear();
        let plugins: Vec<Arc<dyn MethodPlugin>> = self.plugins.lock().clone();
        let mut count = 0;
        for plugin in plugins {
            if disabled.contains(plugin.name()) {
                continue;
            }
            count += plugin.register_methods(self)?;
        }
        strata_registry!(info, methods = count, "registry refreshed");
        self.hooks.emit(HookContext::flow(
            HookEvent::AfterRegistryRefresh,
            Value::from(count as i64),
        ));
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// All candidates for a method, in insertion order.
    pub fn describe(
        &self,
        component: &str,
        method: &str,
    ) -> Result<Vec<ImplementationInfo>, RegistryError> {
        let cands = self.index.read().method_candidates(component, method);
        if cands.is_empty() {
            return Err(RegistryError::MethodNotFound {
                component: component.to_string(),
                method: method.to_string(),
            });
        }
        Ok(cands.iter().map(|r| r.info()).collect())
    }

    /// Engine tags registered for a method.
    pub fn list_engines(&self, component: &str, method: &str) -> Vec<String> {
        self.index
            .read()
            .method_candidates(component, method)
            .iter()
            .map(|r| r.engine.clone())
            .collect()
    }

    /// Direct lookup of one registration by its triple.
    pub fn find(
        &self,
        component: &str,
        engine: &str,
        method: &str,
    ) -> Option<Arc<Registration>> {
        self.index
            .read()
            .get_full(&full_key(component, engine, method))
    }

    pub fn components(&self) -> Vec<String> {
        self.index.read().components()
    }

    pub fn component_methods(&self, component: &str) -> Vec<String> {
        self.index.read().component_methods(component)
    }

    pub fn registration_count(&self) -> usize {
        self.index.read().len()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registrations: self.registration_count(),
            components: self.components(),
            success_rate: self.metrics.success_rate(),
            calls: self.metrics.export(),
        }
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Runs a strategy over the method's candidates.
    pub fn select(
        &self,
        component: &str,
        method: &str,
        strategy: &str,
        preferred_engine: Option<&str>,
    ) -> Result<Arc<Registration>, RegistryError> {
        let cands = self.index.read().method_candidates(component, method);
        if cands.is_empty() {
            return Err(RegistryError::MethodNotFound {
                component: component.to_string(),
                method: method.to_string(),
            });
        }
        let strat = resolve_strategy(strategy, preferred_engine)?;
        strat.select(&cands)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Selects an implementation and invokes it.
    pub async fn execute(
        &self,
        component: &str,
        method: &str,
        args: MethodArgs,
        opts: ExecuteOptions,
    ) -> Result<Value, RegistryError> {
        let strategy = match (&opts.strategy, &opts.engine) {
            (Some(name), _) => name.clone(),
            (None, Some(_)) => "engine_override".to_string(),
            (None, None) => "default".to_string(),
        };
        let reg = self.select(component, method, &strategy, opts.engine.as_deref())?;
        self.invoke(reg, args).await
    }

    /// Bypasses strategy selection and dispatches to a concrete engine.
    pub async fn execute_with_engine(
        &self,
        component: &str,
        engine: &str,
        method: &str,
        args: MethodArgs,
    ) -> Result<Value, RegistryError> {
        let key = full_key(component, engine, method);
        let (reg, has_method) = {
            let index = self.index.read();
            (
                index.get_full(&key),
                !index.method_candidates(component, method).is_empty(),
            )
        };
        let reg = reg.ok_or_else(|| {
            // Distinguish an unknown method from an unknown engine.
            if has_method {
                RegistryError::EngineNotFound {
                    component: component.to_string(),
                    engine: engine.to_string(),
                    method: method.to_string(),
                }
            } else {
                RegistryError::MethodNotFound {
                    component: component.to_string(),
                    method: method.to_string(),
                }
            }
        })?;
        self.invoke(reg, args).await
    }

    async fn invoke(
        &self,
        reg: Arc<Registration>,
        args: MethodArgs,
    ) -> Result<Value, RegistryError> {
        let key = reg.full_key();
        validate_input_style(&reg, &args, InputStyle::from_env())?;

        self.hooks.emit(HookContext::flow(
            HookEvent::OnMethodExecute,
            Value::from(key.clone()),
        ));

        let start = Instant::now();
        match reg.callable.call(args).await {
            Ok(value) => {
                self.metrics.record_success(&key, start.elapsed());
                Ok(value)
            }
            Err(err) => {
                self.metrics
                    .record_failure(&key, start.elapsed(), &err.to_string());
                Err(RegistryError::Execution {
                    full_key: key,
                    source: err,
                })
            }
        }
    }
}

/// Applies the configured input-style rule to the primary input.
fn validate_input_style(
    reg: &Registration,
    args: &MethodArgs,
    style: InputStyle,
) -> Result<(), RegistryError> {
    let Some(primary) = &args.primary else {
        return Ok(());
    };
    match style {
        InputStyle::AllowList => Ok(()),
        InputStyle::StrictSingle => {
            let single_element_list = primary
                .as_list()
                .map(|l| l.len() == 1)
                .unwrap_or(false);
            if single_element_list && !reg.accepts_list {
                return Err(RegistryError::InputStyle {
                    full_key: reg.full_key(),
                    message: "single-element list passed as primary input to a \
                              non-list method; unwrap the value or set \
                              ORCH_INPUT_STYLE=allow_list"
                        .to_string(),
                });
            }
            Ok(())
        }
        InputStyle::EnforceList => {
            if reg.accepts_list && primary.as_list().is_none() {
                return Err(RegistryError::InputStyle {
                    full_key: reg.full_key(),
                    message: format!(
                        "list-input method received a {} primary input",
                        type_name(primary)
                    ),
                });
            }
            Ok(())
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::List(_) => "list",
        Value::Map(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::fn_method;

    fn registry(policy: ConflictPolicy) -> Registry {
        Registry::with_hooks(
            RegistryConfig {
                conflict_policy: policy,
            },
            Arc::new(HookBus::new()),
        )
    }

    fn reg(engine: &str, version: &str, priority: i32) -> Registration {
        Registration::new("table", "clean", engine, fn_method(|_| Ok(Value::from(1))))
            .with_version(version)
            .with_priority(priority)
    }

    #[test]
    fn reject_policy_errors_on_duplicate() {
        let r = registry(ConflictPolicy::Reject);
        r.register(reg("mem", "1.0.0", 0)).unwrap();
        assert!(matches!(
            r.register(reg("mem", "1.0.0", 0)),
            Err(RegistryError::DuplicateRegistration { .. })
        ));
    }

    #[test]
    fn keep_existing_ignores_duplicate() {
        let r = registry(ConflictPolicy::KeepExisting);
        r.register(reg("mem", "1.0.0", 5)).unwrap();
        assert!(!r.register(reg("mem", "9.0.0", 9)).unwrap());
        let info = &r.describe("table", "clean").unwrap()[0];
        assert_eq!(info.priority, 5);
    }

    #[test]
    fn overwrite_newer_compares_priority_then_version() {
        let r = registry(ConflictPolicy::OverwriteNewer);
        r.register(reg("mem", "2.0.0", 5)).unwrap();
        // older: not stored
        assert!(!r.register(reg("mem", "1.0.0", 5)).unwrap());
        // newer version, same priority: replaces
        assert!(r.register(reg("mem", "3.0.0", 5)).unwrap());
        let info = &r.describe("table", "clean").unwrap()[0];
        assert_eq!(info.version.as_str(), "3.0.0");
    }

    #[test]
    fn uniqueness_invariant_holds() {
        let r = registry(ConflictPolicy::OverwriteNewer);
        r.register(reg("mem", "1.0.0", 0)).unwrap();
        r.register(reg("mem", "2.0.0", 0)).unwrap();
        assert_eq!(r.registration_count(), 1);
        assert_eq!(r.list_engines("table", "clean"), vec!["mem"]);
    }

    #[tokio::test]
    async fn execute_selects_by_default_strategy() {
        let r = registry(ConflictPolicy::OverwriteNewer);
        r.register(
            Registration::new("table", "clean", "v1", fn_method(|_| Ok(Value::from(1))))
                .with_priority(1),
        )
        .unwrap();
        r.register(
            Registration::new("table", "clean", "v2", fn_method(|_| Ok(Value::from(2))))
                .with_priority(2),
        )
        .unwrap();
        let out = r
            .execute("table", "clean", MethodArgs::default(), ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(out.as_i64(), Some(2));
    }

    #[tokio::test]
    async fn execute_with_engine_bypasses_strategy() {
        let r = registry(ConflictPolicy::OverwriteNewer);
        r.register(
            Registration::new("table", "clean", "v1", fn_method(|_| Ok(Value::from(1))))
                .with_priority(1),
        )
        .unwrap();
        r.register(
            Registration::new("table", "clean", "v2", fn_method(|_| Ok(Value::from(2))))
                .with_priority(2),
        )
        .unwrap();
        let out = r
            .execute_with_engine("table", "v1", "clean", MethodArgs::default())
            .await
            .unwrap();
        assert_eq!(out.as_i64(), Some(1));
    }

    #[tokio::test]
    async fn missing_lookups_report_the_right_error() {
        let r = registry(ConflictPolicy::OverwriteNewer);
        r.register(reg("mem", "1.0.0", 0)).unwrap();
        assert!(matches!(
            r.execute("table", "nope", MethodArgs::default(), ExecuteOptions::default())
                .await,
            Err(RegistryError::MethodNotFound { .. })
        ));
        assert!(matches!(
            r.execute_with_engine("table", "gone", "clean", MethodArgs::default())
                .await,
            Err(RegistryError::EngineNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn method_failures_propagate_with_key() {
        let r = registry(ConflictPolicy::OverwriteNewer);
        r.register(Registration::new(
            "table",
            "boom",
            "mem",
            fn_method(|_| anyhow::bail!("native failure")),
        ))
        .unwrap();
        let err = r
            .execute("table", "boom", MethodArgs::default(), ExecuteOptions::default())
            .await
            .unwrap_err();
        match err {
            RegistryError::Execution { full_key, source } => {
                assert_eq!(full_key, "table::mem::boom");
                assert_eq!(source.to_string(), "native failure");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(r.stats().success_rate, Some(0.0));
    }

    #[test]
    fn input_style_strict_single() {
        let strict = Registration::new("t", "m", "e", fn_method(|_| Ok(Value::Null)));
        let listy = Registration::new("t", "m", "e", fn_method(|_| Ok(Value::Null))).accepts_list();
        let wrapped = MethodArgs::default().with_primary(Value::List(vec![Value::from(1)]));

        assert!(validate_input_style(&strict, &wrapped, InputStyle::StrictSingle).is_err());
        assert!(validate_input_style(&listy, &wrapped, InputStyle::StrictSingle).is_ok());
        assert!(validate_input_style(&strict, &wrapped, InputStyle::AllowList).is_ok());

        let scalar = MethodArgs::default().with_primary(Value::from(1));
        assert!(validate_input_style(&listy, &scalar, InputStyle::EnforceList).is_err());
        assert!(validate_input_style(&strict, &scalar, InputStyle::EnforceList).is_ok());
    }

    #[test]
    fn refresh_replays_plugin_scans() {
        struct Demo;
        impl MethodPlugin for Demo {
            fn name(&self) -> &str {
                "demo"
            }
            fn register_methods(&self, registry: &Registry) -> Result<usize, RegistryError> {
                registry.register(Registration::new(
                    "table",
                    "load",
                    "mem",
                    fn_method(|_| Ok(Value::from(42))),
                ))?;
                Ok(1)
            }
        }

        let r = registry(ConflictPolicy::OverwriteNewer);
        let none = HashSet::new();
        assert_eq!(r.scan(Arc::new(Demo), &none).unwrap(), 1);
        assert_eq!(r.registration_count(), 1);
        assert_eq!(r.refresh(&none).unwrap(), 1);
        assert_eq!(r.registration_count(), 1);

        // disabled on refresh -> gone
        let mut disabled = HashSet::new();
        disabled.insert("demo".to_string());
        assert_eq!(r.refresh(&disabled).unwrap(), 0);
        assert_eq!(r.registration_count(), 0);
    }
}
