//! Method registrations: the callable plus its selection metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::{Value, Version};

/// Arguments delivered to a method implementation.
///
/// `named` holds the step's resolved parameters; `primary` carries the
/// previous chain link's result when the step runs a method chain and the
/// registration opted into chain input.
#[derive(Clone, Debug, Default)]
pub struct MethodArgs {
    pub primary: Option<Value>,
    pub named: BTreeMap<String, Value>,
}

impl MethodArgs {
    pub fn new(named: BTreeMap<String, Value>) -> Self {
        Self {
            primary: None,
            named,
        }
    }

    pub fn with_primary(mut self, primary: Value) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// Fetches a required named parameter.
    pub fn require(&self, name: &str) -> anyhow::Result<&Value> {
        self.named
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("missing required parameter '{}'", name))
    }
}

/// One callable implementation of a component method.
///
/// Implementations are async so cancellation and timeouts can interrupt them
/// at suspension points; CPU-bound bodies simply never suspend.
#[async_trait]
pub trait Method: Send + Sync {
    async fn call(&self, args: MethodArgs) -> anyhow::Result<Value>;
}

struct FnMethod<F>(F);

#[async_trait]
impl<F> Method for FnMethod<F>
where
    F: Fn(MethodArgs) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(&self, args: MethodArgs) -> anyhow::Result<Value> {
        (self.0)(args)
    }
}

/// Wraps a synchronous closure as a [`Method`]. Most domain methods are
/// plain functions; plug-ins with real I/O implement the trait directly.
pub fn fn_method<F>(f: F) -> Arc<dyn Method>
where
    F: Fn(MethodArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnMethod(f))
}

/// A registered implementation: callable plus selection metadata.
#[derive(Clone)]
pub struct Registration {
    pub component: String,
    pub method: String,
    pub engine: String,
    pub version: Version,
    /// Higher wins under the default strategy.
    pub priority: i32,
    pub deprecated: bool,
    /// Accepts the previous chain link's result as its primary input.
    pub chain_input: bool,
    /// Declares a list-shaped primary input (input-style validation).
    pub accepts_list: bool,
    pub description: String,
    pub callable: Arc<dyn Method>,
    pub registered_at: DateTime<Utc>,
}

impl Registration {
    pub fn new(
        component: impl Into<String>,
        method: impl Into<String>,
        engine: impl Into<String>,
        callable: Arc<dyn Method>,
    ) -> Self {
        Self {
            component: component.into(),
            method: method.into(),
            engine: engine.into(),
            version: Version::new("1.0.0"),
            priority: 0,
            deprecated: false,
            chain_input: false,
            accepts_list: false,
            description: String::new(),
            callable,
            registered_at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: impl Into<Version>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn chain_input(mut self) -> Self {
        self.chain_input = true;
        self
    }

    pub fn accepts_list(mut self) -> Self {
        self.accepts_list = true;
        self
    }

    /// Unique key: `component::engine::method`.
    pub fn full_key(&self) -> String {
        full_key(&self.component, &self.engine, &self.method)
    }

    pub fn info(&self) -> ImplementationInfo {
        ImplementationInfo {
            engine: self.engine.clone(),
            version: self.version.clone(),
            priority: self.priority,
            deprecated: self.deprecated,
            description: self.description.clone(),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("full_key", &self.full_key())
            .field("version", &self.version)
            .field("priority", &self.priority)
            .field("deprecated", &self.deprecated)
            .finish()
    }
}

/// Builds the canonical `component::engine::method` key.
pub fn full_key(component: &str, engine: &str, method: &str) -> String {
    format!("{}::{}::{}", component, engine, method)
}

/// Selection-relevant metadata for one implementation, as surfaced by
/// `describe` and signature prediction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationInfo {
    pub engine: String,
    pub version: Version,
    pub priority: i32,
    pub deprecated: bool,
    pub description: String,
}

impl ImplementationInfo {
    /// The implementation fingerprint used inside node signatures:
    /// `method@engine:version:priority`.
    pub fn signature_part(&self, method: &str) -> String {
        format!(
            "{}@{}:{}:{}",
            method, self.engine, self.version, self.priority
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> Registration {
        Registration::new(
            "table",
            "load",
            "mem",
            fn_method(|_| Ok(Value::from(1))),
        )
        .with_version("2.1.0")
        .with_priority(5)
    }

    #[test]
    fn full_key_format() {
        assert_eq!(reg().full_key(), "table::mem::load");
    }

    #[test]
    fn signature_part_format() {
        assert_eq!(reg().info().signature_part("load"), "load@mem:2.1.0:5");
    }

    #[tokio::test]
    async fn fn_method_invocation() {
        let m = fn_method(|args: MethodArgs| {
            let n = args.require("n")?.as_i64().unwrap_or(0);
            Ok(Value::from(n * 2))
        });
        let mut named = BTreeMap::new();
        named.insert("n".to_string(), Value::from(21));
        let out = m.call(MethodArgs::new(named)).await.unwrap();
        assert_eq!(out.as_i64(), Some(42));
    }
}
