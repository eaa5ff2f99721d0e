//! Built-in demo component: a tiny in-memory table engine so the binary is
//! exercisable without external plug-ins. Real deployments register their
//! own [`MethodPlugin`]s before running flows.

use std::sync::Arc;

use strata_core::Value;
use strata_registry::{
    disabled_plugins, fn_method, MethodArgs, MethodPlugin, Registration, Registry, RegistryError,
};

pub struct DemoPlugin;

impl MethodPlugin for DemoPlugin {
    fn name(&self) -> &str {
        "demo"
    }

    fn register_methods(&self, registry: &Registry) -> Result<usize, RegistryError> {
        // table::mem::load — echo back the `value` parameter, or null
        registry.register(
            Registration::new(
                "table",
                "load",
                "mem",
                fn_method(|args: MethodArgs| {
                    Ok(args.get("value").cloned().unwrap_or(Value::Null))
                }),
            )
            .with_description("load a literal value into the catalog"),
        )?;

        // table::mem::scale — multiply a numeric input by `factor`
        registry.register(
            Registration::new(
                "table",
                "scale",
                "mem",
                fn_method(|args: MethodArgs| {
                    let input = args.require("input")?.as_f64().unwrap_or(0.0);
                    let factor = args
                        .get("factor")
                        .and_then(Value::as_f64)
                        .unwrap_or(1.0);
                    Ok(Value::from(input * factor))
                }),
            )
            .with_description("scale a numeric input"),
        )?;

        // table::mem::concat — join a list of strings with `separator`
        registry.register(
            Registration::new(
                "table",
                "concat",
                "mem",
                fn_method(|args: MethodArgs| {
                    let parts = args.require("parts")?;
                    let sep = args
                        .get("separator")
                        .and_then(Value::as_str)
                        .unwrap_or(",");
                    let joined = parts
                        .as_list()
                        .map(|items| {
                            items
                                .iter()
                                .map(|v| v.to_string())
                                .collect::<Vec<_>>()
                                .join(sep)
                        })
                        .unwrap_or_else(|| parts.to_string());
                    Ok(Value::from(joined))
                }),
            )
            .accepts_list()
            .with_description("join string parts"),
        )?;

        Ok(3)
    }
}

/// Registers the demo plug-in on the global registry, honoring the disable
/// list.
pub fn install() {
    let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
    let disabled = disabled_plugins(&cwd);
    if let Err(err) = Registry::global().scan(Arc::new(DemoPlugin), &disabled) {
        tracing::warn!(target: "strata::registry", error = %err, "demo plugin not installed");
    }
}
