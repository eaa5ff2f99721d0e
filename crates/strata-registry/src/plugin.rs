//! Plug-in registration seam.
//!
//! Domain crates expose their methods as plug-in objects; the registry scans
//! each one at startup and again on `refresh()`. Individual plug-ins can be
//! disabled through `ORCH_DISABLE_PLUGINS` (comma separated names) or a
//! `.pipeline_disable_plugins` file in the project root.

use std::collections::HashSet;
use std::path::Path;

use crate::error::RegistryError;
use crate::registry::Registry;

/// Environment variable naming plug-ins to skip.
pub const DISABLE_PLUGINS_ENV: &str = "ORCH_DISABLE_PLUGINS";

/// A bundle of method registrations contributed by one domain package.
pub trait MethodPlugin: Send + Sync {
    /// Stable plug-in name, used by the disable list.
    fn name(&self) -> &str;

    /// Registers this plug-in's methods. Returns how many were registered.
    fn register_methods(&self, registry: &Registry) -> Result<usize, RegistryError>;
}

/// The set of disabled plug-in names from the environment and the project
/// opt-out file. Entries may be comma- or newline-separated.
pub fn disabled_plugins(project_root: &Path) -> HashSet<String> {
    let mut disabled = HashSet::new();
    if let Ok(raw) = std::env::var(DISABLE_PLUGINS_ENV) {
        collect_names(&raw, &mut disabled);
    }
    let file = strata_core::paths::disable_plugins_file(project_root);
    if let Ok(raw) = std::fs::read_to_string(file) {
        collect_names(&raw, &mut disabled);
    }
    disabled
}

fn collect_names(raw: &str, into: &mut HashSet<String>) {
    for part in raw.split([',', '\n']) {
        let name = part.trim();
        if !name.is_empty() {
            into.insert(name.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators() {
        let mut set = HashSet::new();
        collect_names("log, prometheus\nslack ,", &mut set);
        assert_eq!(set.len(), 3);
        assert!(set.contains("prometheus"));
        assert!(set.contains("slack"));
    }
}
