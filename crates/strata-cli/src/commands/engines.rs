use colored::Colorize;
use strata_registry::Registry;

use super::EXIT_OK;

pub fn execute() -> u8 {
    let registry = Registry::global();
    for component in registry.components() {
        println!("{}", component.cyan().bold());
        for method in registry.component_methods(&component) {
            let infos = registry.describe(&component, &method).unwrap_or_default();
            for info in infos {
                let mut tags = Vec::new();
                if info.deprecated {
                    tags.push("deprecated");
                }
                let tag_str = if tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", tags.join(","))
                };
                println!(
                    "  {}::{}  v{} prio={}{}  {}",
                    method,
                    info.engine.green(),
                    info.version,
                    info.priority,
                    tag_str.yellow(),
                    info.description.dimmed()
                );
            }
        }
    }
    EXIT_OK
}
