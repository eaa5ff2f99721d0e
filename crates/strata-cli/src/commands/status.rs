use colored::Colorize;
use strata_registry::Registry;

use super::EXIT_OK;

pub fn execute() -> u8 {
    let registry = Registry::global();
    let stats = registry.stats();

    println!("{}", "registry".bold());
    println!("  registrations: {}", stats.registrations);
    println!("  components: {}", stats.components.len());
    for component in &stats.components {
        let methods = registry.component_methods(component);
        println!("    {} ({} method(s))", component.cyan(), methods.len());
    }
    match stats.success_rate {
        Some(rate) => println!("  call success rate: {:.1}%", rate),
        None => println!("  call success rate: n/a (no calls yet)"),
    }
    EXIT_OK
}
