use std::path::Path;

use colored::Colorize;
use strata_engine::FlowResult;

use super::{project_root, EXIT_OK};

pub fn execute(_config: &Path, format: &str) -> u8 {
    let path = strata_core::paths::last_run_report(&project_root());
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => {
            println!("no run recorded yet ({})", path.display());
            return EXIT_OK;
        }
    };
    let result: FlowResult = match serde_json::from_str(&raw) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("{} unreadable run report: {}", "warning:".yellow(), err);
            return EXIT_OK;
        }
    };

    match format {
        "json" => match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("{} {}", "warning:".yellow(), err),
        },
        "markdown" => print_markdown(&result),
        _ => print_text(&result),
    }
    EXIT_OK
}

fn print_text(result: &FlowResult) {
    println!(
        "{} ({:?}) {} -> {}",
        result.pipeline.bold(),
        result.status,
        result.started_at,
        result.finished_at
    );
    println!(
        "  nodes: {}  hits: {}  misses: {}  execution: {}ms",
        result.cache.node_total,
        result.cache.cache_hits,
        result.cache.cache_miss,
        result.cache.total_execution_ms
    );
    let mut nodes: Vec<_> = result.node_metrics.iter().collect();
    nodes.sort_by(|a, b| b.1.duration_ms.cmp(&a.1.duration_ms));
    for (name, m) in nodes {
        let cached = if m.cached { " (cached)" } else { "" };
        println!("  {:<24} {:>8}ms  {:?}{}", name, m.duration_ms, m.status, cached);
    }
}

fn print_markdown(result: &FlowResult) {
    let total: u64 = result
        .node_metrics
        .values()
        .map(|m| m.duration_ms)
        .sum::<u64>()
        .max(1);
    println!("| Node | Duration(ms) | % | Cached |");
    println!("|------|--------------|---|--------|");
    let mut nodes: Vec<_> = result.node_metrics.iter().collect();
    nodes.sort_by(|a, b| b.1.duration_ms.cmp(&a.1.duration_ms));
    for (name, m) in nodes {
        println!(
            "| {} | {} | {:.1} | {} |",
            name,
            m.duration_ms,
            m.duration_ms as f64 / total as f64 * 100.0,
            if m.cached { "yes" } else { "no" }
        );
    }
}
