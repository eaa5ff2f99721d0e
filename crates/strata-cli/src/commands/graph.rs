use std::path::Path;

use colored::Colorize;
use strata_graph::{to_graphviz, to_mermaid, to_text};

use super::{load_pipeline, EXIT_CONFIG, EXIT_OK};

pub fn execute(config: &Path, format: &str, output: Option<&Path>, summary: bool) -> u8 {
    let pipeline = match load_pipeline(config, None, None) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let rendered = match format {
        "mermaid" => to_mermaid(&pipeline.graph),
        "graphviz" => to_graphviz(&pipeline.graph),
        _ => to_text(&pipeline.graph, Some(&pipeline.plan)),
    };

    if let Some(path) = output {
        if let Err(err) = std::fs::write(path, &rendered) {
            eprintln!("{} {}", "write failed:".red().bold(), err);
            return EXIT_CONFIG;
        }
        println!("graph written to {}", path.display());
    } else {
        print!("{rendered}");
    }

    if summary && format != "text" {
        println!(
            "{} layers, max parallelism {}, critical path: {}",
            pipeline.plan.depth(),
            pipeline.plan.max_parallelism(),
            pipeline.plan.critical_path.join(" -> ")
        );
    }
    EXIT_OK
}
