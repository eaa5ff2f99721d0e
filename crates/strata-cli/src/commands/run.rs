use std::path::Path;

use colored::Colorize;
use strata_engine::{ExecutionEngine, FlowContext, FlowStatus, RunOptions};
use strata_registry::Registry;

use super::{load_pipeline, project_root, EXIT_FAILURE, EXIT_OK};

pub async fn execute(
    config: &Path,
    only: Option<String>,
    exclude: Option<String>,
    resume: bool,
    force: bool,
) -> u8 {
    let pipeline = match load_pipeline(config, only.as_deref(), exclude.as_deref()) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let ctx = FlowContext::with_options(
        pipeline,
        RunOptions {
            force,
            resume,
            project_root: Some(project_root()),
        },
    );
    let engine = ExecutionEngine::new(Registry::global());

    match engine.run(&ctx).await {
        Ok(result) => {
            let banner = match result.status {
                FlowStatus::Completed => "completed".green().bold(),
                FlowStatus::CompletedWithFailures => "completed with failures".yellow().bold(),
                FlowStatus::Failed => "failed".red().bold(),
            };
            println!("{} {}", result.pipeline.bold(), banner);
            println!(
                "  executed: {}  cached: {}  failed: {}  skipped: {}",
                result.executed_steps.len(),
                result.cached_steps.len(),
                result.failed_steps.len(),
                result.skipped_steps.len()
            );
            for layer in &result.layers {
                println!(
                    "  layer {}: {} node(s) in {}ms",
                    layer.layer,
                    layer.nodes.len(),
                    layer.elapsed_ms
                );
            }
            if !result.failed_steps.is_empty() {
                println!("  failed steps: {}", result.failed_steps.join(", ").red());
            }
            if result.exit_code() == 0 {
                EXIT_OK
            } else {
                EXIT_FAILURE
            }
        }
        Err(err) => {
            eprintln!("{} {}", "flow failed:".red().bold(), err);
            EXIT_FAILURE
        }
    }
}
