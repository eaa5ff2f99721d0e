use std::collections::BTreeMap;
use std::path::Path;

use colored::Colorize;
use strata_engine::{ExecutionEngine, FlowContext, NodeSignature, RunOptions, SignatureStore};
use strata_registry::{signature_part, Registry};

use super::{load_pipeline, project_root, split_names, EXIT_FAILURE, EXIT_OK};

/// Shows each step's computed signature against the stored index.
pub fn plan(config: &Path) -> u8 {
    let pipeline = match load_pipeline(config, None, None) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let registry = Registry::global();
    let store = match SignatureStore::load(&project_root()) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("{} {}", "cache error:".red().bold(), err);
            return EXIT_FAILURE;
        }
    };

    println!("{:<24} {:<34} {:<34} state", "step", "computed", "stored");
    let mut computed: BTreeMap<String, String> = BTreeMap::new();
    for node in &pipeline.nodes {
        let mut impl_parts = Vec::new();
        for (method, handle) in node.methods.iter().zip(&node.handles) {
            let prediction = handle.predict_signature(&registry);
            impl_parts.push(signature_part(method, prediction.as_ref()));
        }
        let literals = node.literal_parameters();
        let upstream: BTreeMap<String, String> = node
            .upstream_steps
            .iter()
            .filter_map(|s| computed.get(s).map(|sig| (s.clone(), sig.clone())))
            .collect();
        let signature = NodeSignature::compute(&node.methods, &impl_parts, &literals, &upstream);
        computed.insert(node.name.clone(), signature.digest.clone());

        let (stored, state) = match store.get(&node.name) {
            Some(prev) if prev.digest == signature.digest => {
                (prev.digest.clone(), "fresh".green())
            }
            Some(prev) => (prev.digest.clone(), "stale".yellow()),
            None => ("-".to_string(), "new".cyan()),
        };
        println!(
            "{:<24} {:<34} {:<34} {}",
            node.name, signature.digest, stored, state
        );
    }
    EXIT_OK
}

/// Runs the pipeline to populate the signature index, then reports hits.
pub async fn warm(config: &Path) -> u8 {
    let pipeline = match load_pipeline(config, None, None) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let ctx = FlowContext::with_options(
        pipeline,
        RunOptions {
            project_root: Some(project_root()),
            ..Default::default()
        },
    );
    let engine = ExecutionEngine::new(Registry::global());
    match engine.run(&ctx).await {
        Ok(result) => {
            println!(
                "cache warmed: {} node(s), {} hit(s), {} executed",
                result.cache.node_total,
                result.cache.cache_hits,
                result.executed_steps.len()
            );
            EXIT_OK
        }
        Err(err) => {
            eprintln!("{} {}", "warm failed:".red().bold(), err);
            EXIT_FAILURE
        }
    }
}

/// Drops stored signatures, for the named steps or wholesale.
pub fn clear(steps: Option<String>) -> u8 {
    let root = project_root();
    let mut store = match SignatureStore::load(&root) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("{} {}", "cache error:".red().bold(), err);
            return EXIT_FAILURE;
        }
    };

    match steps.as_deref().map(split_names) {
        Some(names) => {
            let mut removed = 0;
            for name in &names {
                if store.remove(name) {
                    removed += 1;
                }
            }
            println!("cleared {} of {} step signature(s)", removed, names.len());
        }
        None => {
            let count = store.len();
            store.clear();
            println!("cleared {} step signature(s)", count);
        }
    }

    if let Err(err) = store.save(&root) {
        eprintln!("{} {}", "cache error:".red().bold(), err);
        return EXIT_FAILURE;
    }
    EXIT_OK
}
