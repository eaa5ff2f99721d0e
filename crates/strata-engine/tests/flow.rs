//! End-to-end flow tests against an in-memory component set.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_config::{CompiledPipeline, ConfigService, PipelineFile};
use strata_core::Value;
use strata_engine::{
    EngineError, ExecutionEngine, FlowContext, FlowStatus, NodeStatus, RunOptions,
};
use strata_registry::{
    fn_method, ConflictPolicy, HookBus, HookEvent, Method, MethodArgs, Registration, Registry,
    RegistryConfig,
};

struct Fixture {
    registry: Arc<Registry>,
    hooks: Arc<HookBus>,
    engine: ExecutionEngine,
    load_calls: Arc<AtomicUsize>,
    clean_calls: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    let hooks = Arc::new(HookBus::new());
    let registry = Arc::new(Registry::with_hooks(
        RegistryConfig {
            conflict_policy: ConflictPolicy::OverwriteNewer,
        },
        Arc::clone(&hooks),
    ));
    let load_calls = Arc::new(AtomicUsize::new(0));
    let clean_calls = Arc::new(AtomicUsize::new(0));

    // X::mem::load -> 42 for "in.csv", 100 otherwise
    {
        let calls = Arc::clone(&load_calls);
        registry
            .register(Registration::new(
                "x",
                "load",
                "mem",
                fn_method(move |args: MethodArgs| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let path = args.require("path")?.as_str().unwrap_or("").to_string();
                    Ok(Value::from(if path == "in.csv" { 42 } else { 100 }))
                }),
            ))
            .unwrap();
    }

    // Y::v1::clean and Y::v2::clean both double df; v2 has higher priority
    for (engine, priority) in [("v1", 1), ("v2", 2)] {
        let calls = Arc::clone(&clean_calls);
        registry
            .register(
                Registration::new(
                    "y",
                    "clean",
                    engine,
                    fn_method(move |args: MethodArgs| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let df = args.require("df")?.as_i64().unwrap_or(0);
                        Ok(Value::from(df * 2))
                    }),
                )
                .with_priority(priority),
            )
            .unwrap();
    }

    let engine = ExecutionEngine::with_hooks(Arc::clone(&registry), Arc::clone(&hooks));
    Fixture {
        registry,
        hooks,
        engine,
        load_calls,
        clean_calls,
    }
}

fn compile(yaml: &str) -> CompiledPipeline {
    ConfigService::compile(PipelineFile::from_yaml(yaml).unwrap()).unwrap()
}

const S1: &str = r#"
pipeline:
  name: s1
  steps:
    - name: a
      component: x
      engine: mem
      method: load
      parameters:
        path: in.csv
      outputs:
        parameters: [raw]
    - name: b
      component: y
      engine: auto
      method: clean
      parameters:
        df: steps.a.outputs.parameters.raw
      outputs:
        parameters: [cleaned]
"#;

#[tokio::test]
async fn s1_linear_chain_and_warm_rerun() {
    let fx = fixture();
    let ctx = FlowContext::new(compile(S1));

    // plan: two layers
    assert_eq!(ctx.pipeline.plan.depth(), 2);
    assert_eq!(ctx.pipeline.plan.layers[0].nodes, vec!["a"]);
    assert_eq!(ctx.pipeline.plan.layers[1].nodes, vec!["b"]);

    let result = fx.engine.run(&ctx).await.unwrap();
    assert_eq!(result.status, FlowStatus::Completed);
    assert_eq!(ctx.catalog.get("a__raw").unwrap().as_i64(), Some(42));
    assert_eq!(ctx.catalog.get("b__cleaned").unwrap().as_i64(), Some(84));
    assert!(!result.node_metrics["a"].cached);
    assert!(!result.node_metrics["b"].cached);

    // b resolved to the higher-priority engine
    let b = ctx.pipeline.node("b").unwrap();
    assert!(b.handles[0].identity().ends_with("@auto:v2"));

    let first_sigs: BTreeMap<String, String> = result
        .node_metrics
        .iter()
        .map(|(k, m)| (k.clone(), m.signature.clone().unwrap()))
        .collect();

    // warm re-run: everything cache-hits with identical signatures
    let rerun = fx.engine.run(&ctx).await.unwrap();
    assert!(rerun.node_metrics["a"].cached);
    assert!(rerun.node_metrics["b"].cached);
    for (step, sig) in &first_sigs {
        assert_eq!(rerun.node_metrics[step].signature.as_ref(), Some(sig));
    }
    assert_eq!(fx.load_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.clean_calls.load(Ordering::SeqCst), 1);
    assert_eq!(rerun.cache.cache_hits, 2);
}

const DIAMOND: &str = r#"
pipeline:
  name: s2
  orchestration:
    task_runner: concurrent
    max_workers: 2
  steps:
    - name: a
      component: x
      engine: mem
      method: load
      parameters: {path: in.csv}
      outputs:
        parameters: [raw]
    - name: b
      component: y
      method: clean
      parameters:
        df: steps.a.outputs.parameters.raw
      outputs:
        parameters: [out]
    - name: c
      component: y
      method: clean
      parameters:
        df: steps.a.outputs.parameters.raw
      outputs:
        parameters: [out]
    - name: d
      component: y
      method: clean
      parameters:
        df: steps.b.outputs.parameters.out
      depends_on: [b, c]
      outputs:
        parameters: [out]
"#;

#[tokio::test]
async fn s2_diamond_layers_and_completion() {
    let fx = fixture();
    let ctx = FlowContext::new(compile(DIAMOND));

    let layers: Vec<Vec<String>> = ctx
        .pipeline
        .plan
        .layers
        .iter()
        .map(|l| l.nodes.clone())
        .collect();
    assert_eq!(
        layers,
        vec![
            vec!["a".to_string()],
            vec!["b".to_string(), "c".to_string()],
            vec!["d".to_string()],
        ]
    );
    assert_eq!(ctx.pipeline.plan.max_parallelism(), 2);
    assert_eq!(ctx.pipeline.plan.critical_path.len(), 3);

    let result = fx.engine.run(&ctx).await.unwrap();
    assert_eq!(result.status, FlowStatus::Completed);
    for step in ["a", "b", "c", "d"] {
        assert_eq!(result.node_metrics[step].status, NodeStatus::Completed);
    }
    // d = (a*2)*2
    assert_eq!(ctx.catalog.get("d__out").unwrap().as_i64(), Some(168));
}

#[tokio::test]
async fn s3_parameter_change_invalidates_downstream() {
    let fx = fixture();
    let ctx = FlowContext::new(compile(S1));
    fx.engine.run(&ctx).await.unwrap();

    // same cache state, recompiled config with a changed literal
    let changed = S1.replace("in.csv", "other.csv");
    let ctx2 = FlowContext::with_shared_state(
        compile(&changed),
        Arc::clone(&ctx.catalog),
        Arc::clone(&ctx.signatures),
        RunOptions::default(),
    );
    let result = fx.engine.run(&ctx2).await.unwrap();

    assert!(!result.node_metrics["a"].cached, "a must re-run");
    assert!(!result.node_metrics["b"].cached, "upstream change reaches b");
    assert_eq!(ctx2.catalog.get("a__raw").unwrap().as_i64(), Some(100));
    assert_eq!(ctx2.catalog.get("b__cleaned").unwrap().as_i64(), Some(200));
    assert_eq!(fx.load_calls.load(Ordering::SeqCst), 2);
    assert_eq!(fx.clean_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn s4_new_implementation_invalidates_consumer_only() {
    let fx = fixture();
    let ctx = FlowContext::new(compile(S1));
    fx.engine.run(&ctx).await.unwrap();

    // a better clean arrives: df + 1
    fx.registry
        .register(
            Registration::new(
                "y",
                "clean",
                "v3",
                fn_method(|args: MethodArgs| {
                    let df = args.require("df")?.as_i64().unwrap_or(0);
                    Ok(Value::from(df + 1))
                }),
            )
            .with_priority(9),
        )
        .unwrap();

    // recompile (fresh handles), keep cache state
    let ctx2 = FlowContext::with_shared_state(
        compile(S1),
        Arc::clone(&ctx.catalog),
        Arc::clone(&ctx.signatures),
        RunOptions::default(),
    );
    let result = fx.engine.run(&ctx2).await.unwrap();

    assert!(result.node_metrics["a"].cached, "a unaffected");
    assert!(!result.node_metrics["b"].cached, "b sees the new prediction");
    assert_eq!(ctx2.catalog.get("b__cleaned").unwrap().as_i64(), Some(43));
    assert_eq!(fx.load_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn s5_cycle_reported_with_path() {
    let err = ConfigService::compile(
        PipelineFile::from_yaml(
            r#"
pipeline:
  steps:
    - name: a
      component: c
      method: m
      depends_on: [b]
    - name: b
      component: c
      method: m
      depends_on: [a]
"#,
        )
        .unwrap(),
    )
    .unwrap_err();
    match err {
        strata_config::ConfigError::Graph(strata_graph::GraphError::Cycle { cycle }) => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&"a".to_string()) && cycle.contains(&"b".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

const SOFT_FAIL: &str = r#"
pipeline:
  name: s6
  orchestration:
    soft_fail: true
  steps:
    - name: a
      component: x
      engine: mem
      method: load
      parameters: {path: in.csv}
      outputs:
        parameters: [raw]
    - name: b
      component: z
      method: explode
      parameters:
        df: steps.a.outputs.parameters.raw
      outputs:
        parameters: [out]
    - name: c
      component: y
      method: clean
      parameters:
        df: steps.b.outputs.parameters.out
      outputs:
        parameters: [out]
"#;

#[tokio::test]
async fn s6_soft_failure_skips_descendants() {
    let fx = fixture();
    fx.registry
        .register(Registration::new(
            "z",
            "explode",
            "mem",
            fn_method(|_| anyhow::bail!("bad value")),
        ))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let ctx = FlowContext::with_options(
        compile(SOFT_FAIL),
        RunOptions {
            project_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        },
    );
    let before = fx.hooks.invocation_count(HookEvent::OnFailure);
    let result = fx.engine.run(&ctx).await.unwrap();

    assert_eq!(result.status, FlowStatus::CompletedWithFailures);
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.node_metrics["a"].status, NodeStatus::Completed);
    assert_eq!(result.node_metrics["b"].status, NodeStatus::SoftFailed);
    assert_eq!(result.node_metrics["c"].status, NodeStatus::Skipped);
    assert_eq!(
        result.node_metrics["c"].skip_reason.as_deref(),
        Some("missing_upstream")
    );
    assert!(!ctx.catalog.contains("b__out"));
    assert!(!ctx.catalog.contains("c__out"));

    // snapshot written for b only
    assert!(dir.path().join(".pipeline/failures/b.json").exists());
    assert!(!dir.path().join(".pipeline/failures/a.json").exists());
    assert!(!dir.path().join(".pipeline/failures/c.json").exists());

    assert_eq!(fx.hooks.invocation_count(HookEvent::OnFailure), before + 1);
    assert!(fx.hooks.invocation_count(HookEvent::AfterFlow) >= 1);
}

#[tokio::test]
async fn hard_failure_aborts_with_node_error() {
    let fx = fixture();
    fx.registry
        .register(Registration::new(
            "z",
            "explode",
            "mem",
            fn_method(|_| anyhow::bail!("bad value")),
        ))
        .unwrap();

    let yaml = SOFT_FAIL.replace("soft_fail: true", "soft_fail: false");
    let ctx = FlowContext::new(compile(&yaml));
    let err = fx.engine.run(&ctx).await.unwrap_err();
    match err {
        EngineError::Node { step, .. } => assert_eq!(step, "b"),
        other => panic!("unexpected error: {other}"),
    }
    // prior successful outputs stay available for inspection
    assert_eq!(ctx.catalog.get("a__raw").unwrap().as_i64(), Some(42));
}

#[tokio::test]
async fn retries_then_succeeds() {
    let fx = fixture();
    let attempts = Arc::new(AtomicUsize::new(0));
    {
        let attempts = Arc::clone(&attempts);
        fx.registry
            .register(Registration::new(
                "z",
                "flaky",
                "mem",
                fn_method(move |_| {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("transient");
                    }
                    Ok(Value::from(7))
                }),
            ))
            .unwrap();
    }

    let ctx = FlowContext::new(compile(
        r#"
pipeline:
  orchestration:
    retry_count: 2
    retry_delay: 0
  steps:
    - name: a
      component: z
      method: flaky
      outputs:
        parameters: [out]
"#,
    ));
    let result = fx.engine.run(&ctx).await.unwrap();
    assert_eq!(result.node_metrics["a"].status, NodeStatus::Completed);
    assert_eq!(result.node_metrics["a"].retries, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.catalog.get("a__out").unwrap().as_i64(), Some(7));
}

struct SlowMethod;

#[async_trait]
impl Method for SlowMethod {
    async fn call(&self, _args: MethodArgs) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn timeout_fails_the_node() {
    let fx = fixture();
    fx.registry
        .register(Registration::new("z", "slow", "mem", Arc::new(SlowMethod)))
        .unwrap();

    let ctx = FlowContext::new(compile(
        r#"
pipeline:
  orchestration:
    timeout: 1
  steps:
    - name: a
      component: z
      method: slow
"#,
    ));
    let err = fx.engine.run(&ctx).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout { ref step, .. } if step == "a"));
}

#[tokio::test]
async fn cancellation_marks_nodes_cancelled() {
    let fx = fixture();
    fx.registry
        .register(Registration::new("z", "slow", "mem", Arc::new(SlowMethod)))
        .unwrap();

    let ctx = FlowContext::new(compile(
        r#"
pipeline:
  steps:
    - name: a
      component: z
      method: slow
"#,
    ));
    let token = ctx.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let err = fx.engine.run(&ctx).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(!ctx.catalog.contains("a__out"));
}

#[tokio::test]
async fn force_bypasses_cache() {
    let fx = fixture();
    let ctx = FlowContext::new(compile(S1));
    fx.engine.run(&ctx).await.unwrap();

    let ctx2 = FlowContext::with_shared_state(
        compile(S1),
        Arc::clone(&ctx.catalog),
        Arc::clone(&ctx.signatures),
        RunOptions {
            force: true,
            ..Default::default()
        },
    );
    let result = fx.engine.run(&ctx2).await.unwrap();
    assert!(!result.node_metrics["a"].cached);
    assert!(!result.node_metrics["b"].cached);
    assert_eq!(fx.load_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn method_chain_threads_primary_input() {
    let fx = fixture();
    fx.registry
        .register(Registration::new(
            "w",
            "seed",
            "mem",
            fn_method(|_| Ok(Value::from(10))),
        ))
        .unwrap();
    fx.registry
        .register(
            Registration::new(
                "w",
                "seed",
                "alt",
                fn_method(|_| Ok(Value::from(0))),
            )
            .with_priority(-1),
        )
        .unwrap();
    fx.registry
        .register(
            Registration::new(
                "w",
                "double",
                "mem",
                fn_method(|args: MethodArgs| {
                    let prev = args
                        .primary
                        .as_ref()
                        .and_then(Value::as_i64)
                        .ok_or_else(|| anyhow::anyhow!("no chain input"))?;
                    Ok(Value::from(prev * 2))
                }),
            )
            .chain_input(),
        )
        .unwrap();

    let ctx = FlowContext::new(compile(
        r#"
pipeline:
  steps:
    - name: a
      component: w
      method: [seed, double]
      outputs:
        parameters: [out]
"#,
    ));
    let result = fx.engine.run(&ctx).await.unwrap();
    assert_eq!(result.node_metrics["a"].status, NodeStatus::Completed);
    assert_eq!(ctx.catalog.get("a__out").unwrap().as_i64(), Some(20));
}

#[tokio::test]
async fn multi_output_requires_matching_map() {
    let fx = fixture();
    fx.registry
        .register(Registration::new(
            "w",
            "split",
            "mem",
            fn_method(|_| {
                let mut map = BTreeMap::new();
                map.insert("left".to_string(), Value::from(1));
                map.insert("right".to_string(), Value::from(2));
                Ok(Value::Map(map))
            }),
        ))
        .unwrap();

    let ctx = FlowContext::new(compile(
        r#"
pipeline:
  steps:
    - name: a
      component: w
      method: split
      outputs:
        parameters: [left, right]
"#,
    ));
    fx.engine.run(&ctx).await.unwrap();
    assert_eq!(ctx.catalog.get("a__left").unwrap().as_i64(), Some(1));
    assert_eq!(ctx.catalog.get("a__right").unwrap().as_i64(), Some(2));

    // a mismatched key set is a node failure
    fx.registry
        .register(Registration::new(
            "w",
            "badsplit",
            "mem",
            fn_method(|_| Ok(Value::from(1))),
        ))
        .unwrap();
    let ctx = FlowContext::new(compile(
        r#"
pipeline:
  steps:
    - name: a
      component: w
      method: badsplit
      outputs:
        parameters: [left, right]
"#,
    ));
    let err = fx.engine.run(&ctx).await.unwrap_err();
    assert!(matches!(err, EngineError::Node { .. }));
}

#[tokio::test]
async fn resume_reruns_failed_subtree_only() {
    let fx = fixture();
    let healthy = Arc::new(AtomicUsize::new(0));
    {
        // fails on the first call, succeeds afterwards
        let healthy = Arc::clone(&healthy);
        fx.registry
            .register(Registration::new(
                "z",
                "explode",
                "mem",
                fn_method(move |args: MethodArgs| {
                    if healthy.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("first run breaks");
                    }
                    let df = args.require("df")?.as_i64().unwrap_or(0);
                    Ok(Value::from(df + 1))
                }),
            ))
            .unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let options = RunOptions {
        project_root: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let ctx = FlowContext::with_options(compile(SOFT_FAIL), options.clone());
    // soft_fail=true flow: a completes, b fails + snapshot, c skipped
    fx.engine.run(&ctx).await.unwrap();
    assert!(dir.path().join(".pipeline/failures/b.json").exists());
    let loads_before = fx.load_calls.load(Ordering::SeqCst);

    // new process: fresh catalog, resume from snapshots
    let ctx2 = FlowContext::with_options(
        compile(SOFT_FAIL),
        RunOptions {
            resume: true,
            ..options
        },
    );
    let result = fx.engine.run(&ctx2).await.unwrap();
    assert_eq!(result.status, FlowStatus::Completed);
    // a trusted from the prior run, not re-executed
    assert!(result.node_metrics["a"].cached);
    assert_eq!(fx.load_calls.load(Ordering::SeqCst), loads_before);
    // b re-ran from the snapshot's seeded upstream, c followed
    assert_eq!(ctx2.catalog.get("b__out").unwrap().as_i64(), Some(43));
    assert_eq!(ctx2.catalog.get("c__out").unwrap().as_i64(), Some(86));
    // the cleared failure leaves no snapshot behind
    assert!(!dir.path().join(".pipeline/failures/b.json").exists());
}

const FAN_IN: &str = r#"
pipeline:
  name: fan_in
  orchestration:
    soft_fail: true
  steps:
    - name: a
      component: x
      engine: mem
      method: load
      parameters: {path: in.csv}
      outputs:
        parameters: [raw]
    - name: b
      component: z
      method: explode
      parameters:
        df: steps.a.outputs.parameters.raw
      outputs:
        parameters: [out]
    - name: m
      component: x
      engine: mem
      method: load
      parameters: {path: other.csv}
      outputs:
        parameters: [raw]
    - name: d
      component: w
      method: sum
      parameters:
        left: steps.b.outputs.parameters.out
        right: steps.m.outputs.parameters.raw
      outputs:
        parameters: [total]
"#;

#[tokio::test]
async fn resume_replays_outputs_of_untouched_branches() {
    let fx = fixture();
    let healthy = Arc::new(AtomicUsize::new(0));
    {
        // fails on the first call, succeeds afterwards
        let healthy = Arc::clone(&healthy);
        fx.registry
            .register(Registration::new(
                "z",
                "explode",
                "mem",
                fn_method(move |args: MethodArgs| {
                    if healthy.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("first run breaks");
                    }
                    let df = args.require("df")?.as_i64().unwrap_or(0);
                    Ok(Value::from(df + 1))
                }),
            ))
            .unwrap();
    }
    fx.registry
        .register(Registration::new(
            "w",
            "sum",
            "mem",
            fn_method(|args: MethodArgs| {
                let left = args.require("left")?.as_i64().unwrap_or(0);
                let right = args.require("right")?.as_i64().unwrap_or(0);
                Ok(Value::from(left + right))
            }),
        ))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let options = RunOptions {
        project_root: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    // run 1: a and m succeed, b fails softly, d is skipped
    let ctx = FlowContext::with_options(compile(FAN_IN), options.clone());
    let first = fx.engine.run(&ctx).await.unwrap();
    assert_eq!(first.node_metrics["m"].status, NodeStatus::Completed);
    assert_eq!(first.node_metrics["d"].status, NodeStatus::Skipped);
    let loads_before = fx.load_calls.load(Ordering::SeqCst);

    // new process: b and d re-run; m is an untouched branch whose output
    // must come back from the persisted index, not from b's snapshot
    let ctx2 = FlowContext::with_options(
        compile(FAN_IN),
        RunOptions {
            resume: true,
            ..options
        },
    );
    let result = fx.engine.run(&ctx2).await.unwrap();
    assert_eq!(result.status, FlowStatus::Completed);
    assert!(result.node_metrics["a"].cached);
    assert!(result.node_metrics["m"].cached);
    assert_eq!(fx.load_calls.load(Ordering::SeqCst), loads_before);
    assert_eq!(ctx2.catalog.get("m__raw").unwrap().as_i64(), Some(100));
    assert_eq!(ctx2.catalog.get("b__out").unwrap().as_i64(), Some(43));
    // d sees both branches: (42+1) + 100
    assert_eq!(result.node_metrics["d"].status, NodeStatus::Completed);
    assert_eq!(ctx2.catalog.get("d__total").unwrap().as_i64(), Some(143));
}

#[tokio::test]
async fn explicit_dependency_carries_no_data() {
    let fx = fixture();
    fx.registry
        .register(Registration::new(
            "w",
            "noop",
            "mem",
            fn_method(|_| Ok(Value::from(1))),
        ))
        .unwrap();

    let ctx = FlowContext::new(compile(
        r#"
pipeline:
  steps:
    - name: first
      component: w
      method: noop
    - name: second
      component: w
      method: noop
      depends_on: [first]
      outputs:
        parameters: [out]
"#,
    ));
    let result = fx.engine.run(&ctx).await.unwrap();
    assert_eq!(result.node_metrics["second"].status, NodeStatus::Completed);
    // ordering-only edge: no dataset materialized for `first`
    assert_eq!(ctx.catalog.keys(), vec!["second__out"]);
}
