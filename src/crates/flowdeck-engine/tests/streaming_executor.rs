//! Integration tests for the streaming executor: init phase, tick fan-out,
//! failure isolation, and teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use flowdeck_engine::{
    Edge, Node, NodeCategory, NodeDef, NodeFactory, NodeMeta, NodeOutput, NodeRegistry, Pipeline,
    StreamingExecutor, TableEnv, TableValue,
};

/// Appends each tick's `tick` scalar to the `ticks` list in the env.
struct AccumulatorFactory {
    meta: NodeMeta,
}

impl AccumulatorFactory {
    fn new() -> Self {
        Self {
            meta: NodeMeta {
                id: "accumulator".to_string(),
                label: "Accumulator".to_string(),
                category: NodeCategory::Generic,
                description: String::new(),
                inputs: vec![],
                outputs: vec![],
                config_schema: json!({}),
            },
        }
    }
}

impl NodeFactory for AccumulatorFactory {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn create(&self) -> Box<dyn Node> {
        Box::new(AccumulatorNode)
    }
}

struct AccumulatorNode;

impl Node for AccumulatorNode {
    fn execute(
        &self,
        inputs: &NodeOutput,
        _config: &Value,
        env: Option<&TableEnv>,
    ) -> anyhow::Result<NodeOutput> {
        if let Some(env) = env {
            let mut ticks = env
                .get("ticks")
                .and_then(|v| v.as_json().cloned())
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default();
            ticks.push(inputs.scalar("tick").cloned().unwrap_or(Value::Null));
            env.set("ticks", TableValue::Json(Value::Array(ticks)));
        }
        Ok(NodeOutput::new().with_scalar("accumulated", json!(true)))
    }
}

struct FailingInitFactory {
    meta: NodeMeta,
}

impl FailingInitFactory {
    fn new() -> Self {
        Self {
            meta: NodeMeta {
                id: "failing_init".to_string(),
                label: "Failing Init".to_string(),
                category: NodeCategory::Init,
                description: String::new(),
                inputs: vec![],
                outputs: vec![],
                config_schema: json!({}),
            },
        }
    }
}

impl NodeFactory for FailingInitFactory {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn create(&self) -> Box<dyn Node> {
        Box::new(FailingInitNode)
    }
}

struct FailingInitNode;

impl Node for FailingInitNode {
    fn execute(
        &self,
        _inputs: &NodeOutput,
        _config: &Value,
        _env: Option<&TableEnv>,
    ) -> anyhow::Result<NodeOutput> {
        anyhow::bail!("init exploded")
    }
}

fn test_registry() -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::with_builtins();
    registry.register(Arc::new(AccumulatorFactory::new()));
    registry.register(Arc::new(FailingInitFactory::new()));
    Arc::new(registry)
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) {
    let end = Instant::now() + deadline;
    while !done() && Instant::now() < end {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_full_streaming_pipeline_accumulates_ticks() {
    // Init seeds `ticks`, the timer fires 5 messages, the accumulator
    // appends each one; on_tick_complete fires exactly once per message.
    let registry = test_registry();
    let pipeline = Pipeline::new(
        vec![
            NodeDef::new("init", "table_set", json!({"tables": {"ticks": []}})),
            NodeDef::new("src", "timer_source", json!({"interval_ms": 2, "count": 5})),
            NodeDef::new("acc", "accumulator", json!({})),
        ],
        vec![Edge::new("src", "acc")],
    );

    let env = Arc::new(TableEnv::new());
    let ticks_done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks_done);

    let executor = StreamingExecutor::new(registry);
    executor
        .start(
            &pipeline,
            Arc::clone(&env),
            Some(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        )
        .unwrap();
    assert!(executor.is_running());

    wait_until(Duration::from_secs(2), || {
        ticks_done.load(Ordering::SeqCst) >= 5
    });
    executor.stop();

    let ticks = env.get("ticks").unwrap().as_json().cloned().unwrap();
    assert_eq!(ticks, json!([0, 1, 2, 3, 4]));
    assert_eq!(ticks_done.load(Ordering::SeqCst), 5);
}

#[test]
fn test_start_without_init_nodes() {
    let registry = test_registry();
    let pipeline = Pipeline::new(
        vec![
            NodeDef::new("src", "timer_source", json!({"interval_ms": 2, "count": 2})),
            NodeDef::new("acc", "accumulator", json!({})),
        ],
        vec![Edge::new("src", "acc")],
    );

    let env = Arc::new(TableEnv::new());
    let executor = StreamingExecutor::new(registry);
    executor
        .start(&pipeline, Arc::clone(&env), None, None)
        .unwrap();

    wait_until(Duration::from_secs(2), || {
        env.get("ticks")
            .and_then(|v| v.as_json().cloned())
            .and_then(|v| v.as_array().map(|a| a.len()))
            .unwrap_or(0)
            >= 2
    });
    executor.stop();
    assert!(!executor.is_running());
}

#[test]
fn test_start_with_no_sources_stays_idle() {
    let registry = test_registry();
    let pipeline = Pipeline::new(
        vec![NodeDef::new(
            "init",
            "table_set",
            json!({"tables": {"ready": true}}),
        )],
        vec![],
    );

    let env = Arc::new(TableEnv::new());
    let executor = StreamingExecutor::new(registry);
    executor
        .start(&pipeline, Arc::clone(&env), None, None)
        .unwrap();
    assert!(executor.is_running());
    assert_eq!(env.get("ready").unwrap().as_json(), Some(&json!(true)));
    executor.stop();
}

#[test]
fn test_init_failure_aborts_start() {
    let registry = test_registry();
    let pipeline = Pipeline::new(
        vec![
            NodeDef::new("bad_init", "failing_init", json!({})),
            NodeDef::new("src", "timer_source", json!({"interval_ms": 2, "count": 100})),
            NodeDef::new("acc", "accumulator", json!({})),
        ],
        vec![Edge::new("src", "acc")],
    );

    let env = Arc::new(TableEnv::new());
    let failures: Arc<parking_lot::Mutex<Vec<String>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);

    let executor = StreamingExecutor::new(registry);
    let on_init_error = move |node: &str, _err: &flowdeck_engine::EngineError| {
        sink.lock().push(node.to_string());
    };
    executor
        .start(&pipeline, Arc::clone(&env), None, Some(&on_init_error))
        .unwrap();

    assert_eq!(failures.lock().clone(), vec!["bad_init"]);
    assert!(!executor.is_running());

    // No source was subscribed: no ticks ever arrive.
    std::thread::sleep(Duration::from_millis(50));
    assert!(env.get("ticks").is_none());

    // stop() on a never-started executor is a no-op.
    executor.stop();
    executor.stop();
}

#[test]
fn test_start_twice_is_rejected() {
    let registry = test_registry();
    let pipeline = Pipeline::new(
        vec![NodeDef::new(
            "src",
            "timer_source",
            json!({"interval_ms": 50, "count": 1000}),
        )],
        vec![],
    );

    let env = Arc::new(TableEnv::new());
    let executor = StreamingExecutor::new(registry);
    executor
        .start(&pipeline, Arc::clone(&env), None, None)
        .unwrap();
    let err = executor
        .start(&pipeline, Arc::clone(&env), None, None)
        .unwrap_err();
    assert!(matches!(err, flowdeck_engine::EngineError::AlreadyRunning));
    executor.stop();

    // After stop, a fresh start succeeds again.
    executor
        .start(&pipeline, Arc::clone(&env), None, None)
        .unwrap();
    executor.stop();
}

#[test]
fn test_ticks_are_serialized() {
    // Two sources share one pipeline; the accumulator list must contain
    // every message exactly once; tick bodies never interleave.
    let registry = test_registry();
    let pipeline = Pipeline::new(
        vec![
            NodeDef::new("init", "table_set", json!({"tables": {"ticks": []}})),
            NodeDef::new("s1", "timer_source", json!({"interval_ms": 1, "count": 10})),
            NodeDef::new("s2", "timer_source", json!({"interval_ms": 1, "count": 10})),
            NodeDef::new("acc", "accumulator", json!({})),
        ],
        vec![Edge::new("s1", "acc"), Edge::new("s2", "acc")],
    );

    let env = Arc::new(TableEnv::new());
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completed);
    let executor = StreamingExecutor::new(registry);
    executor
        .start(
            &pipeline,
            Arc::clone(&env),
            Some(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        )
        .unwrap();

    wait_until(Duration::from_secs(2), || {
        completed.load(Ordering::SeqCst) >= 20
    });
    executor.stop();

    let ticks = env.get("ticks").unwrap().as_json().cloned().unwrap();
    assert_eq!(ticks.as_array().unwrap().len(), 20);
    assert_eq!(completed.load(Ordering::SeqCst), 20);
}
