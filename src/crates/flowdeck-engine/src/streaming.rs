//! Streaming pipeline executor
//!
//! Drives pipelines whose messages originate from stream sources instead of
//! a one-shot invocation. Lifecycle:
//!
//! 1. Partition nodes by category into init / stream-source / processing.
//! 2. Topo-sort and execute the init subgraph once, synchronously, against
//!    the shared [`TableEnv`]. Any failure stops startup before a single
//!    source is subscribed.
//! 3. Precompute the processing chain and, per source, the set of
//!    processing nodes reachable from it.
//! 4. Subscribe to each source; every delivered message runs the reachable
//!    chain as one tick under the executor's tick lock, so ticks never
//!    overlap, across all sources of the pipeline.
//! 5. `stop()` unsubscribes every source; in-flight ticks run to completion.
//!
//! Per-tick failures are isolated: the tick aborts, `on_tick_complete` does
//! not fire, and the next message proceeds. Env writes made before the
//! failure persist; the environment is not transactional.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::env::TableEnv;
use crate::error::{EngineError, Result};
use crate::graph;
use crate::node::{NodeCategory, NodeOutput, StreamSource};
use crate::pipeline::{NodeDef, Pipeline};
use crate::registry::NodeRegistry;

/// Invoked after every successful tick, outside the tick lock.
pub type TickCallback = Arc<dyn Fn(&TableEnv) + Send + Sync>;

struct TickState {
    env: Arc<TableEnv>,
    nodes: HashMap<String, NodeDef>,
    chain_order: Vec<String>,
    chain_upstream: HashMap<String, Vec<String>>,
    /// Direct source -> processing edges
    source_direct: HashMap<String, Vec<String>>,
    /// Processing nodes reachable from each source
    source_reachable: HashMap<String, HashSet<String>>,
    on_tick_complete: Option<TickCallback>,
}

/// Executor for streaming pipelines: init phase, then subscribe-driven loop.
///
/// Constructed behind an `Arc`; source callbacks hold a weak reference
/// back to the executor so a dropped pipeline tears down cleanly.
pub struct StreamingExecutor {
    weak_self: Weak<StreamingExecutor>,
    registry: Arc<NodeRegistry>,
    running: AtomicBool,
    sources: Mutex<Vec<Box<dyn StreamSource>>>,
    tick: Mutex<Option<TickState>>,
}

impl StreamingExecutor {
    pub fn new(registry: Arc<NodeRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            registry,
            running: AtomicBool::new(false),
            sources: Mutex::new(Vec::new()),
            tick: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the pipeline.
    ///
    /// Returns `Err` for configuration problems (unknown node type, cycle,
    /// already running). Init-phase and source failures are reported
    /// through `on_init_error` instead: the executor stays stopped, no
    /// source remains subscribed, and `start` returns `Ok`.
    pub fn start(
        &self,
        pipeline: &Pipeline,
        env: Arc<TableEnv>,
        on_tick_complete: Option<TickCallback>,
        on_init_error: Option<&dyn Fn(&str, &EngineError)>,
    ) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }

        match self.start_inner(pipeline, env, on_tick_complete, on_init_error) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn start_inner(
        &self,
        pipeline: &Pipeline,
        env: Arc<TableEnv>,
        on_tick_complete: Option<TickCallback>,
        on_init_error: Option<&dyn Fn(&str, &EngineError)>,
    ) -> Result<()> {
        let nodes: HashMap<String, NodeDef> = pipeline
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();

        let mut init_ids: BTreeSet<String> = BTreeSet::new();
        let mut source_ids: BTreeSet<String> = BTreeSet::new();
        let mut processing_ids: BTreeSet<String> = BTreeSet::new();
        for def in nodes.values() {
            let factory = self.registry.get(&def.node_type)?;
            match factory.meta().category {
                NodeCategory::Init => init_ids.insert(def.id.clone()),
                NodeCategory::StreamSource => source_ids.insert(def.id.clone()),
                _ => processing_ids.insert(def.id.clone()),
            };
        }

        // Init subgraph, once, synchronously.
        let (init_order, init_upstream) = graph::topo_sort(&init_ids, &pipeline.edges)?;
        let mut init_outputs: HashMap<String, NodeOutput> = HashMap::new();
        for id in &init_order {
            let def = &nodes[id];
            let factory = self.registry.get(&def.node_type)?;
            let mut inputs = NodeOutput::new();
            if let Some(predecessors) = init_upstream.get(id) {
                for up in predecessors {
                    if let Some(output) = init_outputs.get(up) {
                        inputs.merge(output);
                    }
                }
            }
            match factory.create().execute(&inputs, &def.config, Some(&env)) {
                Ok(output) => {
                    init_outputs.insert(id.clone(), output);
                }
                Err(err) => {
                    let err = EngineError::NodeFailed {
                        node: id.clone(),
                        source: err,
                    };
                    tracing::error!(node = %id, error = %err, "init node failed; pipeline not started");
                    if let Some(cb) = on_init_error {
                        cb(id, &err);
                    }
                    self.running.store(false, Ordering::SeqCst);
                    return Ok(());
                }
            }
        }

        // Processing chain and per-source reachability.
        let (chain_order, chain_upstream) = graph::topo_sort(&processing_ids, &pipeline.edges)?;

        let mut source_direct: HashMap<String, Vec<String>> = HashMap::new();
        let mut processing_downstream: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &pipeline.edges {
            if source_ids.contains(&edge.source) && processing_ids.contains(&edge.target) {
                source_direct
                    .entry(edge.source.clone())
                    .or_default()
                    .push(edge.target.clone());
            }
            if processing_ids.contains(&edge.source) && processing_ids.contains(&edge.target) {
                processing_downstream
                    .entry(edge.source.clone())
                    .or_default()
                    .push(edge.target.clone());
            }
        }

        let mut source_reachable: HashMap<String, HashSet<String>> = HashMap::new();
        for id in &source_ids {
            let starts = source_direct.get(id).cloned().unwrap_or_default();
            source_reachable.insert(id.clone(), graph::reachable(&starts, &processing_downstream));
        }

        *self.tick.lock() = Some(TickState {
            env: Arc::clone(&env),
            nodes: nodes.clone(),
            chain_order,
            chain_upstream,
            source_direct,
            source_reachable,
            on_tick_complete,
        });

        // Subscribe each source; a failure here tears down what came before
        // and is reported like an init failure.
        for id in &source_ids {
            let def = &nodes[id];
            let factory = self.registry.get(&def.node_type)?;
            let result = factory
                .create_source()
                .ok_or_else(|| {
                    EngineError::InvalidPipeline(format!(
                        "node type '{}' is categorized stream_source but provides no source",
                        def.node_type
                    ))
                })
                .and_then(|mut source| {
                    source.setup(&def.config).map_err(|err| EngineError::NodeFailed {
                        node: id.clone(),
                        source: err,
                    })?;
                    let weak = self.weak_self.clone();
                    let source_id = id.clone();
                    source
                        .subscribe(Arc::new(move |message| {
                            if let Some(this) = weak.upgrade() {
                                this.on_message(&source_id, message);
                            }
                        }))
                        .map_err(|err| EngineError::NodeFailed {
                            node: id.clone(),
                            source: err,
                        })?;
                    Ok(source)
                });

            match result {
                Ok(source) => self.sources.lock().push(source),
                Err(err) => {
                    tracing::error!(node = %id, error = %err, "stream source failed; pipeline not started");
                    self.teardown_sources();
                    *self.tick.lock() = None;
                    if let Some(cb) = on_init_error {
                        cb(id, &err);
                    }
                    self.running.store(false, Ordering::SeqCst);
                    return Ok(());
                }
            }
        }

        tracing::info!(
            init = init_order.len(),
            sources = source_ids.len(),
            processing = processing_ids.len(),
            "streaming pipeline started"
        );
        Ok(())
    }

    /// Stop all sources and mark the executor stopped. Idempotent and safe
    /// from any thread; does not preempt an in-flight tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.teardown_sources();
        *self.tick.lock() = None;
    }

    fn teardown_sources(&self) {
        let mut sources = self.sources.lock();
        for source in sources.iter_mut() {
            source.unsubscribe();
        }
        sources.clear();
    }

    /// One tick: run every processing node reachable from `source_id`, in
    /// chain order, under the tick lock.
    fn on_message(&self, source_id: &str, message: NodeOutput) {
        if !self.is_running() {
            return;
        }

        let mut completion: Option<(TickCallback, Arc<TableEnv>)> = None;
        {
            let guard = self.tick.lock();
            let Some(state) = guard.as_ref() else {
                return;
            };

            let empty = HashSet::new();
            let reachable = state.source_reachable.get(source_id).unwrap_or(&empty);
            let direct: &[String] = state
                .source_direct
                .get(source_id)
                .map(|targets| targets.as_slice())
                .unwrap_or(&[]);

            let mut outputs: HashMap<String, NodeOutput> = HashMap::new();
            outputs.insert(source_id.to_string(), message);

            let mut tick_ok = true;
            for id in &state.chain_order {
                if !reachable.contains(id) {
                    continue;
                }
                let def = &state.nodes[id];
                let factory = match self.registry.get(&def.node_type) {
                    Ok(factory) => factory,
                    Err(err) => {
                        tracing::error!(node = %id, error = %err, "node type vanished mid-run; aborting tick");
                        tick_ok = false;
                        break;
                    }
                };

                let mut inputs = NodeOutput::new();
                if let Some(predecessors) = state.chain_upstream.get(id) {
                    for up in predecessors {
                        if let Some(output) = outputs.get(up) {
                            inputs.merge(output);
                        }
                    }
                }
                if direct.contains(id) {
                    if let Some(msg) = outputs.get(source_id) {
                        inputs.merge(msg);
                    }
                }

                match factory.create().execute(&inputs, &def.config, Some(&state.env)) {
                    Ok(output) => {
                        outputs.insert(id.clone(), output);
                    }
                    Err(err) => {
                        tracing::error!(node = %id, error = %err, "streaming node failed; aborting tick");
                        tick_ok = false;
                        break;
                    }
                }
            }

            if tick_ok {
                if let Some(cb) = &state.on_tick_complete {
                    completion = Some((Arc::clone(cb), Arc::clone(&state.env)));
                }
            }
        }

        // Callback runs outside the lock; a panicking subscriber must not
        // take the pipeline down.
        if let Some((cb, env)) = completion {
            if catch_unwind(AssertUnwindSafe(|| cb(&env))).is_err() {
                tracing::error!("on_tick_complete callback panicked");
            }
        }
    }
}
