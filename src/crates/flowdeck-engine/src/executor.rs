//! Batch pipeline executor
//!
//! Runs a whole pipeline once on the caller's thread, in topological order
//! (Kahn's algorithm, lexicographic tie-break). Each node receives the
//! ordered union of its upstream outputs; on duplicate keys the output of
//! the later node (by topological position) wins, the same merge policy
//! the streaming executor applies per tick.
//!
//! Partial re-execution: when `start_from` is set, nodes that are neither
//! `start_from` nor one of its descendants reuse the output cached under
//! `session_id` from a previous run instead of executing again.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::graph;
use crate::node::{NodeCategory, NodeOutput};
use crate::pipeline::Pipeline;
use crate::registry::NodeRegistry;

/// Cached outputs are kept for at most this many sessions.
const SESSION_CACHE_CAP: usize = 32;

/// Progress callbacks for a batch run.
///
/// `on_node_done` receives the wire form of the output (table stripped).
/// Hooks fire only around actual `execute` calls; reused cached outputs are
/// silent.
#[derive(Default)]
pub struct RunHooks {
    pub on_node_start: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_node_done: Option<Box<dyn Fn(&str, &Value) + Send + Sync>>,
    pub on_node_error: Option<Box<dyn Fn(&str, &EngineError) + Send + Sync>>,
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Cache key for partial re-execution across runs
    pub session_id: Option<String>,
    /// Re-execute this node and its descendants; reuse cached outputs for
    /// everything else
    pub start_from: Option<String>,
}

struct SessionCache {
    order: VecDeque<String>,
    outputs: HashMap<String, BTreeMap<String, NodeOutput>>,
}

impl SessionCache {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            outputs: HashMap::new(),
        }
    }

    fn get(&self, session: &str) -> Option<&BTreeMap<String, NodeOutput>> {
        self.outputs.get(session)
    }

    fn store(&mut self, session: String, outputs: BTreeMap<String, NodeOutput>) {
        if !self.outputs.contains_key(&session) {
            self.order.push_back(session.clone());
            while self.order.len() > SESSION_CACHE_CAP {
                if let Some(evicted) = self.order.pop_front() {
                    self.outputs.remove(&evicted);
                }
            }
        }
        self.outputs.insert(session, outputs);
    }
}

/// One-shot topological executor for batch pipelines.
pub struct PipelineExecutor {
    registry: Arc<NodeRegistry>,
    sessions: Mutex<SessionCache>,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            sessions: Mutex::new(SessionCache::new()),
        }
    }

    /// Run the pipeline to completion; returns outputs keyed by node id.
    ///
    /// The run aborts on the first node failure: `on_node_error` fires and
    /// the error propagates. A pipeline containing a stream-source node is
    /// rejected up front; those pipelines are published, not batch-run.
    pub fn run(
        &self,
        pipeline: &Pipeline,
        hooks: &RunHooks,
        options: &RunOptions,
    ) -> Result<BTreeMap<String, NodeOutput>> {
        let mut ids: BTreeSet<String> = BTreeSet::new();
        for node in &pipeline.nodes {
            let factory = self.registry.get(&node.node_type)?;
            if factory.meta().category == NodeCategory::StreamSource {
                return Err(EngineError::InvalidPipeline(format!(
                    "stream source node '{}' cannot run in batch mode; publish the pipeline instead",
                    node.id
                )));
            }
            ids.insert(node.id.clone());
        }
        for edge in &pipeline.edges {
            if !ids.contains(&edge.source) || !ids.contains(&edge.target) {
                return Err(EngineError::InvalidPipeline(format!(
                    "edge {} -> {} references a missing node",
                    edge.source, edge.target
                )));
            }
        }

        let (order, upstream) = graph::topo_sort(&ids, &pipeline.edges)?;

        // Nodes that must actually execute; everything else may reuse the
        // session cache when start_from is in play.
        let recompute: Option<HashSet<String>> = match &options.start_from {
            Some(start) if ids.contains(start) => {
                let mut downstream: HashMap<String, Vec<String>> = HashMap::new();
                for edge in &pipeline.edges {
                    downstream
                        .entry(edge.source.clone())
                        .or_default()
                        .push(edge.target.clone());
                }
                Some(graph::reachable(&[start.clone()], &downstream))
            }
            Some(start) => {
                return Err(EngineError::InvalidPipeline(format!(
                    "start_from node '{start}' is not in the pipeline"
                )))
            }
            None => None,
        };

        let cached: BTreeMap<String, NodeOutput> = match (&options.session_id, &recompute) {
            (Some(session), Some(_)) => self
                .sessions
                .lock()
                .get(session)
                .cloned()
                .unwrap_or_default(),
            _ => BTreeMap::new(),
        };

        let mut outputs: BTreeMap<String, NodeOutput> = BTreeMap::new();
        for id in &order {
            let reuse = recompute
                .as_ref()
                .map_or(false, |set| !set.contains(id))
                && cached.contains_key(id);
            if reuse {
                outputs.insert(id.clone(), cached[id].clone());
                continue;
            }

            let def = pipeline.node(id).expect("id from pipeline");
            let factory = self.registry.get(&def.node_type)?;

            let mut inputs = NodeOutput::new();
            if let Some(predecessors) = upstream.get(id) {
                for up in predecessors {
                    if let Some(output) = outputs.get(up) {
                        inputs.merge(output);
                    }
                }
            }

            if let Some(cb) = &hooks.on_node_start {
                cb(id);
            }
            match factory.create().execute(&inputs, &def.config, None) {
                Ok(output) => {
                    if let Some(cb) = &hooks.on_node_done {
                        cb(id, &output.to_wire());
                    }
                    outputs.insert(id.clone(), output);
                }
                Err(err) => {
                    let err = EngineError::NodeFailed {
                        node: id.clone(),
                        source: err,
                    };
                    if let Some(cb) = &hooks.on_node_error {
                        cb(id, &err);
                    }
                    return Err(err);
                }
            }
        }

        if let Some(session) = &options.session_id {
            self.sessions
                .lock()
                .store(session.clone(), outputs.clone());
        }
        Ok(outputs)
    }
}
