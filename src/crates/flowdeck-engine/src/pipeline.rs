//! Pipeline document model and validation
//!
//! A pipeline is the JSON-shaped document the editor saves: a list of typed
//! nodes, a list of directed edges, and a `published` flag used to restore
//! streaming pipelines at boot. Validation rejects structural problems at
//! save time rather than at start time: dangling edges, duplicate ids,
//! unknown node types, and cycles in any subgraph an executor would run.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::graph;
use crate::node::NodeCategory;
use crate::registry::NodeRegistry;

/// A single node instance in a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    /// Unique id within the pipeline
    pub id: String,
    /// Node type id, resolved through the [`NodeRegistry`]
    #[serde(rename = "type")]
    pub node_type: String,
    /// Free-form configuration validated by the node itself
    #[serde(default)]
    pub config: Value,
}

impl NodeDef {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config,
        }
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A user-defined data-flow pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pipeline {
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Whether a streaming pipeline should be running; drives restore-on-boot
    #[serde(default)]
    pub published: bool,
}

impl Pipeline {
    pub fn new(nodes: Vec<NodeDef>, edges: Vec<Edge>) -> Self {
        Self {
            nodes,
            edges,
            published: false,
        }
    }

    /// All node ids, in declaration order.
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Structural validation, run on the save path.
    ///
    /// Checks edge endpoints, self-loops, duplicate ids, and node type
    /// resolution, then pre-checks the subgraphs the executors will run
    /// (init-only, processing-only, and the full graph) for cycles. The
    /// executors repeat the cycle check at start as a backstop, since a
    /// stored document can predate validation.
    pub fn validate(&self, registry: &NodeRegistry) -> Result<()> {
        let mut ids: HashSet<&str> = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(EngineError::InvalidPipeline(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        for edge in &self.edges {
            if !ids.contains(edge.source.as_str()) {
                return Err(EngineError::InvalidPipeline(format!(
                    "edge source '{}' is not a node in the pipeline",
                    edge.source
                )));
            }
            if !ids.contains(edge.target.as_str()) {
                return Err(EngineError::InvalidPipeline(format!(
                    "edge target '{}' is not a node in the pipeline",
                    edge.target
                )));
            }
            if edge.source == edge.target {
                return Err(EngineError::InvalidPipeline(format!(
                    "self-loop on node '{}'",
                    edge.source
                )));
            }
        }

        let mut init: BTreeSet<String> = BTreeSet::new();
        let mut processing: BTreeSet<String> = BTreeSet::new();
        let mut all: BTreeSet<String> = BTreeSet::new();
        for node in &self.nodes {
            let factory = registry.get(&node.node_type)?;
            all.insert(node.id.clone());
            match factory.meta().category {
                NodeCategory::Init => {
                    init.insert(node.id.clone());
                }
                NodeCategory::StreamSource => {}
                _ => {
                    processing.insert(node.id.clone());
                }
            }
        }

        graph::topo_sort(&init, &self.edges)?;
        graph::topo_sort(&processing, &self.edges)?;
        graph::topo_sort(&all, &self.edges)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> NodeRegistry {
        NodeRegistry::with_builtins()
    }

    fn grid(id: &str) -> NodeDef {
        NodeDef::new(id, "grid", json!({}))
    }

    #[test]
    fn test_document_round_trip() {
        let doc = json!({
            "nodes": [
                {"id": "a", "type": "http_request", "config": {"url": "http://x"}},
                {"id": "b", "type": "grid"},
            ],
            "edges": [{"source": "a", "target": "b"}],
            "published": true,
        });
        let pipeline: Pipeline = serde_json::from_value(doc).unwrap();
        assert_eq!(pipeline.nodes.len(), 2);
        assert_eq!(pipeline.nodes[1].config, Value::Null);
        assert!(pipeline.published);

        let back = serde_json::to_value(&pipeline).unwrap();
        assert_eq!(back["nodes"][0]["type"], "http_request");
    }

    #[test]
    fn test_validate_rejects_dangling_edge() {
        let pipeline = Pipeline::new(vec![grid("a")], vec![Edge::new("a", "ghost")]);
        let err = pipeline.validate(&registry()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPipeline(_)));
    }

    #[test]
    fn test_validate_rejects_self_loop() {
        let pipeline = Pipeline::new(vec![grid("a")], vec![Edge::new("a", "a")]);
        assert!(pipeline.validate(&registry()).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let pipeline = Pipeline::new(vec![grid("a"), grid("a")], vec![]);
        assert!(pipeline.validate(&registry()).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_type() {
        let pipeline = Pipeline::new(vec![NodeDef::new("a", "nope", json!({}))], vec![]);
        let err = pipeline.validate(&registry()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownNodeType(_)));
    }

    #[test]
    fn test_validate_rejects_processing_cycle() {
        let pipeline = Pipeline::new(
            vec![grid("a"), grid("b")],
            vec![Edge::new("a", "b"), Edge::new("b", "a")],
        );
        let err = pipeline.validate(&registry()).unwrap_err();
        assert!(matches!(err, EngineError::Cycle { .. }));
    }

    #[test]
    fn test_validate_accepts_dag() {
        let pipeline = Pipeline::new(
            vec![grid("a"), grid("b"), grid("c")],
            vec![Edge::new("a", "b"), Edge::new("a", "c")],
        );
        pipeline.validate(&registry()).unwrap();
    }
}
