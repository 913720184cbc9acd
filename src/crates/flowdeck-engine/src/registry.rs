//! Node type registry
//!
//! Resolves a node's `type` string to its factory. The built-in set covers
//! the node types the server ships with; embedders register their own
//! factories on top.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::node::{NodeFactory, NodeMeta};
use crate::nodes;

/// Registry of node-type descriptors and factories.
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in node types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for factory in nodes::builtin_factories() {
            registry.register(factory);
        }
        registry
    }

    /// Register a factory under its descriptor id. Re-registering an id
    /// replaces the previous factory.
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        self.factories.insert(factory.meta().id.clone(), factory);
    }

    /// Resolve a type id to its factory.
    pub fn get(&self, type_id: &str) -> Result<&Arc<dyn NodeFactory>> {
        self.factories
            .get(type_id)
            .ok_or_else(|| EngineError::UnknownNodeType(type_id.to_string()))
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }

    /// All descriptors, sorted by type id for stable listings.
    pub fn descriptors(&self) -> Vec<NodeMeta> {
        let mut metas: Vec<NodeMeta> = self
            .factories
            .values()
            .map(|f| f.meta().clone())
            .collect();
        metas.sort_by(|a, b| a.id.cmp(&b.id));
        metas
    }
}
