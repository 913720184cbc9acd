//! The node contract
//!
//! Every node type ships a static [`NodeMeta`] descriptor and a factory.
//! Processing nodes implement [`Node`]; stream sources additionally expose
//! the [`StreamSource`] lifecycle, which the streaming executor drives
//! instead of `execute`. `execute` stays defined for sources so the graph
//! can be inspected uniformly (it returns an empty output).
//!
//! Dataflow between nodes is a [`NodeOutput`]: an explicit pair of an
//! optional table handle (the `df` slot) and a JSON scalar map. Inputs are
//! built by merging upstream outputs in topological order; later writes win
//! for duplicate keys, and a later `df` replaces an earlier one.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::env::TableEnv;
use crate::table::TableRef;

/// Streaming partition key for node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Runs once when a streaming pipeline starts
    Init,
    /// Delivers messages asynchronously; drives the reactive subgraph
    StreamSource,
    /// Fires the pipeline from outside (e.g. a cron schedule)
    Trigger,
    /// Terminal presentation node
    Output,
    /// Ordinary processing node
    Generic,
}

impl NodeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeCategory::Init => "init",
            NodeCategory::StreamSource => "stream_source",
            NodeCategory::Trigger => "trigger",
            NodeCategory::Output => "output",
            NodeCategory::Generic => "generic",
        }
    }
}

/// A named input or output port. Ports document shape only; they carry no
/// typing; dataflow is the merged [`NodeOutput`] mapping.
#[derive(Debug, Clone, Serialize)]
pub struct Port {
    pub name: String,
    pub description: String,
}

impl Port {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Static descriptor for a node type.
#[derive(Debug, Clone, Serialize)]
pub struct NodeMeta {
    pub id: String,
    pub label: String,
    pub category: NodeCategory,
    pub description: String,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub config_schema: Value,
}

/// The value a node produces: an optional opaque table plus JSON scalars.
///
/// The table never crosses the wire: [`NodeOutput::to_wire`] serializes
/// the scalars only.
#[derive(Clone, Default)]
pub struct NodeOutput {
    pub df: Option<TableRef>,
    pub scalars: Map<String, Value>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output consisting of scalar fields only.
    pub fn from_scalars(scalars: Map<String, Value>) -> Self {
        Self {
            df: None,
            scalars,
        }
    }

    /// Builder-style scalar insertion.
    pub fn with_scalar(mut self, key: impl Into<String>, value: Value) -> Self {
        self.scalars.insert(key.into(), value);
        self
    }

    pub fn with_table(mut self, table: TableRef) -> Self {
        self.df = Some(table);
        self
    }

    pub fn scalar(&self, key: &str) -> Option<&Value> {
        self.scalars.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.df.is_none() && self.scalars.is_empty()
    }

    /// Merge `other` into `self`; `other` wins on duplicate keys and on a
    /// populated `df` slot. Callers apply upstream outputs in topological
    /// order so "later node wins" holds.
    pub fn merge(&mut self, other: &NodeOutput) {
        if let Some(table) = &other.df {
            self.df = Some(Arc::clone(table));
        }
        for (key, value) in &other.scalars {
            self.scalars.insert(key.clone(), value.clone());
        }
    }

    /// Wire form: the scalar map with the table handle stripped.
    pub fn to_wire(&self) -> Value {
        Value::Object(self.scalars.clone())
    }
}

impl fmt::Debug for NodeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeOutput")
            .field("df", &self.df.as_ref().map(|t| t.len()))
            .field("scalars", &self.scalars)
            .finish()
    }
}

/// A processing node.
///
/// `env` is supplied only by the streaming executor; batch nodes must
/// tolerate `None`. Failures are reported by returning an error; the
/// engine does not roll back `env` writes made before the failure.
pub trait Node: Send + Sync {
    fn execute(
        &self,
        inputs: &NodeOutput,
        config: &Value,
        env: Option<&TableEnv>,
    ) -> anyhow::Result<NodeOutput>;
}

/// Callback a stream source invokes for each message, possibly from a
/// source-owned thread.
pub type MessageCallback = Arc<dyn Fn(NodeOutput) + Send + Sync>;

/// Lifecycle of a stream-source node.
pub trait StreamSource: Send {
    /// Connect and configure. Called once before `subscribe`.
    fn setup(&mut self, config: &Value) -> anyhow::Result<()>;

    /// Begin delivery. The callback may be invoked from any thread.
    fn subscribe(&mut self, callback: MessageCallback) -> anyhow::Result<()>;

    /// Stop delivery and disconnect. Must be idempotent.
    fn unsubscribe(&mut self);
}

/// Factory for a node type: descriptor plus instance construction.
///
/// Types whose category is [`NodeCategory::StreamSource`] must also return
/// a source from `create_source`.
pub trait NodeFactory: Send + Sync {
    fn meta(&self) -> &NodeMeta;

    fn create(&self) -> Box<dyn Node>;

    fn create_source(&self) -> Option<Box<dyn StreamSource>> {
        None
    }
}

impl std::fmt::Debug for dyn NodeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFactory").field("id", &self.meta().id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MemTable;
    use serde_json::json;

    fn scalars(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_merge_later_key_wins() {
        let mut inputs = NodeOutput::from_scalars(scalars(json!({"x": 1, "y": 2})));
        let other = NodeOutput::from_scalars(scalars(json!({"x": 10, "z": 3})));
        inputs.merge(&other);
        assert_eq!(inputs.scalar("x"), Some(&json!(10)));
        assert_eq!(inputs.scalar("y"), Some(&json!(2)));
        assert_eq!(inputs.scalar("z"), Some(&json!(3)));
    }

    #[test]
    fn test_merge_replaces_table() {
        let first = MemTable::from_records(&[scalars(json!({"a": 1}))]).unwrap();
        let second = MemTable::from_records(&[scalars(json!({"a": 2})), scalars(json!({"a": 3}))])
            .unwrap();
        let mut inputs = NodeOutput::new().with_table(Arc::new(first));
        inputs.merge(&NodeOutput::new().with_table(Arc::new(second)));
        assert_eq!(inputs.df.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_to_wire_strips_table() {
        let table = MemTable::from_records(&[scalars(json!({"a": 1}))]).unwrap();
        let output = NodeOutput::new()
            .with_table(Arc::new(table))
            .with_scalar("rows", json!(1));
        assert_eq!(output.to_wire(), json!({"rows": 1}));
    }
}
