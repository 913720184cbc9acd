//! Core graph model and execution engines for flowdeck
//!
//! A pipeline is a DAG of typed nodes. This crate owns the document model,
//! the node contract, and the two execution models that share it:
//!
//! - [`PipelineExecutor`] runs a pipeline once, in topological order, with
//!   optional progress hooks and partial re-execution.
//! - [`StreamingExecutor`] splits the same graph into a one-shot init
//!   subgraph and a reactive subgraph driven by stream sources; every
//!   source message runs the downstream chain as one serialized tick
//!   against a shared [`TableEnv`].
//!
//! Running streaming pipelines are tracked in a [`PublishRegistry`] so the
//! dashboard layer can find their environments by key.

pub mod env;
pub mod error;
pub mod executor;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod pipeline;
pub mod publish;
pub mod registry;
pub mod streaming;
pub mod table;

pub use env::{TableEnv, TableValue};
pub use error::{EngineError, Result};
pub use executor::{PipelineExecutor, RunHooks, RunOptions};
pub use node::{
    MessageCallback, Node, NodeCategory, NodeFactory, NodeMeta, NodeOutput, Port, StreamSource,
};
pub use pipeline::{Edge, NodeDef, Pipeline};
pub use publish::{PublishEntry, PublishRegistry};
pub use registry::NodeRegistry;
pub use streaming::{StreamingExecutor, TickCallback};
pub use table::{MemTable, Table, TableRef};
