//! Error types for pipeline construction and execution

use thiserror::Error;

/// Errors produced by the engine.
///
/// Node implementations report failures as [`anyhow::Error`]; the executors
/// wrap them in [`EngineError::NodeFailed`] together with the offending
/// node id.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A node references a type id the registry does not know
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    /// The pipeline document is malformed (dangling edge, duplicate id, …)
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A cycle was found in an executed subgraph
    #[error("cycle detected in subgraph: {nodes:?}")]
    Cycle { nodes: Vec<String> },

    /// A node's `execute` returned an error
    #[error("node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        source: anyhow::Error,
    },

    /// `start` was called on a streaming executor that is already running
    #[error("streaming executor is already running; call stop() first")]
    AlreadyRunning,
}

impl EngineError {
    /// The id of the node this error is attributed to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            EngineError::NodeFailed { node, .. } => Some(node),
            _ => None,
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
