use crate::filesystem::FsError;
use crate::{Diagnostic, NodeError, NodeSpec};
use bundlegraph_cache::CacheStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleGraphError {
    #[error("malformed graph: {0}")]
    MalformedGraph(String),
    #[error("cycle detected at node '{node_id}': {}", .path.join(" -> "))]
    CycleDetected { node_id: String, path: Vec<String> },
    #[error(transparent)]
    NodeConfiguration(#[from] NodeConfigurationError),
    #[error(transparent)]
    NodeRuntime(#[from] NodeRuntimeError),
    #[error(transparent)]
    AggregateRun(#[from] AggregateRunError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Cache(#[from] CacheStoreError),
    #[error(transparent)]
    FileSystem(#[from] FsError),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl BundleGraphError {
    /// Owning node id for node-scoped failures.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::CycleDetected { node_id, .. } => Some(node_id),
            Self::NodeConfiguration(error) => Some(&error.node_id),
            Self::NodeRuntime(error) => Some(&error.node_id),
            _ => None,
        }
    }
}

/// Setup-phase validation failure of a single node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{node_name} ({node_id}): {message}")]
pub struct NodeConfigurationError {
    pub node_id: String,
    pub node_name: String,
    pub message: String,
}

impl NodeConfigurationError {
    pub fn new(node: &NodeSpec, message: impl Into<String>) -> Self {
        Self {
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            message: message.into(),
        }
    }
}

/// Run-phase failure of a single node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{node_name} ({node_id}): {message}")]
pub struct NodeRuntimeError {
    pub node_id: String,
    pub node_name: String,
    pub message: String,
}

impl NodeRuntimeError {
    pub fn new(node: &NodeSpec, message: impl Into<String>) -> Self {
        Self {
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            message: message.into(),
        }
    }
}

pub fn configuration_error(node: &NodeSpec, message: impl Into<String>) -> BundleGraphError {
    BundleGraphError::NodeConfiguration(NodeConfigurationError::new(node, message))
}

pub fn runtime_error(node: &NodeSpec, message: impl Into<String>) -> BundleGraphError {
    BundleGraphError::NodeRuntime(NodeRuntimeError::new(node, message))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("run failed with {} node error(s)", .errors.len())]
pub struct AggregateRunError {
    pub errors: Vec<NodeError>,
}

#[derive(Debug, Error, Clone)]
#[error("validation failed with {errors_count} error(s)")]
pub struct ValidationError {
    pub diagnostics: Vec<Diagnostic>,
    pub errors_count: usize,
}

impl ValidationError {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        let errors_count = diagnostics.iter().filter(|d| d.is_error()).count();
        Self {
            diagnostics,
            errors_count,
        }
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.message.clone())
            .collect()
    }
}
