//! Flow-level error types.

use thiserror::Error;

use super::UnitError;

/// Errors raised while loading a flow definition or driving its units.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("DSL parse error: {0}")]
    DslParseError(String),
    #[error("Unsupported DSL version: {found} (supported: {supported})")]
    UnsupportedVersion { found: String, supported: String },
    #[error("Invalid flow definition: {0}")]
    InvalidDefinition(String),
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Unsupported node type '{node_type}' for node {node_id}")]
    UnsupportedNodeType { node_id: String, node_type: String },
    #[error("Unit error: {0}")]
    Unit(Box<UnitError>),
}

impl From<UnitError> for FlowError {
    fn from(value: UnitError) -> Self {
        FlowError::Unit(Box::new(value))
    }
}
