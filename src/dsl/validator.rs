use super::schema::{FlowSchema, FUNCTION_NODE_TYPE, SUPPORTED_DSL_VERSIONS};
use crate::error::FlowError;
use std::collections::HashSet;

/// Validate a parsed FlowSchema
pub fn validate_flow_schema(schema: &FlowSchema) -> Result<(), FlowError> {
    // Check DSL version
    if !SUPPORTED_DSL_VERSIONS.contains(&schema.version.as_str()) {
        return Err(FlowError::UnsupportedVersion {
            found: schema.version.clone(),
            supported: SUPPORTED_DSL_VERSIONS.join(", "),
        });
    }

    if schema.flow.id.trim().is_empty() {
        return Err(FlowError::InvalidDefinition("flow id is empty".into()));
    }

    let mut ids = HashSet::new();
    for node in &schema.nodes {
        if node.id.trim().is_empty() {
            return Err(FlowError::InvalidDefinition("node id is empty".into()));
        }
        if !ids.insert(node.id.as_str()) {
            return Err(FlowError::DuplicateNode(node.id.clone()));
        }
        if node.node_type != FUNCTION_NODE_TYPE {
            return Err(FlowError::UnsupportedNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }
        if node.outputs == 0 {
            return Err(FlowError::InvalidDefinition(format!(
                "node {} declares no outputs",
                node.id
            )));
        }
    }

    Ok(())
}
