use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::config::FunctionRuntimeConfig;

// ================================
// Flow DSL Schema
// ================================

/// Current supported DSL version
pub const CURRENT_DSL_VERSION: &str = "0.1.0";

/// All supported DSL versions
pub const SUPPORTED_DSL_VERSIONS: &[&str] = &["0.1.0"];

/// Type tag of a function unit
pub const FUNCTION_NODE_TYPE: &str = "function";

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FlowSchema {
    /// DSL version string, e.g. "0.1.0"
    #[serde(default = "default_version")]
    pub version: String,
    pub flow: FlowInfo,
    /// Switches shared by every unit of the flow
    #[serde(default)]
    pub runtime: FunctionRuntimeConfig,
    pub nodes: Vec<UnitDefinition>,
}

fn default_version() -> String {
    CURRENT_DSL_VERSION.to_string()
}

/// The flow a unit belongs to: identity, plus the variables `env.get` reads.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct FlowInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub env: HashMap<String, Value>,
}

/// One unit in the DSL.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct UnitDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    /// Script source
    #[serde(default)]
    pub func: String,
    /// Number of declared output channels
    #[serde(default = "default_outputs")]
    pub outputs: usize,
}

fn default_node_type() -> String {
    FUNCTION_NODE_TYPE.to_string()
}

fn default_outputs() -> usize {
    1
}

impl UnitDefinition {
    pub fn function(id: impl Into<String>, func: impl Into<String>, outputs: usize) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type: default_node_type(),
            func: func.into(),
            outputs,
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}
