//! DSL parser: converts raw YAML/JSON/TOML text into [`FlowSchema`].

use std::path::Path;

use super::schema::FlowSchema;
use crate::error::FlowError;

/// Supported DSL input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DslFormat {
    /// YAML format (`.yaml` / `.yml`).
    Yaml,
    /// JSON format (`.json`).
    Json,
    /// TOML format (`.toml`).
    Toml,
}

impl DslFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(DslFormat::Yaml),
            "json" => Some(DslFormat::Json),
            "toml" => Some(DslFormat::Toml),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// Parse DSL content into FlowSchema
pub fn parse_flow(content: &str, format: DslFormat) -> Result<FlowSchema, FlowError> {
    match format {
        DslFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| FlowError::DslParseError(e.to_string()))
        }
        DslFormat::Json => {
            serde_json::from_str(content).map_err(|e| FlowError::DslParseError(e.to_string()))
        }
        DslFormat::Toml => {
            // TOML → toml::Value → serde_json::Value, so `env` values typed as
            // serde_json::Value deserialize the same way they do from JSON.
            let toml_val: toml::Value =
                toml::from_str(content).map_err(|e| FlowError::DslParseError(e.to_string()))?;
            let json_val = toml_value_to_json(toml_val);
            serde_json::from_value(json_val).map_err(|e| FlowError::DslParseError(e.to_string()))
        }
    }
}

/// Read and parse a flow file; the format defaults to the file extension.
pub fn load_flow_file(path: &Path, format: Option<DslFormat>) -> Result<FlowSchema, FlowError> {
    let format = format
        .or_else(|| DslFormat::from_path(path))
        .ok_or_else(|| {
            FlowError::DslParseError(format!(
                "cannot infer DSL format of {}; pass it explicitly",
                path.display()
            ))
        })?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| FlowError::DslParseError(format!("{}: {}", path.display(), e)))?;
    parse_flow(&content, format)
}

/// Convert a [`toml::Value`] into a [`serde_json::Value`].
///
/// TOML has no null; `Datetime` values are stringified.
fn toml_value_to_json(val: toml::Value) -> serde_json::Value {
    match val {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_value_to_json).collect())
        }
        toml::Value::Table(tbl) => serde_json::Value::Object(
            tbl.into_iter()
                .map(|(k, v)| (k, toml_value_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
    }
}
