//! Runtime configuration for function units.

use serde::{Deserialize, Serialize};

use crate::core::dispatcher::DeliveryMode;

pub const ENV_ASYNC_SEND: &str = "XWORKFLOW_FUNCTION_ASYNC_SEND";
pub const ENV_ASYNC_RECEIVE: &str = "XWORKFLOW_FUNCTION_ASYNC_RECEIVE";
pub const ENV_PROFILING: &str = "XWORKFLOW_FUNCTION_PROFILING";
pub const ENV_TIMING: &str = "XWORKFLOW_FUNCTION_TIME";

/// Switches shared by every function unit of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionRuntimeConfig {
    /// Deliver each sent message on its own deferred task.
    pub async_send: bool,
    /// Defer input handling by one tick; `receive` returns before the script runs.
    pub async_receive: bool,
    /// Show accumulated invocation durations as the unit status.
    pub profiling: bool,
    /// Show the last invocation duration as the unit status.
    pub timing: bool,
    /// Minimum spacing between profiling/timing status redraws.
    pub status_interval_ms: u64,
    pub sandbox: SandboxConfig,
}

impl Default for FunctionRuntimeConfig {
    fn default() -> Self {
        Self {
            async_send: false,
            async_receive: false,
            profiling: false,
            timing: false,
            status_interval_ms: 1000,
            sandbox: SandboxConfig::default(),
        }
    }
}

impl FunctionRuntimeConfig {
    pub fn delivery_mode(&self) -> DeliveryMode {
        if self.async_send {
            DeliveryMode::Deferred
        } else {
            DeliveryMode::Immediate
        }
    }

    /// Whether invocation durations drive the visible status.
    pub fn shows_durations(&self) -> bool {
        self.profiling || self.timing
    }

    /// Apply `XWORKFLOW_FUNCTION_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_env_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_env_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| lookup(name).and_then(|v| parse_flag(&v));
        if let Some(v) = flag(ENV_ASYNC_SEND) {
            self.async_send = v;
        }
        if let Some(v) = flag(ENV_ASYNC_RECEIVE) {
            self.async_receive = v;
        }
        if let Some(v) = flag(ENV_PROFILING) {
            self.profiling = v;
        }
        if let Some(v) = flag(ENV_TIMING) {
            self.timing = v;
        }
        self
    }
}

/// Empty values are ignored; `0`/`false`/`no`/`off` disable, anything else enables.
fn parse_flag(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.to_ascii_lowercase().as_str() {
        "0" | "false" | "no" | "off" => Some(false),
        _ => Some(true),
    }
}

/// Script engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Max code length (bytes)
    pub max_code_length: usize,

    /// Max loop iterations per loop, `None` for unlimited
    pub loop_iteration_limit: Option<u64>,

    /// Max call depth
    pub recursion_limit: Option<usize>,

    /// Freeze global objects
    pub freeze_globals: bool,

    /// Allowed globals whitelist
    pub allowed_globals: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_code_length: 1_000_000, // 1MB
            loop_iteration_limit: Some(10_000_000),
            recursion_limit: Some(512),
            freeze_globals: true,
            allowed_globals: [
                "JSON",
                "Math",
                "parseInt",
                "parseFloat",
                "isNaN",
                "isFinite",
                "Number",
                "String",
                "Boolean",
                "Array",
                "Object",
                "Error",
                "TypeError",
                "RangeError",
                "ReferenceError",
                "SyntaxError",
                "encodeURIComponent",
                "decodeURIComponent",
                "encodeURI",
                "decodeURI",
                "RegExp",
                "Date",
                "Map",
                "Set",
                "Promise",
                "Symbol",
                "ArrayBuffer",
                "Uint8Array",
                "NaN",
                "Infinity",
                "undefined",
                "globalThis",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}
