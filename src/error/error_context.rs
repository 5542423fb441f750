use serde::{Deserialize, Serialize};

/// Error severity marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    Error,
    Fatal,
}

/// Error classification code carried by every unit error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed source at construction time; the unit is inert.
    CompileError,
    /// Exception raised by one invocation or by a timer/close callback.
    RuntimeError,
    /// Exception raised while a deferred delivery executed.
    DeliveryError,
    /// A produced value could not be forwarded.
    ValidationError,
    /// The script tried to use a capability reserved by the host.
    ReservedCapability,
    /// The state-store backing failed.
    ContextStoreError,
}

impl ErrorCode {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ErrorCode::CompileError => ErrorSeverity::Fatal,
            ErrorCode::ValidationError => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Structured error context attached to error events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub code: ErrorCode,
    pub severity: ErrorSeverity,
    pub message: String,
}

impl ErrorContext {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.severity(),
            message: message.into(),
        }
    }
}
