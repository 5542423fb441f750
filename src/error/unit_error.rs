//! Unit-level error types.

use thiserror::Error;

/// Host-facing errors returned by [`FunctionNode`](crate::nodes::FunctionNode).
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("Unit {0} is inert after a compile error and does not accept input")]
    Inert(String),
    #[error("Unit {0} is closed")]
    Closed(String),
    #[error("Runtime setup error: {0}")]
    Setup(String),
}

/// Raised while turning source text into a compiled script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Code too large (max {max} bytes, got {actual} bytes)")]
    CodeTooLarge { max: usize, actual: usize },
    #[error("{0}")]
    Syntax(String),
    #[error("Compiled template did not produce a function")]
    NotCallable,
    #[error("Sandbox setup failed: {0}")]
    Sandbox(String),
}

/// A produced value that cannot be forwarded downstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Function tried to send a null message on output {output}")]
    Missing { output: usize },
    #[error("Function tried to send a message of type {kind} on output {output}")]
    NotARecord { output: usize, kind: String },
}

/// Raised by an output sink while delivering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Output channel closed")]
    ChannelClosed,
    #[error("Delivery failed: {0}")]
    Sink(String),
}

/// The script asked for a capability the host keeps for itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservedCapabilityError {
    #[error("InputListenerReserved: cannot add a listener to the 'input' event")]
    InputListener,
}

/// An exception raised by one invocation, already translated into a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{diagnostic}")]
pub struct RuntimeError {
    pub diagnostic: String,
}

impl RuntimeError {
    pub fn new(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: diagnostic.into(),
        }
    }
}
