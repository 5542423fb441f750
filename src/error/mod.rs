//! Error types for the function runtime.
//!
//! - [`UnitError`] — Host-facing errors of a deployed unit.
//! - [`CompileError`], [`RuntimeError`], [`ValidationError`], [`DeliveryError`],
//!   [`ReservedCapabilityError`] — The script-facing error taxonomy.
//! - [`FlowError`] — Flow definition loading and flow-level orchestration.
//! - [`ErrorContext`] — Structured error metadata (code, severity).

pub mod error_context;
pub mod flow_error;
pub mod unit_error;

pub use error_context::{ErrorCode, ErrorContext, ErrorSeverity};
pub use flow_error::FlowError;
pub use unit_error::{
    CompileError, DeliveryError, ReservedCapabilityError, RuntimeError, UnitError,
    ValidationError,
};

/// Convenience alias for unit-level results.
pub type UnitResult<T> = Result<T, UnitError>;
/// Convenience alias for flow-level results.
pub type FlowResult<T> = Result<T, FlowError>;
