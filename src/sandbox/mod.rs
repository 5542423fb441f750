//! Script Sandbox Module
//!
//! Everything that touches the JavaScript engine: compiling a unit's source
//! into a callable, the capability context bound into it, its timers, value
//! conversion and the translation of raised errors into diagnostics.

pub mod capability;
pub mod compiler;
pub mod convert;
pub mod error_translator;
pub mod prelude;
pub mod timers;

pub use capability::{
    build_capabilities, invocation_callbacks, Capabilities, Invocation, StoreTarget,
    TimerCallback, UnitInfo, UnitScope, Waker,
};
pub use compiler::{CodeCompiler, CompiledScript};
pub use convert::JsonBridge;
pub use error_translator::{translate, Thrown};
pub use timers::{TimerId, TimerRegistry};
