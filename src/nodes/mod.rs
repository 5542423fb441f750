pub mod execution;
pub mod function_node;
pub mod profiling;

pub use execution::{CloseReport, ExecutionHandler, UnitSetup, UnitSnapshot, DURATION_METRIC};
pub use function_node::{FunctionNode, UnitCommand, UnitServices};
pub use profiling::{ProfilingStats, StatusThrottle};
