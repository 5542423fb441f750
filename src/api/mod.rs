//! Public API layer: stable entry points for embedding a flow in-process.

mod runner;

pub use runner::{FlowRunner, FlowRunnerBuilder};
