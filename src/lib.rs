//! # xworkflow-function: sandboxed JavaScript function units
//!
//! `xworkflow-function` runs user-supplied JavaScript fragments as processing
//! units of a message flow. Each unit compiles its source once inside an
//! embedded [Boa](https://boajs.dev) engine and then handles one message at a
//! time, with:
//!
//! - **A capability context**: `node`, `context`, `flow`, `global`, `env` and
//!   timer functions are the only host surface the script can reach.
//! - **Output dispatch**: results are validated per output channel, tagged with
//!   the triggering message's `_msgid` and delivered immediately or one task
//!   per message.
//! - **Timers**: every `setTimeout`/`setInterval` handle is tracked and cancelled
//!   when the unit closes.
//! - **Diagnostics**: script errors become one-line messages with a best-effort
//!   `(line N, col M)` location.
//! - **Flow DSL**: YAML, JSON or TOML flow definitions.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use xworkflow_function::{parse_flow, DslFormat, FlowRunner, Message};
//!
//! #[tokio::main]
//! async fn main() {
//!     let yaml = std::fs::read_to_string("flow.yaml").unwrap();
//!     let schema = parse_flow(&yaml, DslFormat::Yaml).unwrap();
//!     let mut runner = FlowRunner::builder(schema).deploy().await.unwrap();
//!     let mut events = runner.take_events().unwrap();
//!
//!     let msg = Message::from_value(serde_json::json!({"payload": 1})).unwrap();
//!     runner.receive("fn1", msg).await.unwrap();
//!     println!("{:?}", events.recv().await);
//!     runner.close_all().await.unwrap();
//! }
//! ```

pub mod api;
pub mod config;
pub mod core;
pub mod dsl;
pub mod error;
pub mod nodes;
pub mod sandbox;

pub use crate::api::{FlowRunner, FlowRunnerBuilder};
pub use crate::config::{FunctionRuntimeConfig, SandboxConfig};
pub use crate::core::{
    ContextScope, ContextStore, InMemoryContextStore, Message, NodeStatus, OutputSet,
    OutputSink, UnitEvent,
};
pub use crate::dsl::{load_flow_file, parse_flow, DslFormat, FlowInfo, FlowSchema, UnitDefinition};
pub use crate::error::{CompileError, ErrorCode, FlowError, UnitError};
pub use crate::nodes::{CloseReport, FunctionNode, UnitServices, UnitSnapshot};
