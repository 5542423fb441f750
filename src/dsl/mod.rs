pub mod parser;
pub mod schema;
pub mod validator;

pub use parser::{load_flow_file, parse_flow, DslFormat};
pub use schema::*;
pub use validator::validate_flow_schema;
