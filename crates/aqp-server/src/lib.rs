//! AQP server and evaluator support
//!
//! Configuration, logging, the question-answering service and its MCP front
//! end, shared by the `aqp-server` and `aqp-eval` binaries.

pub mod config;
pub mod logging;
pub mod mcp;
pub mod query;
pub mod setup;

pub use config::{Config, ConfigError};
pub use mcp::AqpServerHandler;
pub use query::{QueryError, QueryResponse, QueryService};
