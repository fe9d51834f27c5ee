//! Model Context Protocol plumbing for autoreply
//!
//! Line-delimited JSON-RPC 2.0 over stdio with bidirectional routing:
//! client requests dispatch into the tool registry, while server-initiated
//! elicitation requests suspend the asking tool until the client replies.
//!
//! - [`protocol`] - frame types and error codes
//! - [`transport`] - the stdio loop, pending-response map, elicitation
//! - [`registry`] - the `Tool` trait and name-keyed registry

pub mod error;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use error::{McpError, Result};
pub use registry::{Tool, ToolContent, ToolError, ToolRegistry, ToolResult};
pub use transport::{ElicitOutcome, ElicitationHandle, McpServer, ServerInfo, ToolContext};
