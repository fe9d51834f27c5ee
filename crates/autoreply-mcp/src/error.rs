//! Transport-level errors

/// Errors surfaced by the MCP transport itself (not tool failures)
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum McpError {
    /// Stdio read or write failed
    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be serialized
    #[error("frame serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The peer went away while a request was pending
    #[error("transport closed while awaiting a response")]
    Closed,

    /// The surrounding operation was cancelled
    #[error("cancelled")]
    Cancelled,

    /// The client answered an elicitation with a malformed payload
    #[error("malformed elicitation response: {0}")]
    BadElicitation(String),
}

pub type Result<T> = std::result::Result<T, McpError>;
