//! Tool registry
//!
//! Name-keyed registry populated at startup. Schemas are declared once and
//! serve both `tools/list` for remote clients and flag binding for the CLI
//! dispatch; nothing is registered dynamically at runtime.

use crate::transport::ToolContext;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Structured tool failure carried to the JSON-RPC boundary.
///
/// `code` is a stable taxonomy identifier (e.g. `NotFound`, `AuthRequired`)
/// surfaced as the error `data.code`; the message is human-readable and
/// never contains secret material.
#[derive(Debug, Clone)]
pub struct ToolError {
    pub code: String,
    pub message: String,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ToolError {}

/// One content item in a tool result
#[derive(Debug, Clone)]
pub enum ToolContent {
    Text(String),
}

impl ToolContent {
    fn to_value(&self) -> Value {
        match self {
            ToolContent::Text(text) => json!({"type": "text", "text": text}),
        }
    }
}

/// Successful tool output
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    /// Soft failure: rendered to the user instead of raised as an error
    /// (used e.g. when an elicitation is declined)
    pub is_error: bool,
}

impl ToolResult {
    /// Plain text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(text.into())],
            is_error: false,
        }
    }

    /// Text result flagged as a (non-fatal) error for the client
    pub fn soft_error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(text.into())],
            is_error: true,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut result = json!({
            "content": self.content.iter().map(ToolContent::to_value).collect::<Vec<_>>(),
        });
        if self.is_error {
            result["isError"] = Value::Bool(true);
        }
        result
    }

    /// Concatenated text content (CLI rendering)
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text(text) => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A callable tool with a declared JSON Schema
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError>;
}

/// Name-keyed tool registry
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; later registrations with the same name replace
    /// earlier ones.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Tool descriptors for `tools/list`
    pub fn descriptors(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "inputSchema": tool.input_schema(),
                })
            })
            .collect()
    }

    /// Invoke a tool by name
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::new("NotFound", format!("unknown tool: {name}")))?;
        tool.call(args, ctx).await
    }
}
