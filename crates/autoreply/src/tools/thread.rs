//! `thread` - fetch a post thread

use crate::error::AppError;
use crate::render;
use crate::tools::{AppContext, optional_u64, required_str};
use autoreply_mcp::{Tool, ToolContext, ToolError, ToolResult};
use serde_json::{Value, json};
use std::sync::Arc;

pub struct ThreadTool {
    ctx: Arc<AppContext>,
}

impl ThreadTool {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ThreadTool {
    fn name(&self) -> &str {
        "thread"
    }

    fn description(&self) -> &str {
        "Fetch a post and its reply tree by at:// URI"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "uri": {
                    "type": "string",
                    "description": "at:// URI of the root post",
                },
                "depth": {
                    "type": "integer",
                    "description": "Reply depth to fetch (default 6)",
                },
            },
            "required": ["uri"],
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let uri = required_str(&args, "uri")?;
        let depth = optional_u64(&args, "depth").unwrap_or(6).min(1000);

        let response = self
            .ctx
            .xrpc
            .public_query(
                &self.ctx.config.appview,
                "app.bsky.feed.getPostThread",
                &[("uri", uri), ("depth", depth.to_string())],
            )
            .await
            .map_err(AppError::from)?;

        Ok(ToolResult::text(render::thread(&response)))
    }
}
