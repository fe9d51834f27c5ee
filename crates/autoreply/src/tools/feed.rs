//! `feed` - read a feed generator or the authenticated timeline

use crate::error::AppError;
use crate::render;
use crate::tools::{AppContext, optional_str, optional_u64};
use autoreply_mcp::{Tool, ToolContext, ToolError, ToolResult};
use serde_json::{Value, json};
use std::sync::Arc;

pub struct FeedTool {
    ctx: Arc<AppContext>,
}

impl FeedTool {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for FeedTool {
    fn name(&self) -> &str {
        "feed"
    }

    fn description(&self) -> &str {
        "Read a feed by at:// URI (public), or the home timeline when logged in"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "feed": {
                    "type": "string",
                    "description": "at:// URI of a feed generator; omit for the home timeline",
                },
                "cursor": {"type": "string"},
                "limit": {"type": "integer"},
            },
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let cursor = optional_str(&args, "cursor");
        let limit = optional_u64(&args, "limit").unwrap_or(30).min(100);

        let mut params: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(cursor) = &cursor {
            params.push(("cursor", cursor.clone()));
        }

        let response = match optional_str(&args, "feed") {
            Some(feed_uri) => {
                params.push(("feed", feed_uri));
                self.ctx
                    .xrpc
                    .public_query(&self.ctx.config.appview, "app.bsky.feed.getFeed", &params)
                    .await
                    .map_err(AppError::from)?
            }
            None => {
                let creds = self.ctx.valid_credentials(None).await?;
                self.ctx
                    .xrpc
                    .query(&creds, "app.bsky.feed.getTimeline", &params)
                    .await
                    .map_err(AppError::from)?
            }
        };

        Ok(ToolResult::text(render::feed(&response)))
    }
}
