//! `profile` - fetch an account's profile from its repository

use crate::error::AppError;
use crate::render;
use crate::tools::{AppContext, required_str};
use autoreply_identity::types::AtIdentifier;
use autoreply_mcp::{Tool, ToolContext, ToolError, ToolResult};
use serde_json::{Value, json};
use std::sync::Arc;

pub struct ProfileTool {
    ctx: Arc<AppContext>,
}

impl ProfileTool {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ProfileTool {
    fn name(&self) -> &str {
        "profile"
    }

    fn description(&self) -> &str {
        "Fetch a Bluesky account's profile (display name, bio, record counts)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "account": {
                    "type": "string",
                    "description": "Handle (alice.bsky.social) or DID (did:plc:...)",
                },
            },
            "required": ["account"],
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let account = required_str(&args, "account")?;
        let identifier = AtIdentifier::parse(&account).map_err(AppError::from)?;
        let repo = self
            .ctx
            .provider
            .get_repo_with_max_age(&identifier, Some(self.ctx.config.profile_ttl_hours))
            .await
            .map_err(AppError::from)?;
        Ok(ToolResult::text(render::profile(&repo)))
    }
}
