//! `post` - create a post, optionally as a reply

use crate::error::{AppError, ErrorCode};
use crate::tools::{AppContext, optional_str, required_str};
use autoreply_mcp::{Tool, ToolContext, ToolError, ToolResult};
use serde_json::{Value, json};
use std::sync::Arc;

pub struct PostTool {
    ctx: Arc<AppContext>,
}

impl PostTool {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Look up `{uri, cid, record}` for a post via the appview
    pub(crate) async fn fetch_post(
        ctx: &AppContext,
        uri: &str,
    ) -> Result<Value, AppError> {
        let response = ctx
            .xrpc
            .public_query(
                &ctx.config.appview,
                "app.bsky.feed.getPosts",
                &[("uris", uri.to_string())],
            )
            .await
            .map_err(AppError::from)?;
        response["posts"]
            .as_array()
            .and_then(|posts| posts.first())
            .cloned()
            .ok_or_else(|| AppError::new(ErrorCode::NotFound, format!("post not found: {uri}")))
    }
}

#[async_trait::async_trait]
impl Tool for PostTool {
    fn name(&self) -> &str {
        "post"
    }

    fn description(&self) -> &str {
        "Publish a post from the active account, optionally replying to a post"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Post text (300 characters max)",
                },
                "reply_to": {
                    "type": "string",
                    "description": "at:// URI of the post to reply to",
                },
                "account": {
                    "type": "string",
                    "description": "Handle to post as (default account when omitted)",
                },
            },
            "required": ["text"],
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let text = required_str(&args, "text")?;
        if text.chars().count() > 300 {
            return Err(AppError::invalid_input("post text exceeds 300 characters").into());
        }
        let account = optional_str(&args, "account");
        let creds = self.ctx.valid_credentials(account.as_deref()).await?;

        let mut record = json!({
            "$type": "app.bsky.feed.post",
            "text": text,
            "createdAt": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        });

        if let Some(reply_to) = optional_str(&args, "reply_to") {
            let parent = Self::fetch_post(&self.ctx, &reply_to).await?;
            let parent_ref = json!({"uri": parent["uri"], "cid": parent["cid"]});
            // The thread root is inherited from the parent when it is
            // itself a reply; otherwise the parent is the root.
            let root_ref = parent["record"]["reply"]["root"]
                .as_object()
                .map(|root| json!({"uri": root["uri"], "cid": root["cid"]}))
                .unwrap_or_else(|| parent_ref.clone());
            record["reply"] = json!({"root": root_ref, "parent": parent_ref});
        }

        let response = self
            .ctx
            .xrpc
            .procedure(
                &creds,
                "com.atproto.repo.createRecord",
                &json!({
                    "repo": creds.did,
                    "collection": "app.bsky.feed.post",
                    "record": record,
                }),
            )
            .await
            .map_err(AppError::from)?;

        let uri = response["uri"].as_str().unwrap_or("(unknown)");
        Ok(ToolResult::text(format!(
            "Posted as @{}:\n\n`{}`\n",
            creds.handle, uri
        )))
    }
}
