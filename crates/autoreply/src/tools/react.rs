//! `react` - like, unlike, repost, and delete records

use crate::error::{AppError, ErrorCode};
use crate::tools::post::PostTool;
use crate::tools::{AppContext, AtUri, optional_str, string_list};
use autoreply_auth::Credentials;
use autoreply_mcp::{Tool, ToolContext, ToolError, ToolResult};
use serde_json::{Value, json};
use std::sync::Arc;

const LIKE_COLLECTION: &str = "app.bsky.feed.like";
const REPOST_COLLECTION: &str = "app.bsky.feed.repost";

pub struct ReactTool {
    ctx: Arc<AppContext>,
}

impl ReactTool {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Create a like/repost record pointing at a post
    async fn create_reaction(
        &self,
        creds: &Credentials,
        collection: &str,
        target_uri: &str,
    ) -> Result<String, AppError> {
        let post = PostTool::fetch_post(&self.ctx, target_uri).await?;
        let record = json!({
            "$type": collection,
            "subject": {"uri": post["uri"], "cid": post["cid"]},
            "createdAt": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        });
        let response = self
            .ctx
            .xrpc
            .procedure(
                creds,
                "com.atproto.repo.createRecord",
                &json!({
                    "repo": creds.did,
                    "collection": collection,
                    "record": record,
                }),
            )
            .await
            .map_err(AppError::from)?;
        Ok(response["uri"].as_str().unwrap_or_default().to_string())
    }

    /// Find the caller's like of a post and delete it
    async fn delete_reaction(
        &self,
        creds: &Credentials,
        collection: &str,
        target_uri: &str,
    ) -> Result<(), AppError> {
        let mut cursor: Option<String> = None;
        // listRecords pages are bounded; stop after a sane number of pages
        // rather than walking an entire large repository.
        for _ in 0..20 {
            let mut params: Vec<(&str, String)> = vec![
                ("repo", creds.did.clone()),
                ("collection", collection.to_string()),
                ("limit", "100".to_string()),
            ];
            if let Some(cursor) = &cursor {
                params.push(("cursor", cursor.clone()));
            }
            let response = self
                .ctx
                .xrpc
                .query(creds, "com.atproto.repo.listRecords", &params)
                .await
                .map_err(AppError::from)?;

            for record in response["records"].as_array().into_iter().flatten() {
                if record["value"]["subject"]["uri"].as_str() == Some(target_uri) {
                    let record_uri = record["uri"].as_str().unwrap_or_default();
                    let parsed = AtUri::parse(record_uri)?;
                    self.delete_record(creds, &parsed).await?;
                    return Ok(());
                }
            }
            cursor = response["cursor"].as_str().map(String::from);
            if cursor.is_none() {
                break;
            }
        }
        Err(AppError::new(
            ErrorCode::NotFound,
            format!("no {collection} record for {target_uri}"),
        ))
    }

    async fn delete_record(&self, creds: &Credentials, uri: &AtUri) -> Result<(), AppError> {
        self.ctx
            .xrpc
            .procedure(
                creds,
                "com.atproto.repo.deleteRecord",
                &json!({
                    "repo": creds.did,
                    "collection": uri.collection,
                    "rkey": uri.rkey,
                }),
            )
            .await
            .map_err(AppError::from)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Tool for ReactTool {
    fn name(&self) -> &str {
        "react"
    }

    fn description(&self) -> &str {
        "Like, unlike, repost, or delete posts by at:// URI"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "like": {"type": "array", "items": {"type": "string"}},
                "unlike": {"type": "array", "items": {"type": "string"}},
                "repost": {"type": "array", "items": {"type": "string"}},
                "delete": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "at:// URIs of own records to delete",
                },
                "account": {"type": "string"},
            },
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let likes = string_list(&args, "like");
        let unlikes = string_list(&args, "unlike");
        let reposts = string_list(&args, "repost");
        let deletes = string_list(&args, "delete");
        if likes.is_empty() && unlikes.is_empty() && reposts.is_empty() && deletes.is_empty() {
            return Err(AppError::invalid_input(
                "nothing to do: pass like/unlike/repost/delete URIs",
            )
            .into());
        }

        let account = optional_str(&args, "account");
        let creds = self.ctx.valid_credentials(account.as_deref()).await?;
        let mut lines = Vec::new();

        for uri in &likes {
            let like_uri = self.create_reaction(&creds, LIKE_COLLECTION, uri).await?;
            lines.push(format!("liked {uri} (`{like_uri}`)"));
        }
        for uri in &unlikes {
            self.delete_reaction(&creds, LIKE_COLLECTION, uri).await?;
            lines.push(format!("unliked {uri}"));
        }
        for uri in &reposts {
            let repost_uri = self
                .create_reaction(&creds, REPOST_COLLECTION, uri)
                .await?;
            lines.push(format!("reposted {uri} (`{repost_uri}`)"));
        }
        for uri in &deletes {
            let parsed = AtUri::parse(uri)?;
            if parsed.authority != creds.did && parsed.authority != creds.handle {
                return Err(AppError::invalid_input(format!(
                    "can only delete own records, not {uri}"
                ))
                .into());
            }
            self.delete_record(&creds, &parsed).await?;
            lines.push(format!("deleted {uri}"));
        }

        Ok(ToolResult::text(lines.join("\n")))
    }
}
