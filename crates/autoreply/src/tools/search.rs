//! `search` - score an account's posts against a query

use crate::error::AppError;
use crate::render;
use crate::tools::{AppContext, optional_u64, required_str};
use autoreply_identity::types::AtIdentifier;
use autoreply_mcp::{Tool, ToolContext, ToolError, ToolResult};
use autoreply_repo::records::{PostRecord, Record, RecordValue, SearchQuery, collections};
use serde_json::{Value, json};
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 25;

pub struct SearchTool {
    ctx: Arc<AppContext>,
}

impl SearchTool {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search an account's posts; matches text, link titles, and image alt text"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "account": {
                    "type": "string",
                    "description": "Handle or DID whose posts to search",
                },
                "query": {
                    "type": "string",
                    "description": "Whitespace-separated terms",
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum hits to return (default 25)",
                },
            },
            "required": ["account", "query"],
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let account = required_str(&args, "account")?;
        let query_text = required_str(&args, "query")?;
        let limit = optional_u64(&args, "limit").unwrap_or(DEFAULT_LIMIT as u64) as usize;

        let query = SearchQuery::parse(&query_text, self.ctx.config.max_query_length)
            .map_err(AppError::from)?;
        let identifier = AtIdentifier::parse(&account).map_err(AppError::from)?;
        let repo = self
            .ctx
            .provider
            .get_repo(&identifier)
            .await
            .map_err(AppError::from)?;

        let mut hits: Vec<(usize, &Record, &PostRecord)> = repo
            .records_of(collections::POST)
            .filter_map(|record| match &record.value {
                RecordValue::Post(post) => {
                    let score = query.score_post(post);
                    (score > 0).then_some((score, record, post))
                }
                _ => None,
            })
            .collect();
        // Highest score first, newest first within a score.
        hits.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.2.created_at.cmp(&a.2.created_at))
        });
        hits.truncate(limit);

        Ok(ToolResult::text(render::search_results(
            repo.did().as_str(),
            &query_text,
            &hits,
        )))
    }
}
