//! `login`, `accounts`, `logout` - account management
//!
//! Under MCP, missing login fields are elicited from the client; decline
//! and cancel come back as ordinary results telling the user how to retry,
//! and nothing is stored. On the CLI, missing fields are plain input
//! errors.

use crate::error::AppError;
use crate::tools::{AppContext, optional_bool, optional_str};
use autoreply_mcp::{ElicitOutcome, Tool, ToolContext, ToolError, ToolResult};
use serde_json::{Value, json};
use std::sync::Arc;
use url::Url;

/// Outcome of asking the client for a missing field
enum Asked {
    Content(Value),
    /// Client said no; carry the result the tool should return
    Refused(ToolResult),
    /// No transport, or client lacks elicitation support
    Unavailable,
}

async fn ask(ctx: &ToolContext, message: &str, field: &str) -> Result<Asked, ToolError> {
    let Some(elicitor) = ctx.elicitor() else {
        return Ok(Asked::Unavailable);
    };
    if !elicitor.supports_elicitation() {
        return Ok(Asked::Unavailable);
    }
    let schema = json!({
        "type": "object",
        "properties": {field: {"type": "string"}},
        "required": [field],
    });
    let outcome = elicitor
        .request_elicitation(message, schema)
        .await
        .map_err(|e| ToolError::new("Cancelled", e.to_string()))?;
    Ok(match outcome {
        ElicitOutcome::Accept(content) => Asked::Content(content),
        ElicitOutcome::Decline => Asked::Refused(ToolResult::soft_error(
            "Login declined. Run the login tool again with `handle` (and `password`, \
             or `oauth: true`) to sign in.",
        )),
        ElicitOutcome::Cancel => Asked::Refused(ToolResult::soft_error(
            "Login cancelled. Run the login tool again when ready.",
        )),
    })
}

pub struct LoginTool {
    ctx: Arc<AppContext>,
}

impl LoginTool {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for LoginTool {
    fn name(&self) -> &str {
        "login"
    }

    fn description(&self) -> &str {
        "Sign in with an app password, or via OAuth in the browser"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "handle": {"type": "string", "description": "Account handle"},
                "password": {
                    "type": "string",
                    "description": "App password (ignored with oauth)",
                },
                "oauth": {
                    "type": "boolean",
                    "description": "Use the browser OAuth flow instead of a password",
                },
                "service": {
                    "type": "string",
                    "description": "PDS URL for password login (default https://bsky.social)",
                },
            },
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let use_oauth = optional_bool(&args, "oauth");

        let handle = match optional_str(&args, "handle") {
            Some(handle) => handle,
            None => match ask(ctx, "Which account (handle) do you want to log in as?", "handle")
                .await?
            {
                Asked::Content(content) => content["handle"]
                    .as_str()
                    .map(String::from)
                    .ok_or_else(|| AppError::invalid_input("elicited reply had no handle"))?,
                Asked::Refused(result) => return Ok(result),
                Asked::Unavailable => {
                    return Err(AppError::invalid_input("missing required argument `handle`").into());
                }
            },
        };

        let creds = if use_oauth {
            self.ctx.oauth.login(&handle).await.map_err(AppError::from)?
        } else {
            let password = match optional_str(&args, "password") {
                Some(password) => password,
                None => match ask(
                    ctx,
                    &format!(
                        "App password for @{handle} (create one under Settings → App Passwords)"
                    ),
                    "password",
                )
                .await?
                {
                    Asked::Content(content) => content["password"]
                        .as_str()
                        .map(String::from)
                        .ok_or_else(|| {
                            AppError::invalid_input("elicited reply had no password")
                        })?,
                    Asked::Refused(result) => return Ok(result),
                    Asked::Unavailable => {
                        return Err(AppError::invalid_input(
                            "missing required argument `password` (or pass oauth: true)",
                        )
                        .into());
                    }
                },
            };
            let service = match optional_str(&args, "service") {
                Some(raw) => Url::parse(&raw)
                    .map_err(|e| AppError::invalid_input(format!("bad service URL: {e}")))?,
                None => self.ctx.config.default_service.clone(),
            };
            self.ctx
                .sessions
                .login(&handle, &password, &service)
                .await
                .map_err(AppError::from)?
        };

        self.ctx.vault.store(&creds).map_err(AppError::from)?;
        let is_default = self
            .ctx
            .vault
            .get_default()
            .map_err(AppError::from)?
            .as_deref()
            == Some(creds.handle.as_str());

        Ok(ToolResult::text(format!(
            "Logged in as **@{}** (`{}`)\n- auth: {}\n- default account: {}\n",
            creds.handle,
            creds.did,
            if creds.is_dpop_bound() {
                "OAuth (DPoP-bound)"
            } else {
                "app password"
            },
            if is_default { "yes" } else { "no" },
        )))
    }
}

pub struct AccountsTool {
    ctx: Arc<AppContext>,
}

impl AccountsTool {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for AccountsTool {
    fn name(&self) -> &str {
        "accounts"
    }

    fn description(&self) -> &str {
        "List stored accounts, or switch the default account"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "default": {
                    "type": "string",
                    "description": "Handle to make the default account",
                },
            },
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        if let Some(handle) = optional_str(&args, "default") {
            self.ctx.vault.set_default(&handle).map_err(AppError::from)?;
            return Ok(ToolResult::text(format!("Default account: @{handle}")));
        }

        let handles = self.ctx.vault.list().map_err(AppError::from)?;
        if handles.is_empty() {
            return Ok(ToolResult::text("No accounts stored. Use the login tool."));
        }
        let default = self.ctx.vault.get_default().map_err(AppError::from)?;
        let mut out = String::from("# Accounts\n\n");
        for handle in &handles {
            let marker = if default.as_deref() == Some(handle) {
                " (default)"
            } else {
                ""
            };
            out.push_str(&format!("- @{handle}{marker}\n"));
        }
        Ok(ToolResult::text(out))
    }
}

pub struct LogoutTool {
    ctx: Arc<AppContext>,
}

impl LogoutTool {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for LogoutTool {
    fn name(&self) -> &str {
        "logout"
    }

    fn description(&self) -> &str {
        "Remove a stored account (the default account when none is named)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "handle": {"type": "string"},
            },
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let handle = match optional_str(&args, "handle") {
            Some(handle) => handle,
            None => self
                .ctx
                .vault
                .get_default()
                .map_err(AppError::from)?
                .ok_or_else(|| {
                    AppError::invalid_input("no default account; pass a handle to remove")
                })?,
        };
        // Surface a clean NotFound before mutating anything.
        self.ctx.vault.get(&handle).map_err(AppError::from)?;
        self.ctx.vault.delete(&handle).map_err(AppError::from)?;
        Ok(ToolResult::text(format!("Removed credentials for @{handle}")))
    }
}
