//! Tool implementations
//!
//! Every tool holds an [`AppContext`] handle; the same implementations are
//! invoked by the MCP dispatcher and by the CLI, with elicitation available
//! only when a live transport sits behind the call.

pub mod feed;
pub mod login;
pub mod post;
pub mod profile;
pub mod react;
pub mod search;
pub mod thread;

use crate::config::Config;
use crate::error::{AppError, Result};
use autoreply_auth::{
    Credentials, CredentialVault, OAuthConfig, OAuthEngine, SessionManager, XrpcClient,
};
use autoreply_identity::{IdentityResolver, ResolverOptions};
use autoreply_mcp::ToolRegistry;
use autoreply_repo::fetch::ArchiveFetcher;
use autoreply_repo::provider::RepoProvider;
use autoreply_repo::store::ArchiveStore;
use serde_json::Value;
use std::sync::Arc;

/// Shared state injected into every tool at construction. There are no
/// process-wide singletons; main builds exactly one of these.
pub struct AppContext {
    pub config: Config,
    pub provider: RepoProvider<IdentityResolver, ArchiveFetcher>,
    pub vault: CredentialVault,
    pub sessions: SessionManager,
    pub oauth: OAuthEngine,
    pub xrpc: XrpcClient,
}

impl AppContext {
    /// Build the full component graph. Any failure here is
    /// `InitializationFailed`; nothing panics on construction.
    pub fn init(config: Config) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("autoreply/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::initialization(format!("http client: {e}")))?;

        let resolver =
            IdentityResolver::new(http.clone(), ResolverOptions::default()).with_system_dns();
        let store = ArchiveStore::open_default()
            .map_err(|e| AppError::initialization(format!("archive store: {e}")))?;
        let fetcher = ArchiveFetcher::new(http.clone(), config.download_timeout);
        let provider = RepoProvider::new(
            resolver.clone(),
            fetcher,
            store,
            config.cache_ttl_hours,
        );
        let vault = CredentialVault::open()
            .map_err(|e| AppError::initialization(format!("credential vault: {e}")))?;
        let sessions = SessionManager::new(http.clone());
        let oauth = OAuthEngine::new(http.clone(), resolver, OAuthConfig::default());
        let xrpc = XrpcClient::new(http);

        Ok(Arc::new(Self {
            config,
            provider,
            vault,
            sessions,
            oauth,
            xrpc,
        }))
    }

    /// Credentials for the named (or default) account, refreshed if close
    /// to expiry; a successful refresh is persisted back to the vault.
    pub async fn valid_credentials(&self, handle: Option<&str>) -> Result<Credentials> {
        let stored = self.vault.resolve_account(handle)?;
        let valid = self.sessions.ensure_valid(stored).await?;
        self.vault.store(&valid)?;
        Ok(valid)
    }
}

/// Register every tool; consumed by both the MCP server and CLI dispatch.
pub fn build_registry(ctx: Arc<AppContext>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(profile::ProfileTool::new(ctx.clone())));
    registry.register(Arc::new(search::SearchTool::new(ctx.clone())));
    registry.register(Arc::new(feed::FeedTool::new(ctx.clone())));
    registry.register(Arc::new(thread::ThreadTool::new(ctx.clone())));
    registry.register(Arc::new(post::PostTool::new(ctx.clone())));
    registry.register(Arc::new(react::ReactTool::new(ctx.clone())));
    registry.register(Arc::new(login::LoginTool::new(ctx.clone())));
    registry.register(Arc::new(login::AccountsTool::new(ctx.clone())));
    registry.register(Arc::new(login::LogoutTool::new(ctx)));
    registry
}

// Argument extraction helpers shared by the tools

pub(crate) fn required_str(args: &Value, name: &str) -> Result<String> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| AppError::invalid_input(format!("missing required argument `{name}`")))
}

pub(crate) fn optional_str(args: &Value, name: &str) -> Option<String> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub(crate) fn optional_bool(args: &Value, name: &str) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(false)
}

pub(crate) fn optional_u64(args: &Value, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

pub(crate) fn string_list(args: &Value, name: &str) -> Vec<String> {
    args.get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// A parsed `at://` record URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub authority: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| AppError::invalid_input(format!("not an at:// URI: {uri}")))?;
        let mut parts = rest.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(authority), Some(collection), Some(rkey))
                if !authority.is_empty() && !collection.is_empty() && !rkey.is_empty() =>
            {
                Ok(Self {
                    authority: authority.to_string(),
                    collection: collection.to_string(),
                    rkey: rkey.to_string(),
                })
            }
            _ => Err(AppError::invalid_input(format!(
                "at:// URI must be authority/collection/rkey: {uri}"
            ))),
        }
    }
}
