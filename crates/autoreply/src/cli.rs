//! Command-line surface
//!
//! Each command maps onto a registered tool invocation; the schemas the
//! tools declare for MCP are the same contracts these flags bind to.

use clap::{Parser, Subcommand};
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[command(
    name = "autoreply",
    version,
    about = "Bluesky profile and post tools over MCP and the command line"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the MCP server on stdio (the default with no command)
    Serve,

    /// Fetch an account's profile
    Profile {
        /// Handle or DID
        #[arg(long)]
        account: String,
    },

    /// Search an account's posts
    Search {
        /// Handle or DID
        #[arg(long)]
        account: String,
        /// Whitespace-separated terms
        #[arg(long)]
        query: String,
        /// Maximum hits (default 25)
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Read a feed by URI, or the home timeline when logged in
    Feed {
        /// at:// URI of a feed generator
        #[arg(long)]
        feed: Option<String>,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Fetch a post and its replies
    Thread {
        /// at:// URI of the root post
        #[arg(long)]
        uri: String,
    },

    /// Publish a post
    Post {
        #[arg(long)]
        text: String,
        /// at:// URI of a post to reply to
        #[arg(long = "reply-to")]
        reply_to: Option<String>,
        #[arg(long)]
        account: Option<String>,
    },

    /// Like, unlike, repost, or delete posts
    React {
        #[arg(long)]
        like: Vec<String>,
        #[arg(long)]
        unlike: Vec<String>,
        #[arg(long)]
        repost: Vec<String>,
        #[arg(long)]
        delete: Vec<String>,
        #[arg(long)]
        account: Option<String>,
    },

    /// Sign in, or manage stored accounts
    Login {
        #[command(subcommand)]
        action: Option<LoginAction>,
        #[arg(long)]
        handle: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Use the browser OAuth flow instead of an app password
        #[arg(long)]
        oauth: bool,
        /// PDS URL for password login
        #[arg(long)]
        service: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum LoginAction {
    /// List stored accounts
    List,
    /// Set the default account
    Default { handle: String },
    /// Remove stored credentials
    Delete {
        #[arg(long)]
        handle: Option<String>,
    },
}

impl Command {
    /// The tool name and argument object this command invokes
    pub fn into_invocation(self) -> Option<(&'static str, Value)> {
        Some(match self {
            Command::Serve => return None,
            Command::Profile { account } => ("profile", json!({"account": account})),
            Command::Search {
                account,
                query,
                limit,
            } => ("search", prune(json!({"account": account, "query": query, "limit": limit}))),
            Command::Feed {
                feed,
                cursor,
                limit,
            } => ("feed", prune(json!({"feed": feed, "cursor": cursor, "limit": limit}))),
            Command::Thread { uri } => ("thread", json!({"uri": uri})),
            Command::Post {
                text,
                reply_to,
                account,
            } => (
                "post",
                prune(json!({"text": text, "reply_to": reply_to, "account": account})),
            ),
            Command::React {
                like,
                unlike,
                repost,
                delete,
                account,
            } => (
                "react",
                prune(json!({
                    "like": like,
                    "unlike": unlike,
                    "repost": repost,
                    "delete": delete,
                    "account": account,
                })),
            ),
            Command::Login {
                action: Some(LoginAction::List),
                ..
            } => ("accounts", json!({})),
            Command::Login {
                action: Some(LoginAction::Default { handle }),
                ..
            } => ("accounts", json!({"default": handle})),
            Command::Login {
                action: Some(LoginAction::Delete { handle }),
                ..
            } => ("logout", prune(json!({"handle": handle}))),
            Command::Login {
                action: None,
                handle,
                password,
                oauth,
                service,
            } => (
                "login",
                prune(json!({
                    "handle": handle,
                    "password": password,
                    "oauth": oauth,
                    "service": service,
                })),
            ),
        })
    }
}

/// Drop nulls so tools see absent optionals, not `null`
fn prune(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.retain(|_, v| !v.is_null());
    }
    value
}
