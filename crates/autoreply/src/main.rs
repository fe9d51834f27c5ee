//! autoreply - Bluesky profile and post tools, dual-mode:
//! a Model Context Protocol server on stdio, or a one-shot CLI.

mod cli;
mod config;
mod error;
mod render;
mod tools;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::error::ErrorCode;
use crate::tools::{AppContext, build_registry};
use autoreply_mcp::{McpServer, ServerInfo, ToolContext};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    // Logs go to stderr: stdout belongs to the MCP transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autoreply=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    let ctx = match AppContext::init(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e}");
            return e.code.exit_code();
        }
    };
    let registry = Arc::new(build_registry(ctx.clone()));

    match cli.command.and_then(|c| match c {
        Command::Serve => None,
        other => other.into_invocation(),
    }) {
        None => {
            // Opportunistic cache sweep; serving does not wait on it.
            let sweeper = ctx.clone();
            tokio::spawn(async move {
                match sweeper.provider.store().cleanup().await {
                    Ok(removed) if removed > 0 => {
                        tracing::info!(removed, "cleaned expired cache entries");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "cache cleanup failed"),
                }
            });

            let server = McpServer::new(
                registry,
                ServerInfo {
                    name: "autoreply".into(),
                    version: env!("CARGO_PKG_VERSION").into(),
                },
            );
            tracing::info!("serving MCP on stdio");
            match server.run_stdio().await {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("error: {e}");
                    5
                }
            }
        }
        Some((name, args)) => {
            match registry.call(name, args, &ToolContext::detached()).await {
                Ok(result) => {
                    println!("{}", result.text_content());
                    0
                }
                Err(e) => {
                    eprintln!("error: {}", e.message);
                    ErrorCode::parse(&e.code)
                        .map(|code| code.exit_code())
                        .unwrap_or(5)
                }
            }
        }
    }
}
