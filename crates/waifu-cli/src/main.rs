//! waifu-queue — MCP server and worker for queued text generation
//!
//! Two long-running processes share one Redis queue:
//!
//!   waifu-queue serve    MCP server on STDIO; enqueues prompts
//!   waifu-queue worker   drains the queue through the provider router
//!
//! Configuration comes from the environment (a `.env` file is loaded
//! first): REDIS_URL, DEFAULT_PROVIDER / PROVIDER, MAX_NEW_TOKENS,
//! REQUEST_TIMEOUT_SECONDS, RESULT_TTL_SECONDS.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use waifu_core::{Config, JobExecutor, ProviderRouter, RedisJobQueue};
use waifu_mcp::{McpServer, RequestGateway};

#[derive(Parser)]
#[command(name = "waifu-queue", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server on STDIO
    Serve,
    /// Run a queue worker
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout belongs to the MCP transport; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Worker => worker(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!(
        "waifu-queue v{} MCP server starting",
        env!("CARGO_PKG_VERSION")
    );
    let queue = RedisJobQueue::connect(&config.redis_url, config.result_ttl_seconds).await?;
    let gateway = RequestGateway::new(Arc::new(queue));
    McpServer::new(gateway).serve_stdio().await
}

async fn worker(config: Config) -> Result<()> {
    info!(
        "waifu-queue v{} worker starting (default provider: {})",
        env!("CARGO_PKG_VERSION"),
        config.default_provider
    );
    let queue = RedisJobQueue::connect(&config.redis_url, config.result_ttl_seconds).await?;

    let recovered = queue.recover_stale().await?;
    if recovered > 0 {
        info!(recovered, "requeued jobs left over from a previous worker");
    }

    let router = ProviderRouter::from_config(&config);
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let executor = JobExecutor::new(Arc::new(queue), router, shutdown);
    executor.run().await;
    Ok(())
}
