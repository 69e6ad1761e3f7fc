use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use site_ingest::api::{AppState, create_router};
use site_ingest::config::Config;
use site_ingest::crawler::Crawler;
use site_ingest::db::{Database, KnowledgeRepo};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Crawls websites into a chatbot knowledge base and serves the ingestion API.
#[derive(Parser, Debug)]
#[command(name = "site-ingest", version)]
struct Args {
    /// Address to listen on, overrides BIND_ADDR
    #[arg(long)]
    bind: Option<String>,

    /// Maximum crawl depth below the root page, overrides CRAWL_MAX_DEPTH
    #[arg(long)]
    max_depth: Option<usize>,

    /// Concurrent page fetches per crawl, overrides CRAWL_CONCURRENCY
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    // Bridge log crate -> tracing (so log::info! etc. work)
    tracing_log::LogTracer::init()?;

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(depth) = args.max_depth {
        config.crawl.max_depth = depth;
    }
    if let Some(concurrency) = args.concurrency {
        config.crawl.concurrency = concurrency.max(1);
    }

    let db = Database::from_config(&config).await?;
    let crawler = Crawler::from_settings(&config.crawl).context("Failed to build HTTP client")?;
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(
        crawler,
        KnowledgeRepo::new(&db),
        shutdown.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(
        "ingestion service listening on {} (max depth {}, concurrency {})",
        config.bind_addr,
        config.crawl.max_depth,
        config.crawl.concurrency
    );

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    db.shutdown().await;
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
    shutdown.cancel();
}
