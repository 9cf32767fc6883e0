use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pht_lookup::{
    load_watchlist, maybe_build_scheduler, run_watchlist_once, LookupConfig, LookupService,
};
use pht_storage::{HistoryStore, MemoryHistoryStore, PgHistoryStore};
use pht_web::WebConfig;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pht-cli")]
#[command(about = "Profile history tracker command-line interface")]
struct Cli {
    /// Keep history in process memory instead of Postgres.
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP server (and the watchlist scheduler when enabled).
    Serve,
    /// Look up one handle and print the response body.
    Lookup { handle: String },
    /// Check every handle in the watchlist once.
    Watch,
    /// Apply database migrations.
    Migrate,
}

async fn open_store(config: &LookupConfig, memory: bool) -> Result<Arc<dyn HistoryStore>> {
    if memory {
        warn!("using in-memory history store; nothing will persist");
        return Ok(Arc::new(MemoryHistoryStore::new()));
    }
    let store = PgHistoryStore::connect(&config.pg_store_config())
        .await
        .context("connecting history store")?;
    store.migrate().await.context("running migrations")?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let config = LookupConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let store = open_store(&config, cli.memory).await?;
            let service = Arc::new(LookupService::new(&config, store.clone())?);
            info!(extractor = service.extractor_version(), "lookup service ready");

            let mut scheduler = maybe_build_scheduler(&config, service.clone()).await?;
            if let Some(sched) = scheduler.as_mut() {
                sched.start().await.context("starting scheduler")?;
            }

            let served = pht_web::serve(&WebConfig::from_env(), service).await;

            if let Some(mut sched) = scheduler {
                if let Err(err) = sched.shutdown().await {
                    warn!(error = %err, "scheduler shutdown failed");
                }
            }
            store.close().await;
            served?;
        }
        Commands::Lookup { handle } => {
            let store = open_store(&config, cli.memory).await?;
            let service = LookupService::new(&config, store.clone())?;
            let result = service.lookup(&handle).await;
            store.close().await;
            match result {
                Ok(resp) => println!("{}", serde_json::to_string_pretty(&resp)?),
                Err(err) => anyhow::bail!("{} ({err})", err.public_message()),
            }
        }
        Commands::Watch => {
            let watchlist = load_watchlist(&config.watchlist_path).await?;
            let store = open_store(&config, cli.memory).await?;
            let service = LookupService::new(&config, store.clone())?;
            let summary = run_watchlist_once(&service, &watchlist.handles).await;
            store.close().await;
            println!(
                "watch complete: run_id={} checked={} created={} changed={} failed={}",
                summary.run_id,
                summary.checked,
                summary.created,
                summary.changed,
                summary.failed.len()
            );
            for failure in &summary.failed {
                match failure.upstream_status {
                    Some(status) => println!(
                        "  {} [{:?}, upstream {status}]: {}",
                        failure.handle, failure.stage, failure.error
                    ),
                    None => println!("  {} [{:?}]: {}", failure.handle, failure.stage, failure.error),
                }
            }
        }
        Commands::Migrate => {
            let store = PgHistoryStore::connect(&config.pg_store_config())
                .await
                .context("connecting history store")?;
            store.migrate().await.context("running migrations")?;
            store.close().await;
            println!("migrations applied");
        }
    }

    Ok(())
}
