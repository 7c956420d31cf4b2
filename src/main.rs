//! lmsfetch - fetch LMS resources through a persistent cache
//!
//! Reads configuration from `LMSFETCH_*` environment variables and prints results as
//! JSON on stdout. Logs go to stderr and are controlled by `RUST_LOG`.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lmsfetch::cache::{CacheStore, PolicyTable};
use lmsfetch::cli::{Cli, Command, GetPlan};
use lmsfetch::client::{ApiRequest, EnvToken, ResilientClient};
use lmsfetch::config::TOKEN_VAR;
use lmsfetch::{CachedFetcher, Failure};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lmsfetch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Value, String> {
    let config = cli.config().map_err(|e| e.to_string())?;
    let cache_config = config.cache_config().map_err(|e| e.to_string())?;
    info!(dir = %cache_config.dir.display(), base_url = %config.base_url, "starting");

    let cache = Arc::new(CacheStore::new(cache_config));
    cache.initialize().await.map_err(describe)?;

    match &cli.command {
        Command::Stats => {
            let stats = cache.stats().await.map_err(describe)?;
            Ok(json!({
                "entries": stats.entry_count,
                "totalSizeBytes": stats.total_size_bytes,
                "hits": stats.hits,
                "misses": stats.misses,
                "evictions": stats.evictions,
                "hitRate": stats.hit_rate(),
            }))
        }
        Command::Clear => {
            cache.clear().await.map_err(describe)?;
            Ok(json!({ "cleared": true }))
        }
        Command::Remove { key } => {
            let removed = cache.remove(key).await.map_err(describe)?;
            Ok(json!({ "key": key, "removed": removed }))
        }
        Command::Get { .. } => {
            let plan = GetPlan::from_command(&cli.command, &PolicyTable::default())
                .map_err(|e| e.to_string())?
                .ok_or_else(|| "nothing to fetch".to_string())?;

            let client = ResilientClient::new(&config.client_config(), Arc::new(EnvToken::new(TOKEN_VAR)))
                .map_err(describe)?;
            let fetcher = CachedFetcher::new(cache, Arc::new(client));

            let fetched = fetcher
                .fetch_resource::<Value>(
                    &plan.key,
                    &plan.policy,
                    ApiRequest::get(plan.path.clone()),
                    plan.force_refresh,
                )
                .await
                .map_err(describe)?;

            Ok(json!({
                "key": plan.key,
                "source": fetched.source.as_str(),
                "stale": fetched.is_stale(),
                "data": fetched.value,
            }))
        }
    }
}

/// One-line description of a failure, with a hint when retrying may help
fn describe(failure: Failure) -> String {
    debug!(code = failure.code.as_deref().unwrap_or(""), details = ?failure.details, "fetch failed");
    if failure.is_retryable() {
        format!("{} (retryable)", failure)
    } else {
        failure.to_string()
    }
}
