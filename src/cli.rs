//! Command-line interface parsing for lmsfetch
//!
//! The CLI is a thin front end over the library: it fetches single resources
//! through the cache and inspects or clears the cache directory.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::cache::{CachePolicy, CacheStrategy, ParseStrategyError, PolicyTable};
use crate::config::{Config, ConfigError};

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Strategy(#[from] ParseStrategyError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// lmsfetch - cached, retrying access to an LMS API proxy
#[derive(Parser, Debug)]
#[command(name = "lmsfetch")]
#[command(about = "Cached, retrying access to an LMS API proxy")]
#[command(version)]
pub struct Cli {
    /// Proxy base URL (overrides LMSFETCH_BASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Cache directory (overrides LMSFETCH_CACHE_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Retries after the first attempt (overrides LMSFETCH_MAX_RETRIES)
    #[arg(long, global = true, value_name = "N")]
    pub max_retries: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Fetch a resource through the cache and print its data as JSON
    ///
    /// Examples:
    ///   lmsfetch get courses
    ///   lmsfetch get courses/42/assignments --class assignments
    ///   lmsfetch get calendar --strategy cache-only
    Get {
        /// Path below the proxy base URL
        path: String,

        /// Resource class selecting the cache policy (courses, assignments, ...)
        #[arg(long, value_name = "CLASS")]
        class: Option<String>,

        /// Cache key (defaults to the path)
        #[arg(long, value_name = "KEY")]
        key: Option<String>,

        /// Override the class's strategy: cache-first, network-first, cache-only, network-only
        #[arg(long, value_name = "STRATEGY")]
        strategy: Option<String>,

        /// Skip the cache for this call
        #[arg(long)]
        force_refresh: bool,
    },

    /// Show cache statistics
    Stats,

    /// Delete every cached entry
    Clear,

    /// Delete one cached entry
    Remove {
        /// Cache key to remove
        key: String,
    },
}

/// Resolved parameters of a `get` invocation
#[derive(Debug, Clone, PartialEq)]
pub struct GetPlan {
    pub path: String,
    pub key: String,
    pub policy: CachePolicy,
    pub force_refresh: bool,
}

/// Resource class guessed from a path: its first segment
pub fn class_from_path(path: &str) -> &str {
    path.trim_start_matches('/')
        .split(['/', '?'])
        .next()
        .unwrap_or_default()
}

impl GetPlan {
    /// Picks key and policy for `get`; `None` for other commands
    pub fn from_command(command: &Command, policies: &PolicyTable) -> Result<Option<Self>, CliError> {
        let Command::Get {
            path,
            class,
            key,
            strategy,
            force_refresh,
        } = command
        else {
            return Ok(None);
        };

        let class = class.as_deref().unwrap_or_else(|| class_from_path(path));
        let mut policy = policies.policy_for(class);
        if let Some(strategy) = strategy {
            policy.strategy = strategy.parse::<CacheStrategy>()?;
        }

        Ok(Some(GetPlan {
            path: path.clone(),
            key: key.clone().unwrap_or_else(|| path.clone()),
            policy,
            force_refresh: *force_refresh,
        }))
    }
}

impl Cli {
    /// Environment configuration with this invocation's overrides applied
    pub fn config(&self) -> Result<Config, CliError> {
        let mut config = Config::from_env()?;
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = Some(cache_dir.clone());
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        Ok(config)
    }
}
