///
/// CLI glue for ado-port-sync: argument parsing, wiring of the real HTTP
/// clients and the `sync` entrypoint.
///
/// All sync logic lives in [`crate::synchronise`]; this module only builds the
/// collaborators from configuration and reports the outcome.
///
/// For programmatic/integration use: call [`run`] with a constructed [`Cli`].
use crate::config::SyncConfig;
use crate::download::AzureDevOpsClient;
use crate::load_config::load_config;
use crate::rate_limit::RateLimiter;
use crate::synchronise::synchronise;
use crate::upload::PortClient;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sync Azure DevOps projects, repositories, pipelines and work items into Port.
#[derive(Parser)]
#[clap(
    name = "ado-port-sync",
    version,
    about = "Synchronise an Azure DevOps organization into the Port software catalog"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Walk the whole organization once and upsert every resource into the catalog
    Sync {
        /// Optional YAML file with non-secret settings (API URLs, page size, rate limit)
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

fn http_client(config: &SyncConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sync { config } => {
            let config = load_config(config.as_deref())?;
            tracing::info!(command = "sync", "Starting synchronisation process");

            let http = http_client(&config)?;
            let catalog = PortClient::connect(http.clone(), &config.port)
                .await
                .context("Failed to authenticate against Port")?;
            let source = AzureDevOpsClient::new(http, &config.azure_devops);
            let limiter = RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window);

            match synchronise(&source, &catalog, &limiter).await {
                Ok(report) => {
                    tracing::info!(command = "sync", ?report, "Synchronisation complete");
                    println!(
                        "Synchronise complete: {} entities upserted, {} failed",
                        report.total_upserted(),
                        report.failed.len()
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    Err(anyhow::Error::new(e).context("Synchronisation failed"))
                }
            }
        }
    }
}
