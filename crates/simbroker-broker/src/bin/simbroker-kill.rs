//! Terminates a search job by id.
//!
//! ```bash
//! simbroker-kill --job-id 7922 --ssl-cert server.crt --server-url search.example.com
//! ```

use anyhow::Context;
use clap::Parser;
use simbroker_broker::{
    config::{KillArgs, KillConfig},
    search::{GrpcSearchClient, SearchClient},
};
use simbroker_core::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = KillArgs::parse();
    let config = KillConfig::try_from(args)?;

    let providers = init_telemetry("simbroker-kill")?;

    let result = kill(&config).await;
    match &result {
        Ok(()) => tracing::info!(job_id = config.job_id, "Job killed"),
        Err(e) => tracing::error!(job_id = config.job_id, "Kill failed: {e:#}"),
    }

    providers.shutdown();
    result
}

async fn kill(config: &KillConfig) -> anyhow::Result<()> {
    let search = GrpcSearchClient::connect(&config.search)
        .await
        .with_context(|| format!("failed to connect to {}", config.search.uri()))?;

    search
        .kill_job(config.job_id)
        .await
        .with_context(|| format!("failed to kill job {}", config.job_id))
}
