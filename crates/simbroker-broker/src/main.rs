#![doc = include_str!("../README.md")]

use anyhow::Context;
use clap::Parser;
use simbroker_broker::{
    config::{BrokerConfig, CliArgs},
    job::{JobOutcome, run_job, write_result_table},
    pool::{DispatchPool, link::GrpcWorkerLink},
    search::GrpcSearchClient,
    server::serve_broker,
    service::handler::BrokerService,
};
use simbroker_core::{proto, telemetry::init_telemetry};
use std::{io::Write, sync::Arc};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = BrokerConfig::try_from(args)?;

    let providers = init_telemetry("simbroker")?;
    log_startup_info(&config);

    let result = run(&config).await;
    if let Err(e) = &result {
        tracing::error!("Broker failed: {e:#}");
    }

    providers.shutdown();
    result
}

async fn run(config: &BrokerConfig) -> anyhow::Result<()> {
    let search = GrpcSearchClient::connect(&config.search)
        .await
        .with_context(|| {
            format!(
                "failed to connect to search service at {}",
                config.search.uri()
            )
        })?;
    let search = Arc::new(search);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind broker on {}", config.bind_addr))?;
    tracing::info!("Broker listening on {} as {}", config.bind_addr, config.broker_id);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve_broker(
        listener,
        BrokerService::new(Arc::clone(&search)),
        shutdown.clone(),
    ));

    let outcome = run_against_workers(config, search.as_ref()).await;

    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => tracing::info!("Broker server shut down"),
        Ok(Err(e)) => tracing::error!("Broker server failed: {e:#}"),
        Err(e) => tracing::error!("Broker server task panicked: {e}"),
    }

    if let Some(outcome) = outcome? {
        print_outcome(&outcome)?;
    }
    Ok(())
}

/// Runs the job, or returns `None` if interrupted by a signal.
async fn run_against_workers(
    config: &BrokerConfig,
    search: &GrpcSearchClient,
) -> anyhow::Result<Option<JobOutcome>> {
    let links = futures::future::try_join_all(config.worker_addrs.iter().map(|addr| async move {
        GrpcWorkerLink::connect(addr.as_str(), config.call_timeout)
            .await
            .with_context(|| format!("failed to connect to worker at {addr}"))
    }))
    .await?;

    let pool = DispatchPool::new(
        config.broker_id.clone(),
        links,
        config.seed,
        config.call_timeout,
    )?;

    let job = run_job(
        search,
        &pool,
        config.job.clone(),
        std::io::stdout(),
        config.drain_timeout,
        |job| print_job_header(job, &config.job),
    );

    tokio::select! {
        res = job => Ok(Some(res?)),
        () = shutdown_signal() => {
            tracing::warn!("Job interrupted; use simbroker-kill to stop it on the search service");
            if let Err(e) = pool.deregister_all().await {
                tracing::warn!("Failed to deregister from every worker: {e}");
            }
            Ok(None)
        }
    }
}

fn print_job_header(job: &proto::Job, request: &proto::JobRequest) {
    println!("Job id: {}", job.job_id);
    println!("User-input event threshold: {}", request.threshold);
    println!("Number of simulations: {}", request.num_evals);
    if !job.info.is_empty() {
        println!("{}\n", job.info);
    }
}

fn print_outcome(outcome: &JobOutcome) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "Done")?;
    if outcome.stats.failed > 0 {
        writeln!(
            out,
            "{} of {} simulations failed",
            outcome.stats.failed, outcome.dispatched
        )?;
    }
    writeln!(out)?;
    write_result_table(&mut out, &outcome.result)?;
    out.flush()?;
    Ok(())
}

fn log_startup_info(config: &BrokerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting broker with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting broker {} with {} workers",
            config.broker_id,
            config.worker_addrs.len()
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
