#![doc = include_str!("../README.md")]

use anyhow::Context;
use clap::Parser;
use simbroker_core::telemetry::init_telemetry;
use simbroker_worker::{
    config::{CliArgs, WorkerConfig},
    link::GrpcBrokerConnector,
    server::serve_worker,
    service::handler::WorkerService,
};
use tokio::{net::TcpListener, signal, task::JoinSet};
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
    let config = WorkerConfig::try_from(args)?;

    let providers = init_telemetry("simworker")?;
    log_startup_info(&config);

    let shutdown = CancellationToken::new();
    let connector = GrpcBrokerConnector::new(config.push_timeout);

    // Bind every port up front so a taken port fails startup instead of
    // leaving a partial pool behind.
    let mut listeners = Vec::with_capacity(config.ports.len());
    for port in &config.ports {
        let addr = format!("{}:{port}", config.host);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind worker on {addr}"))?;
        listeners.push((*port, listener));
    }

    let mut servers = JoinSet::new();
    for (port, listener) in listeners {
        let service = WorkerService::new(format!("worker-{port}"), connector.clone());
        servers.spawn(serve_worker(listener, service, shutdown.clone()));
        tracing::info!("Worker listening on {}:{port}", config.host);
    }

    tokio::select! {
        () = shutdown_signal() => {}
        Some(res) = servers.join_next() => {
            tracing::error!("Worker stopped unexpectedly: {res:?}");
        }
    }

    shutdown.cancel();
    let mut result = Ok(());
    while let Some(res) = servers.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Worker server failed: {e:#}");
                result = Err(e);
            }
            Err(e) => {
                tracing::error!("Worker task panicked: {e}");
                result = Err(e.into());
            }
        }
    }

    tracing::info!("Workers shut down");
    providers.shutdown();
    result
}

fn log_startup_info(config: &WorkerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting simulation workers with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting {} simulation workers on {}",
            config.ports.len(),
            config.host
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

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
