//! Hosting for one worker instance.

use crate::{link::BrokerConnector, service::handler::WorkerService};
use futures::Stream;
use simbroker_core::proto::{FILE_DESCRIPTOR_SET, simulator_server::SimulatorServer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};

/// Serves `service` on `listener` until `shutdown` is cancelled.
pub async fn serve_worker<C: BrokerConnector>(
    listener: TcpListener,
    service: WorkerService<C>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    run_server_with_incoming(TcpListenerStream::new(listener), service, shutdown).await
}

async fn run_server_with_incoming<I, IO, IE, C>(
    incoming: I,
    service: WorkerService<C>,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
    C: BrokerConnector,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<SimulatorServer<WorkerService<C>>>()
        .await;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let signal = {
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            health_reporter
                .set_not_serving::<SimulatorServer<WorkerService<C>>>()
                .await;
        }
    };

    Server::builder()
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_simulator_service(service))
        .serve_with_incoming_shutdown(incoming, signal)
        .await?;

    Ok(())
}

fn build_simulator_service<C: BrokerConnector>(
    service: WorkerService<C>,
) -> SimulatorServer<WorkerService<C>> {
    SimulatorServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
}
