//! Hosting for the broker's `Broker` service.

use crate::{search::SearchClient, service::handler::BrokerService};
use simbroker_core::proto::{FILE_DESCRIPTOR_SET, broker_server::BrokerServer};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{codec::CompressionEncoding, transport::Server};

/// Serves `service` on `listener` until `shutdown` is cancelled.
///
/// Health reports `SERVING` while the server runs and flips to
/// `NOT_SERVING` once shutdown begins.
pub async fn serve_broker<S: SearchClient>(
    listener: TcpListener,
    service: BrokerService<S>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<BrokerServer<BrokerService<S>>>()
        .await;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let signal = async move {
        shutdown.cancelled().await;
        health_reporter
            .set_not_serving::<BrokerServer<BrokerService<S>>>()
            .await;
        tracing::debug!("Broker server shutting down");
    };

    Server::builder()
        .http2_adaptive_window(Some(true))
        .add_service(health_service)
        .add_service(reflection)
        .add_service(
            BrokerServer::new(service)
                .send_compressed(CompressionEncoding::Zstd)
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Zstd)
                .accept_compressed(CompressionEncoding::Gzip),
        )
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
        .await?;

    Ok(())
}
