//! Client side of the external search service.
//!
//! The broker is a pure client of the search service: it starts a job, pulls
//! the job's task stream, relays each result as it arrives and finally asks
//! for the aggregated job result. [`SearchClient`] is the seam the rest of the
//! crate depends on; [`GrpcSearchClient`] is the production implementation.

use core::time::Duration;
use futures::{StreamExt, stream::BoxStream};
use simbroker_core::{
    Error, Result,
    deadline::with_deadline,
    proto::{self, search_service_client::SearchServiceClient},
    types::{SimulationResult, SimulationTask},
};
use std::path::PathBuf;
use tonic::{
    codec::CompressionEncoding,
    transport::{Certificate, Channel, ClientTlsConfig, Endpoint},
};

/// The tasks of one job, in the order the search service produced them.
pub type TaskStream = BoxStream<'static, Result<SimulationTask>>;

#[tonic::async_trait]
pub trait SearchClient: Send + Sync + 'static {
    async fn start_job(&self, request: proto::JobRequest) -> Result<proto::Job>;

    /// Opens the job's task stream. Only opening the stream is bounded by a
    /// deadline; the stream itself lasts as long as the job.
    async fn open_sim_stream(&self, job: &proto::Job) -> Result<TaskStream>;

    async fn upload_sim_result(&self, result: SimulationResult) -> Result<()>;

    async fn get_job_result(&self, job: &proto::Job) -> Result<proto::JobResult>;

    async fn kill_job(&self, job_id: u64) -> Result<()>;
}

/// Where and how to reach the search service.
#[derive(Clone, Debug)]
pub struct SearchEndpoint {
    pub host: String,
    pub port: u16,
    /// PEM encoded CA certificate used to verify the service.
    pub ca_cert: PathBuf,
    /// Plaintext instead of TLS. Only meant for local testing.
    pub insecure: bool,
    /// Deadline for connecting and for every unary call.
    pub timeout: Duration,
}

impl SearchEndpoint {
    pub fn uri(&self) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    async fn tls_config(&self) -> Result<ClientTlsConfig> {
        let pem = tokio::fs::read(&self.ca_cert)
            .await
            .map_err(|e| Error::Tls {
                context: format!("failed to read {}: {e}", self.ca_cert.display()),
            })?;

        Ok(ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(pem))
            .domain_name(self.host.clone()))
    }
}

#[derive(Clone, Debug)]
pub struct GrpcSearchClient {
    client: SearchServiceClient<Channel>,
    timeout: Duration,
}

impl GrpcSearchClient {
    /// Connects to the search service, over TLS unless `insecure` is set.
    ///
    /// # Errors
    ///
    /// - [`Error::Tls`] if the CA certificate cannot be read.
    /// - [`Error::Transport`] or [`Error::Timeout`] if the service is
    ///   unreachable.
    pub async fn connect(endpoint: &SearchEndpoint) -> Result<Self> {
        let mut builder = Endpoint::from_shared(endpoint.uri())?.connect_timeout(endpoint.timeout);
        if !endpoint.insecure {
            builder = builder.tls_config(endpoint.tls_config().await?)?;
        }

        let channel = with_deadline("Connect", endpoint.timeout, async move {
            builder.connect().await.map_err(Error::from)
        })
        .await?;

        tracing::debug!("Connected to search service at {}", endpoint.uri());
        Ok(Self::with_channel(channel, endpoint.timeout))
    }

    pub fn with_channel(channel: Channel, timeout: Duration) -> Self {
        Self {
            client: SearchServiceClient::new(channel)
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip),
            timeout,
        }
    }
}

#[tonic::async_trait]
impl SearchClient for GrpcSearchClient {
    async fn start_job(&self, request: proto::JobRequest) -> Result<proto::Job> {
        let mut client = self.client.clone();
        with_deadline("StartJob", self.timeout, async move {
            client
                .start_job(request)
                .await
                .map(tonic::Response::into_inner)
                .map_err(Error::from)
        })
        .await
    }

    async fn open_sim_stream(&self, job: &proto::Job) -> Result<TaskStream> {
        let mut client = self.client.clone();
        let job = job.clone();
        let stream = with_deadline("OpenSimStream", self.timeout, async move {
            client
                .open_sim_stream(job)
                .await
                .map(tonic::Response::into_inner)
                .map_err(Error::from)
        })
        .await?;

        Ok(stream
            .map(|item| item.map(SimulationTask::from).map_err(Error::from))
            .boxed())
    }

    async fn upload_sim_result(&self, result: SimulationResult) -> Result<()> {
        let mut client = self.client.clone();
        with_deadline("UploadSimResult", self.timeout, async move {
            client
                .upload_sim_result(proto::SimResult::from(result))
                .await
                .map(|_| ())
                .map_err(Error::from)
        })
        .await
    }

    async fn get_job_result(&self, job: &proto::Job) -> Result<proto::JobResult> {
        let mut client = self.client.clone();
        let job = job.clone();
        with_deadline("GetJobResult", self.timeout, async move {
            client
                .get_job_result(job)
                .await
                .map(tonic::Response::into_inner)
                .map_err(Error::from)
        })
        .await
    }

    async fn kill_job(&self, job_id: u64) -> Result<()> {
        let mut client = self.client.clone();
        let job = proto::Job {
            job_id,
            info: String::new(),
        };
        with_deadline("KillJob", self.timeout, async move {
            client.kill_job(job).await.map(|_| ()).map_err(Error::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(insecure: bool) -> SearchEndpoint {
        SearchEndpoint {
            host: "search.internal".to_string(),
            port: 443,
            ca_cert: PathBuf::from("/nonexistent/server.crt"),
            insecure,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn scheme_follows_insecure_flag() {
        assert_eq!(endpoint(false).uri(), "https://search.internal:443");
        assert_eq!(endpoint(true).uri(), "http://search.internal:443");
    }

    #[tokio::test]
    async fn unreadable_certificate_is_a_tls_error() {
        let err = GrpcSearchClient::connect(&endpoint(false)).await.unwrap_err();
        assert!(matches!(err, Error::Tls { .. }), "{err:?}");
    }
}
