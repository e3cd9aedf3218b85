//! Outbound connections from the broker to its workers.

use core::time::Duration;
use simbroker_core::{
    Error, Result,
    deadline::with_deadline,
    proto::{self, simulator_client::SimulatorClient},
    types::{BrokerId, BrokerTaggedTask},
};
use tonic::{
    codec::CompressionEncoding,
    transport::{Channel, Endpoint},
};

/// The broker's handle on one worker's `Simulator` service.
///
/// Implementations are cheap to clone; the pool clones a link into every
/// spawned call.
#[tonic::async_trait]
pub trait WorkerLink: Clone + Send + Sync + 'static {
    /// Runs one task. Resolves once the worker has pushed the result back.
    ///
    /// Implementations need not bound the call; the pool does.
    async fn simulate(&self, task: BrokerTaggedTask) -> Result<()>;

    async fn register_broker(&self, broker: &BrokerId) -> Result<()>;

    async fn deregister_broker(&self, broker: &BrokerId) -> Result<()>;
}

/// Plaintext gRPC link to a worker.
#[derive(Clone, Debug)]
pub struct GrpcWorkerLink {
    address: String,
    client: SimulatorClient<Channel>,
    timeout: Duration,
}

impl GrpcWorkerLink {
    /// Dials the worker at `address` (`host:port`).
    ///
    /// The connection is established eagerly so an unreachable worker fails
    /// broker startup. `timeout` bounds the dial and the registration calls.
    pub async fn connect(address: impl Into<String>, timeout: Duration) -> Result<Self> {
        let address = address.into();
        let endpoint =
            Endpoint::from_shared(format!("http://{address}"))?.connect_timeout(timeout);
        let channel = with_deadline("Connect", timeout, async move {
            endpoint.connect().await.map_err(Error::from)
        })
        .await?;

        Ok(Self {
            address,
            client: SimulatorClient::new(channel)
                .send_compressed(CompressionEncoding::Zstd)
                .accept_compressed(CompressionEncoding::Zstd),
            timeout,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[tonic::async_trait]
impl WorkerLink for GrpcWorkerLink {
    async fn simulate(&self, task: BrokerTaggedTask) -> Result<()> {
        // Bounded by the pool, which owns the per-call timeout.
        let mut client = self.client.clone();
        client
            .simulate(proto::BrokerSimParams::from(task))
            .await
            .map(|_| ())
            .map_err(Error::from)
    }

    async fn register_broker(&self, broker: &BrokerId) -> Result<()> {
        let mut client = self.client.clone();
        let endpoint = proto::BrokerEndpoint::from(broker);
        with_deadline("RegisterBroker", self.timeout, async move {
            client
                .register_broker(endpoint)
                .await
                .map(|_| ())
                .map_err(Error::from)
        })
        .await
    }

    async fn deregister_broker(&self, broker: &BrokerId) -> Result<()> {
        let mut client = self.client.clone();
        let endpoint = proto::BrokerEndpoint::from(broker);
        with_deadline("DeregisterBroker", self.timeout, async move {
            client
                .deregister_broker(endpoint)
                .await
                .map(|_| ())
                .map_err(Error::from)
        })
        .await
    }
}
