//! Outbound connections from a worker back to the brokers it serves.
//!
//! A worker never keeps a broker connection it was not asked to open: the
//! broker calls `RegisterBroker` with its own address and the worker dials it
//! through a [`BrokerConnector`]. The resulting [`BrokerLink`] is what the
//! registry stores and what `Simulate` pushes results through.

use core::time::Duration;
use simbroker_core::{
    Error, Result,
    deadline::with_deadline,
    proto::{self, broker_client::BrokerClient},
    types::{BrokerId, SimulationResult},
};
use tonic::{
    codec::CompressionEncoding,
    transport::{Channel, Endpoint},
};

/// A live connection to one broker's `Broker` service.
#[tonic::async_trait]
pub trait BrokerLink: Clone + Send + Sync + 'static {
    /// Delivers `result` and waits for the broker's acknowledgement.
    async fn push_result(&self, result: SimulationResult) -> Result<()>;
}

/// Opens [`BrokerLink`]s for registering brokers.
pub trait BrokerConnector: Send + Sync + 'static {
    type Link: BrokerLink;

    fn connect(&self, broker: &BrokerId) -> Result<Self::Link>;
}

/// Dials brokers over plaintext gRPC.
///
/// Channels are created lazily, so registration never blocks on the broker
/// being reachable; the first push establishes the connection.
#[derive(Clone, Debug)]
pub struct GrpcBrokerConnector {
    push_timeout: Duration,
}

impl GrpcBrokerConnector {
    pub const fn new(push_timeout: Duration) -> Self {
        Self { push_timeout }
    }
}

impl BrokerConnector for GrpcBrokerConnector {
    type Link = GrpcBrokerLink;

    fn connect(&self, broker: &BrokerId) -> Result<Self::Link> {
        let channel = Endpoint::from_shared(broker.endpoint_uri())?
            .connect_timeout(self.push_timeout)
            .connect_lazy();

        Ok(GrpcBrokerLink {
            client: BrokerClient::new(channel)
                .send_compressed(CompressionEncoding::Zstd)
                .accept_compressed(CompressionEncoding::Zstd),
            push_timeout: self.push_timeout,
        })
    }
}

#[derive(Clone, Debug)]
pub struct GrpcBrokerLink {
    client: BrokerClient<Channel>,
    push_timeout: Duration,
}

#[tonic::async_trait]
impl BrokerLink for GrpcBrokerLink {
    async fn push_result(&self, result: SimulationResult) -> Result<()> {
        let mut client = self.client.clone();
        with_deadline("PushResult", self.push_timeout, async move {
            client
                .push_result(proto::SimResult::from(result))
                .await
                .map(|_| ())
                .map_err(Error::from)
        })
        .await
    }
}
