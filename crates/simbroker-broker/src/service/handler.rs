//! `Broker` gRPC service.
//!
//! Workers push finished results here. Each push is relayed to the search
//! service before it is acknowledged, so a relay failure travels back through
//! the worker's push to the simulate call the broker is waiting on. Pushes are
//! served concurrently and are neither buffered, reordered nor deduplicated.

use crate::search::SearchClient;
use simbroker_core::{
    Result,
    proto::{Empty, SimResult, broker_server::Broker},
    telemetry::{increment_relay_errors, increment_results_relayed},
    types::SimulationResult,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct BrokerService<S: SearchClient> {
    search: Arc<S>,
}

impl<S: SearchClient> Clone for BrokerService<S> {
    fn clone(&self) -> Self {
        Self {
            search: Arc::clone(&self.search),
        }
    }
}

impl<S: SearchClient> BrokerService<S> {
    pub const fn new(search: Arc<S>) -> Self {
        Self { search }
    }

    /// Relays one result to the search service.
    pub async fn relay(&self, result: SimulationResult) -> Result<()> {
        self.search
            .upload_sim_result(result)
            .await
            .inspect(|_| increment_results_relayed())
            .inspect_err(|e| {
                increment_relay_errors();
                tracing::warn!(
                    job_id = result.job_id,
                    sim_id = result.sim_id,
                    "Relay to search service failed: {e}"
                );
            })
    }
}

#[tonic::async_trait]
impl<S: SearchClient> Broker for BrokerService<S> {
    #[tracing::instrument(skip_all, fields(sim_id = req.get_ref().sim_id))]
    async fn push_result(&self, req: Request<SimResult>) -> Result<Response<Empty>, Status> {
        let result = SimulationResult::from(req.into_inner());
        tracing::trace!(
            job_id = result.job_id,
            objective = result.objective,
            "Relaying result"
        );

        self.relay(result).await?;
        Ok(Response::new(Empty {}))
    }
}
