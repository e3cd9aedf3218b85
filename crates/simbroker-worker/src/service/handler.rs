//! `Simulator` gRPC service for one worker instance.
//!
//! This module defines [`WorkerService`], which runs simulations on behalf of
//! any number of registered brokers and pushes each result back to the broker
//! that asked for it.
//!
//! ## Responsibilities
//!
//! - Maintain the broker registry through `RegisterBroker` and
//!   `DeregisterBroker`.
//! - Reject `Simulate` calls tagged for an unregistered broker before doing
//!   any work.
//! - Compute the objective and push the result synchronously: `Simulate`
//!   acknowledges only after the broker acknowledged the push, so push
//!   failures reach the dispatching broker.

use crate::{
    link::{BrokerConnector, BrokerLink},
    registry::BrokerRegistry,
    simulate::objective,
};
use simbroker_core::{
    Result,
    proto::{BrokerEndpoint, BrokerSimParams, Empty, simulator_server::Simulator},
    telemetry::{increment_push_errors, increment_routing_errors, increment_simulations},
    types::{BrokerId, BrokerTaggedTask, SimulationResult},
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Worker-side `Simulator` service.
///
/// Cloning is cheap; clones share the same registry.
pub struct WorkerService<C: BrokerConnector> {
    name: String,
    registry: Arc<BrokerRegistry<C>>,
}

impl<C: BrokerConnector> Clone for WorkerService<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<C: BrokerConnector> WorkerService<C> {
    /// Creates a worker named `name` (used in logs) with an empty registry.
    pub fn new(name: impl Into<String>, connector: C) -> Self {
        Self {
            name: name.into(),
            registry: Arc::new(BrokerRegistry::new(connector)),
        }
    }

    pub fn registry(&self) -> &BrokerRegistry<C> {
        &self.registry
    }

    /// Runs `tagged` and pushes its result to the tagged broker.
    ///
    /// # Errors
    ///
    /// - `Error::Routing` if the broker is not registered (nothing is
    ///   pushed).
    /// - `Error::InvalidRequest` for an empty parameter vector.
    /// - Any error returned by the push itself.
    pub async fn execute(&self, tagged: BrokerTaggedTask) -> Result<SimulationResult> {
        let BrokerTaggedTask { task, broker } = tagged;

        let link = self.registry.route(&broker).inspect_err(|_| {
            increment_routing_errors();
        })?;

        let result = SimulationResult {
            job_id: task.job_id,
            sim_id: task.sim_id,
            objective: objective(&task.params)?,
        };
        increment_simulations();

        link.push_result(result).await.inspect_err(|e| {
            increment_push_errors();
            tracing::warn!(worker = %self.name, %broker, sim_id = result.sim_id, "Push failed: {e}");
        })?;

        Ok(result)
    }
}

#[tonic::async_trait]
impl<C: BrokerConnector> Simulator for WorkerService<C> {
    #[tracing::instrument(
        skip_all,
        fields(sim_id = req.get_ref().sim_params.as_ref().map(|p| p.sim_id))
    )]
    async fn simulate(&self, req: Request<BrokerSimParams>) -> Result<Response<Empty>, Status> {
        let tagged = BrokerTaggedTask::try_from(req.into_inner())?;
        tracing::trace!(
            worker = %self.name,
            broker = %tagged.broker,
            job_id = tagged.task.job_id,
            sim_id = tagged.task.sim_id,
            "Simulating"
        );

        self.execute(tagged).await?;
        Ok(Response::new(Empty {}))
    }

    async fn register_broker(
        &self,
        req: Request<BrokerEndpoint>,
    ) -> Result<Response<Empty>, Status> {
        let broker = BrokerId::try_from(req.into_inner())?;
        let replaced = self.registry.register(broker.clone())?;
        tracing::info!(worker = %self.name, %broker, replaced, "Broker registered");
        Ok(Response::new(Empty {}))
    }

    async fn deregister_broker(
        &self,
        req: Request<BrokerEndpoint>,
    ) -> Result<Response<Empty>, Status> {
        let broker = BrokerId::try_from(req.into_inner())?;
        self.registry.deregister(&broker).inspect_err(|_| {
            tracing::warn!(worker = %self.name, %broker, "Deregistration for unknown broker");
        })?;
        tracing::info!(worker = %self.name, %broker, "Broker deregistered");
        Ok(Response::new(Empty {}))
    }
}
