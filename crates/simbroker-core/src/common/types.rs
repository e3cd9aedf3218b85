//! # Domain types exchanged between broker and worker
//!
//! The generated protobuf messages are the wire contract; the types here are
//! what the broker and worker actually reason about. Conversions in both
//! directions live next to the types so the service handlers stay thin.
//!
//! - [`BrokerId`] - a broker's advertised `host:port` address. Workers key
//!   their connection table by it and use it to dial the broker back.
//! - [`SimulationTask`] - one unit of work from the search service.
//! - [`BrokerTaggedTask`] - a task in transit, tagged with the broker that
//!   dispatched it.
//! - [`SimulationResult`] - the scalar outcome of one task.

use crate::common::error::Error;
use crate::proto;
use core::fmt;
use std::net::SocketAddr;

/// Identifies a broker by the address its `Broker` service listens on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrokerId(String);

impl BrokerId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URI a worker dials to reach this broker.
    ///
    /// Bare `host:port` identifiers are assumed to be plaintext HTTP/2.
    pub fn endpoint_uri(&self) -> String {
        if self.0.starts_with("http://") || self.0.starts_with("https://") {
            self.0.clone()
        } else {
            format!("http://{}", self.0)
        }
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SocketAddr> for BrokerId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl TryFrom<proto::BrokerEndpoint> for BrokerId {
    type Error = Error;

    fn try_from(endpoint: proto::BrokerEndpoint) -> Result<Self, Self::Error> {
        if endpoint.address.trim().is_empty() {
            return Err(Error::InvalidRequest {
                reason: "Broker address must not be empty".to_string(),
            });
        }
        Ok(Self(endpoint.address))
    }
}

impl From<&BrokerId> for proto::BrokerEndpoint {
    fn from(id: &BrokerId) -> Self {
        Self {
            address: id.0.clone(),
        }
    }
}

/// One simulation work unit produced by the search service.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationTask {
    pub job_id: u64,
    pub sim_id: u64,
    pub params: Vec<f64>,
}

impl SimulationTask {
    /// Tags the task with the broker that is about to dispatch it.
    pub fn tag(self, broker: BrokerId) -> BrokerTaggedTask {
        BrokerTaggedTask { task: self, broker }
    }
}

impl From<proto::SimParams> for SimulationTask {
    fn from(params: proto::SimParams) -> Self {
        Self {
            job_id: params.job_id,
            sim_id: params.sim_id,
            params: params.params,
        }
    }
}

impl From<SimulationTask> for proto::SimParams {
    fn from(task: SimulationTask) -> Self {
        Self {
            job_id: task.job_id,
            sim_id: task.sim_id,
            params: task.params,
        }
    }
}

/// A task in transit between broker and worker.
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerTaggedTask {
    pub task: SimulationTask,
    pub broker: BrokerId,
}

impl From<BrokerTaggedTask> for proto::BrokerSimParams {
    fn from(tagged: BrokerTaggedTask) -> Self {
        Self {
            broker: Some(proto::BrokerEndpoint::from(&tagged.broker)),
            sim_params: Some(tagged.task.into()),
        }
    }
}

impl TryFrom<proto::BrokerSimParams> for BrokerTaggedTask {
    type Error = Error;

    fn try_from(msg: proto::BrokerSimParams) -> Result<Self, Self::Error> {
        let task = msg.sim_params.ok_or_else(|| Error::InvalidRequest {
            reason: "Missing simulation parameters".to_string(),
        })?;
        let broker = msg.broker.ok_or_else(|| Error::InvalidRequest {
            reason: "Missing broker tag".to_string(),
        })?;

        Ok(Self {
            task: task.into(),
            broker: broker.try_into()?,
        })
    }
}

/// Scalar outcome of one simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationResult {
    pub job_id: u64,
    pub sim_id: u64,
    pub objective: f64,
}

impl From<proto::SimResult> for SimulationResult {
    fn from(result: proto::SimResult) -> Self {
        Self {
            job_id: result.job_id,
            sim_id: result.sim_id,
            objective: result.objective,
        }
    }
}

impl From<SimulationResult> for proto::SimResult {
    fn from(result: SimulationResult) -> Self {
        Self {
            job_id: result.job_id,
            sim_id: result.sim_id,
            objective: result.objective,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uri_adds_scheme_only_when_missing() {
        assert_eq!(
            BrokerId::new("localhost:5000").endpoint_uri(),
            "http://localhost:5000"
        );
        assert_eq!(
            BrokerId::new("https://broker.internal:5000").endpoint_uri(),
            "https://broker.internal:5000"
        );
    }

    #[test]
    fn tagged_task_requires_params_and_broker() {
        let missing_params = proto::BrokerSimParams {
            sim_params: None,
            broker: Some(proto::BrokerEndpoint {
                address: "127.0.0.1:5000".into(),
            }),
        };
        assert!(matches!(
            BrokerTaggedTask::try_from(missing_params),
            Err(Error::InvalidRequest { .. })
        ));

        let blank_broker = proto::BrokerSimParams {
            sim_params: Some(proto::SimParams {
                job_id: 1,
                sim_id: 0,
                params: vec![1.0],
            }),
            broker: Some(proto::BrokerEndpoint {
                address: "  ".into(),
            }),
        };
        assert!(matches!(
            BrokerTaggedTask::try_from(blank_broker),
            Err(Error::InvalidRequest { .. })
        ));
    }

    #[test]
    fn tagging_keeps_the_task_intact() {
        let task = SimulationTask {
            job_id: 7,
            sim_id: 3,
            params: vec![0.5, -1.5],
        };
        let wire: proto::BrokerSimParams = task.clone().tag(BrokerId::new("h:1")).into();
        let back = BrokerTaggedTask::try_from(wire).unwrap();
        assert_eq!(back.task, task);
        assert_eq!(back.broker.as_str(), "h:1");
    }
}
