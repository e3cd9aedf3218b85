//! Error types for the simulation broker and worker.
//!
//! This module defines the central `Error` enum shared by both processes. It
//! implements `From<Error>` for `tonic::Status` so failures surface to the
//! immediate RPC caller with an appropriate status code, and converts
//! downstream `Status` values back into `Error` so a relay or push failure can
//! travel up the call chain unchanged.
//!
//! ## Error Cases
//! - `Routing`: a simulate call was tagged for a broker the worker does not
//!   know.
//! - `UnknownBroker`: deregistration of a broker that was never registered.
//! - `Transport`: a connection could not be established.
//! - `Remote`: a downstream RPC answered with an error status.
//! - `Timeout`: an outbound call exceeded its deadline.
//! - `InvalidRequest`: a malformed message.
//! - `EmptyWorkerPool`: a dispatch pool was built without workers.
//! - `Tls`: the CA certificate could not be loaded.
//! - `ServiceShutdown`: work arrived after the pool was drained.

use crate::common::types::BrokerId;
use core::time::Duration;
use tonic::Status;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the broker and worker services.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// A simulate call named a broker without a live connection.
    #[error("No connection registered for broker {broker}")]
    Routing { broker: BrokerId },

    /// Deregistration named a broker that is not registered.
    #[error("Broker {broker} is not registered")]
    UnknownBroker { broker: BrokerId },

    /// The connection to a peer could not be established.
    #[error("Transport error: {context}")]
    Transport { context: String },

    /// A downstream call returned an error status.
    #[error("Remote call failed: {0}")]
    Remote(#[from] Status),

    /// An outbound call did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The request was malformed.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A dispatch pool cannot be built without worker slots.
    #[error("Worker pool is empty")]
    EmptyWorkerPool,

    /// TLS material could not be loaded.
    #[error("TLS error: {context}")]
    Tls { context: String },

    /// The pool has been drained and refuses new work.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Transport {
            context: err.to_string(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Routing { broker } => {
                Status::failed_precondition(format!("Unknown broker: {broker}"))
            }
            Error::UnknownBroker { broker } => {
                Status::not_found(format!("Broker not registered: {broker}"))
            }
            Error::Transport { context } => Status::unavailable(context),
            Error::Remote(status) => status,
            Error::Timeout { operation, after } => {
                Status::deadline_exceeded(format!("{operation} timed out after {after:?}"))
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::EmptyWorkerPool => Status::failed_precondition("Worker pool is empty"),
            Error::Tls { context } => Status::internal(format!("TLS error: {context}")),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn routing_and_lookup_map_to_distinct_codes() {
        let broker = BrokerId::new("127.0.0.1:5000");

        let routing: Status = Error::Routing {
            broker: broker.clone(),
        }
        .into();
        assert_eq!(routing.code(), Code::FailedPrecondition);
        assert!(routing.message().contains("127.0.0.1:5000"));

        let lookup: Status = Error::UnknownBroker { broker }.into();
        assert_eq!(lookup.code(), Code::NotFound);
    }

    #[test]
    fn remote_status_passes_through_unchanged() {
        let original = Status::unavailable("search service down");
        let status: Status = Error::from(original).into();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "search service down");
    }

    #[test]
    fn timeout_is_deadline_exceeded() {
        let status: Status = Error::Timeout {
            operation: "Simulate",
            after: Duration::from_secs(3),
        }
        .into();
        assert_eq!(status.code(), Code::DeadlineExceeded);
    }
}
