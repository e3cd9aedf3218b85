#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

pub mod telemetry;

/// gRPC service and message definitions generated from
/// `proto/simbroker.proto`.
///
/// ## Services
///
/// - `SearchService` - the external job-search service (broker is a client).
/// - `Broker` - served by the broker; workers push results into it.
/// - `Simulator` - served by each worker; the broker dispatches into it.
pub mod proto {
    tonic::include_proto!("simbroker");
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("simbroker_descriptor");
}
