//! gRPC service implementation for the worker.
//!
//! ## Structure
//!
//! - [`handler`] - `Simulator` service entry point ([`handler::WorkerService`]).

pub mod handler;
