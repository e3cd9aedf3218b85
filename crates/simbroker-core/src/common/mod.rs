//! Shared types and error definitions used by the broker and the worker.
//!
//! ## Submodules
//!
//! - [`error`] - Centralized error type and its mapping onto gRPC statuses.
//! - [`types`] - Domain types exchanged over the wire (tasks, results, broker
//!   identifiers) and their protobuf conversions.
//! - [`deadline`] - Bounded timeouts applied to every outbound call.

pub mod deadline;
pub mod error;
pub mod types;

pub use error::{Error, Result};
