//! Vantage workload inspector: relationship resolution over the object cache,
//! the dependency-graph builder, and per-node status evaluation.

#![forbid(unsafe_code)]

pub mod graph;
pub mod relations;
pub mod status;

pub use graph::build;
pub use status::{match_port, resource_status};
