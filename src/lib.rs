//! Ingestion core for a cloud provider's control plane.
//!
//! Steps declared in an embedded catalog list the provider's resources,
//! store them as graph entities in a shared job state and link them with
//! relationships for an external synchronizer.

pub mod config;
pub mod error;
pub mod graph;
pub mod provider;
pub mod resolve;
pub mod steps;

/// Version injected at compile time via CLOUDGRAPH_VERSION env var (set by
/// CI/CD), or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDGRAPH_VERSION") {
    Some(v) => v,
    None => "dev",
};
