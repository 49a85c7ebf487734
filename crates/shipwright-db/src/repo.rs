//! Repository traits and PostgreSQL implementations.

pub mod deployment;
pub mod service;

pub use deployment::{DeploymentRepo, PgDeploymentRepo};
pub use service::{PgServiceRepo, ServiceRepo};
