//! Error types for Shipwright.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("port range exhausted: {0}")]
    PortExhausted(String),

    #[error("stream failed: {0}")]
    StreamFailed(String),

    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
