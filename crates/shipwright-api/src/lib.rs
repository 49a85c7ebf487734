//! API server for Shipwright.
//!
//! The HTTP boundary of the deployment core: the trigger endpoint,
//! deployment reads and the SSE log streams.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::{AppState, PlatformConfig};
