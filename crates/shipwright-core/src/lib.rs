//! Core domain types and traits for the Shipwright deployment platform.
//!
//! This crate contains:
//! - Resource identifiers and common types
//! - Service and deployment domain models
//! - The managed-service class catalog
//! - Collaborator traits (image builder, resource synthesizer)
//! - Cluster label conventions

pub mod build;
pub mod deployment;
pub mod error;
pub mod id;
pub mod labels;
pub mod managed;
pub mod service;
pub mod synth;

pub use error::{Error, Result};
pub use id::ResourceId;
