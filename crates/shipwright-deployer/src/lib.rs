//! Resource synthesis for Shipwright.
//!
//! Turns service definitions into cluster resource sets and applies them
//! as one logical unit, allocating external ports for managed services
//! along the way.

pub mod env;
pub mod git;
pub mod managed;
pub mod names;
pub mod ports;
pub mod synthesizer;

pub use ports::PortAllocator;
pub use synthesizer::{KubeSynthesizer, SynthesizerConfig};
