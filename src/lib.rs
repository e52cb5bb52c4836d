//! fnstack generates function definitions for a serverless backend.
//!
//! It validates a registry of function descriptors, derives stable names,
//! splits the registry into bounded deployment units and wires every function
//! to shared infrastructure and gateway routes.

pub mod binding;
pub mod config;
pub mod core;
pub mod logging;
pub mod naming;
pub mod orchestration;
pub mod partition;
pub mod synth;
