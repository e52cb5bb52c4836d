//! Synthesis orchestration
//!
//! `executor` drives one partition; `lifecycle` sequences the whole run.

pub mod executor;
pub mod lifecycle;

pub use executor::{FunctionReport, FunctionState, Orchestrator, PartitionReport};
pub use lifecycle::{plan, synthesize, synthesize_with, SynthesisOptions, SynthesisOutput};
