//! Pipeline definitions and their registry.
//!
//! This module provides:
//! - Pipeline, stage and trigger definitions
//! - The dependency resolver
//! - Stage retry policies
//! - The pipeline registry

pub mod dag;
mod registry;
mod retry;
mod spec;

pub use registry::PipelineRegistry;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use spec::{Configuration, Pipeline, PipelineDefinition, StageDefinition, Trigger};
