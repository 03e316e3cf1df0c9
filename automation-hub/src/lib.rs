//! # Automation Hub
//!
//! A pipeline orchestrator for multi-stage business automations.
//!
//! The hub provides:
//!
//! - **Pipeline registry**: validated definitions persisted through a
//!   pluggable store and reloaded on start
//! - **Dependency resolution**: a deterministic execution order with cycle
//!   detection at registration
//! - **Triggers**: schedules (intervals or cron), domain events, webhooks,
//!   conditions and manual runs all feed one bounded queue
//! - **Bounded concurrency**: at most `max_concurrency` executions run at once
//! - **Stage execution**: per-stage timeouts and retries with backoff
//! - **Tracking and metrics**: live execution snapshots, cancellation and
//!   per-tenant aggregates
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use automation_hub::prelude::*;
//!
//! let hub = AutomationHub::builder()
//!     .config(HubConfig::new().with_max_concurrency(4))
//!     .handler(StageKind::AiAnalysis, Arc::new(ScriptHandler::new().with_program("python3")))
//!     .build()?;
//! hub.start().await?;
//!
//! let pipeline = hub
//!     .create_pipeline(
//!         PipelineDefinition::new("lead-scoring")
//!             .with_stage(StageDefinition::new("fetch", StageKind::Integration))
//!             .with_stage(StageDefinition::new("score", StageKind::AiAnalysis).with_dependency("fetch"))
//!             .with_trigger(Trigger::schedule("*/15 * * * *")),
//!     )
//!     .await?;
//!
//! let execution = hub.execute_pipeline(&pipeline.id, serde_json::json!({})).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod execution;
pub mod hub;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod testing;

#[cfg(test)]
mod integration_tests;

pub use hub::{AutomationHub, AutomationHubBuilder};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::HubConfig;
    pub use crate::core::{ExecutionStatus, StageKind, StageStatus, TriggerKind};
    #[cfg(feature = "http")]
    pub use crate::dispatch::HttpHandler;
    pub use crate::dispatch::{
        DispatchTable, FnHandler, ScriptHandler, StageContext, StageHandler,
    };
    pub use crate::errors::{
        CycleDetectedError, HubError, InvalidDefinitionError, NotFoundError, QueueFullError,
        StageError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::execution::{Execution, StageResult, TriggerPayload};
    pub use crate::hub::{AutomationHub, AutomationHubBuilder};
    pub use crate::metrics::{AggregateMetrics, TenantTotals, TimeRange};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        BackoffStrategy, Pipeline, PipelineDefinition, RetryPolicy, StageDefinition, Trigger,
    };
    pub use crate::store::{JsonFileStore, MemoryStore, PipelineStore};
}
