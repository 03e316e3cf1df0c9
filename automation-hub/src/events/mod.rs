//! Lifecycle events.
//!
//! The hub reports every state change through an [`EventSink`]. Events are a
//! type string plus an optional JSON payload; the type strings are listed
//! below.

mod sink;

pub use sink::{ChannelEventSink, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A pipeline was registered.
pub const PIPELINE_REGISTERED: &str = "pipeline.registered";
/// A pipeline was enabled.
pub const PIPELINE_ENABLED: &str = "pipeline.enabled";
/// A pipeline was disabled.
pub const PIPELINE_DISABLED: &str = "pipeline.disabled";
/// A pipeline was deleted.
pub const PIPELINE_DELETED: &str = "pipeline.deleted";
/// A request entered the queue.
pub const QUEUE_ENQUEUED: &str = "queue.enqueued";
/// A request was refused or dropped by the queue.
pub const QUEUE_REJECTED: &str = "queue.rejected";
/// An execution was admitted.
pub const EXECUTION_STARTED: &str = "execution.started";
/// A stage started its first attempt.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage attempt failed and will be retried.
pub const STAGE_RETRYING: &str = "stage.retrying";
/// A stage completed.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage failed after exhausting retries.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage was skipped.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// An execution completed.
pub const EXECUTION_COMPLETED: &str = "execution.completed";
/// An execution failed.
pub const EXECUTION_FAILED: &str = "execution.failed";
/// An execution was cancelled.
pub const EXECUTION_CANCELLED: &str = "execution.cancelled";
