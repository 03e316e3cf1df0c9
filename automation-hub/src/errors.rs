//! Error types for the automation hub.
//!
//! Registration errors (`InvalidDefinitionError`, `CycleDetectedError`,
//! `ScheduleError`) are returned synchronously and nothing is persisted.
//! `QueueFullError` is retriable by the caller. `StageError` is retried under
//! the stage's policy and only becomes terminal once retries are exhausted.

use crate::core::StageKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// A pipeline definition was rejected.
    #[error("{0}")]
    InvalidDefinition(#[from] InvalidDefinitionError),

    /// The stage graph contains a cycle.
    #[error("{0}")]
    Cycle(#[from] CycleDetectedError),

    /// A schedule expression could not be parsed.
    #[error("{0}")]
    Schedule(#[from] ScheduleError),

    /// The execution queue is at capacity.
    #[error("{0}")]
    QueueFull(#[from] QueueFullError),

    /// An unknown pipeline or execution was referenced.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// The pipeline exists but is disabled.
    #[error("Pipeline '{0}' is disabled")]
    PipelineDisabled(String),

    /// The hub has not been started.
    #[error("Automation hub is not running")]
    NotRunning,

    /// The hub shut down before the request was admitted.
    #[error("Automation hub shut down before the request was admitted")]
    ShutDown,

    /// Invalid hub configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The persistence backend failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HubError {
    /// Returns true if the caller may retry the same request later.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::QueueFull(_))
    }
}

/// Stable diagnostic details attached to registration errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "DEF-003-MISSING-DEP").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error codes used by [`InvalidDefinitionError`].
pub mod codes {
    /// Pipeline has no stages.
    pub const EMPTY: &str = "DEF-001-EMPTY";
    /// A required field is missing or blank.
    pub const MISSING_FIELD: &str = "DEF-002-MISSING-FIELD";
    /// A dependency references an unknown stage.
    pub const MISSING_DEP: &str = "DEF-003-MISSING-DEP";
    /// Two stages share an ID.
    pub const DUPLICATE_STAGE: &str = "DEF-004-DUPLICATE-STAGE";
    /// A pipeline with this ID already exists.
    pub const DUPLICATE_PIPELINE: &str = "DEF-005-DUPLICATE-PIPELINE";
    /// A trigger is misconfigured.
    pub const BAD_TRIGGER: &str = "DEF-006-BAD-TRIGGER";
    /// The dependency graph contains a cycle.
    pub const CYCLE: &str = "DEF-007-CYCLE";
}

/// Error raised when a pipeline definition is rejected.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct InvalidDefinitionError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Diagnostic details.
    pub error_info: Option<ErrorInfo>,
}

impl InvalidDefinitionError {
    /// Creates a new invalid definition error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the diagnostic details.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
    /// Diagnostic details.
    pub error_info: ErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            codes::CYCLE,
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

/// Error raised when a schedule expression is malformed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid schedule expression '{expression}': {reason}")]
pub struct ScheduleError {
    /// The rejected expression.
    pub expression: String,
    /// Why it was rejected.
    pub reason: String,
}

impl ScheduleError {
    /// Creates a new schedule error.
    #[must_use]
    pub fn new(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when the execution queue is full.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Execution queue is full (capacity {capacity})")]
pub struct QueueFullError {
    /// The configured queue capacity.
    pub capacity: usize,
}

/// What kind of resource a [`NotFoundError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A pipeline.
    Pipeline,
    /// An execution.
    Execution,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline => write!(f, "Pipeline"),
            Self::Execution => write!(f, "Execution"),
        }
    }
}

/// Error raised for unknown pipeline or execution IDs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} not found: {id}")]
pub struct NotFoundError {
    /// The resource kind.
    pub kind: ResourceKind,
    /// The requested ID.
    pub id: String,
}

impl NotFoundError {
    /// Creates a pipeline not found error.
    #[must_use]
    pub fn pipeline(id: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Pipeline,
            id: id.into(),
        }
    }

    /// Creates an execution not found error.
    #[must_use]
    pub fn execution(id: impl ToString) -> Self {
        Self {
            kind: ResourceKind::Execution,
            id: id.to_string(),
        }
    }
}

/// Errors produced while running a single stage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// The dispatcher call exceeded the stage timeout.
    #[error("Stage '{stage}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The stage ID.
        stage: String,
        /// The timeout that was exceeded.
        timeout_ms: u64,
    },

    /// The dispatcher returned an error.
    #[error("Stage '{stage}' failed: {message}")]
    Execution {
        /// The stage ID.
        stage: String,
        /// The error message.
        message: String,
    },

    /// No handler is registered for the stage kind.
    #[error("Stage '{stage}' has no handler for kind '{kind}'")]
    NoHandler {
        /// The stage ID.
        stage: String,
        /// The unhandled kind.
        kind: StageKind,
    },

    /// Cancellation was observed while waiting to retry.
    #[error("Stage '{stage}' abandoned: execution cancelled")]
    Cancelled {
        /// The stage ID.
        stage: String,
    },
}

impl StageError {
    /// Creates an execution error.
    #[must_use]
    pub fn execution(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(stage: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            stage: stage.into(),
            timeout_ms,
        }
    }

    /// Returns true if another attempt could succeed.
    ///
    /// A missing handler and a cancellation are final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Execution { .. })
    }

    /// Returns the stage this error belongs to.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::Timeout { stage, .. }
            | Self::Execution { stage, .. }
            | Self::NoHandler { stage, .. }
            | Self::Cancelled { stage } => stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "my_stage");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"my_stage".to_string()));
    }

    #[test]
    fn test_invalid_definition_code() {
        let err = InvalidDefinitionError::new("no stages")
            .with_error_info(ErrorInfo::new(codes::EMPTY, "empty"));
        assert_eq!(err.code(), Some(codes::EMPTY));
        assert_eq!(err.to_string(), "no stages");
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.error_info.code, codes::CYCLE);
    }

    #[test]
    fn test_not_found_display() {
        let err = NotFoundError::pipeline("crm-sync");
        assert_eq!(err.to_string(), "Pipeline not found: crm-sync");
    }

    #[test]
    fn test_queue_full_is_retriable() {
        let err = HubError::from(QueueFullError { capacity: 4 });
        assert!(err.is_retriable());
        assert!(!HubError::NotRunning.is_retriable());
    }

    #[test]
    fn test_stage_error_stage_name() {
        assert_eq!(StageError::timeout("score", 50).stage(), "score");
        assert_eq!(
            StageError::timeout("score", 50).to_string(),
            "Stage 'score' timed out after 50ms"
        );
    }

    #[test]
    fn test_stage_error_retryable() {
        assert!(StageError::timeout("a", 10).is_retryable());
        assert!(StageError::execution("a", "boom").is_retryable());
        assert!(!StageError::Cancelled { stage: "a".into() }.is_retryable());
        assert!(!StageError::NoHandler {
            stage: "a".into(),
            kind: StageKind::Notification
        }
        .is_retryable());
    }
}
