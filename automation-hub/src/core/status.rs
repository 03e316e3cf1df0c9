//! Stage kinds, trigger kinds and the status state machines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a stage performs.
///
/// The set is closed: every kind is dispatched through a handler registered
/// in the [`DispatchTable`](crate::dispatch::DispatchTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// Transforms or aggregates business data.
    DataProcessing,
    /// Runs an analysis model or script over the stage inputs.
    AiAnalysis,
    /// Applies domain rules (approvals, routing, scoring).
    BusinessLogic,
    /// Sends a notification (mail, chat, push).
    Notification,
    /// Calls an external system.
    Integration,
}

impl StageKind {
    /// Every stage kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::DataProcessing,
        Self::AiAnalysis,
        Self::BusinessLogic,
        Self::Notification,
        Self::Integration,
    ];
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataProcessing => write!(f, "data-processing"),
            Self::AiAnalysis => write!(f, "ai-analysis"),
            Self::BusinessLogic => write!(f, "business-logic"),
            Self::Notification => write!(f, "notification"),
            Self::Integration => write!(f, "integration"),
        }
    }
}

/// What can start an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Recurring timer driven by a schedule expression.
    Schedule,
    /// A named domain event.
    Event,
    /// An inbound webhook call.
    Webhook,
    /// An explicit user or API call.
    Manual,
    /// An externally evaluated condition.
    Condition,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schedule => write!(f, "schedule"),
            Self::Event => write!(f, "event"),
            Self::Webhook => write!(f, "webhook"),
            Self::Manual => write!(f, "manual"),
            Self::Condition => write!(f, "condition"),
        }
    }
}

/// The status of a single stage within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not reached yet.
    #[default]
    Pending,
    /// Dispatcher call in flight (including retry back-off).
    Running,
    /// Finished with an output.
    Completed,
    /// Retries exhausted.
    Failed,
    /// A dependency did not complete.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the stage will not change status again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Returns true if dependents must not run.
    #[must_use]
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

/// The status of a whole execution.
///
/// `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Stages are still being driven.
    #[default]
    Running,
    /// Every reached stage completed or was skipped, none failed.
    Completed,
    /// At least one stage failed.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl ExecutionStatus {
    /// Returns true for `Completed`, `Failed` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::DataProcessing.to_string(), "data-processing");
        assert_eq!(StageKind::AiAnalysis.to_string(), "ai-analysis");
        assert_eq!(StageKind::BusinessLogic.to_string(), "business-logic");
        assert_eq!(StageKind::Notification.to_string(), "notification");
        assert_eq!(StageKind::Integration.to_string(), "integration");
    }

    #[test]
    fn test_stage_kind_serialize_matches_display() {
        for kind in StageKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_trigger_kind_deserialize() {
        let kind: TriggerKind = serde_json::from_str(r#""webhook""#).unwrap();
        assert_eq!(kind, TriggerKind::Webhook);
    }

    #[test]
    fn test_stage_status_terminal() {
        assert!(StageStatus::Completed.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_stage_status_blocks_dependents() {
        assert!(StageStatus::Failed.blocks_dependents());
        assert!(StageStatus::Skipped.blocks_dependents());
        assert!(!StageStatus::Completed.blocks_dependents());
    }

    #[test]
    fn test_execution_status_terminal() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert_eq!(ExecutionStatus::Cancelled.to_string(), "cancelled");
    }
}
