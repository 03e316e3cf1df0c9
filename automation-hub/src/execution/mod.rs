//! Executions: the data model, the live tracker, and the code that drives
//! stages through the dispatcher.

mod executor;
mod runner;
mod tracker;

pub use executor::{StageExecutor, StageOutcome};
pub use runner::ExecutionRunner;
pub use tracker::{CancelOutcome, ExecutionTracker};

use crate::core::{ExecutionStatus, StageStatus, TriggerKind};
use crate::pipeline::Pipeline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What started an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    /// The trigger kind.
    pub kind: TriggerKind,
    /// Caller-supplied data, visible to every stage.
    pub data: serde_json::Value,
    /// When the trigger fired.
    pub fired_at: DateTime<Utc>,
}

impl TriggerPayload {
    /// Creates a payload fired now.
    #[must_use]
    pub fn new(kind: TriggerKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            fired_at: Utc::now(),
        }
    }

    /// Creates a manual payload.
    #[must_use]
    pub fn manual(data: serde_json::Value) -> Self {
        Self::new(TriggerKind::Manual, data)
    }

    /// Creates the payload of a schedule tick.
    #[must_use]
    pub fn schedule(at: DateTime<Utc>) -> Self {
        Self {
            kind: TriggerKind::Schedule,
            data: serde_json::json!({
                "trigger": "schedule",
                "timestamp": at.to_rfc3339(),
            }),
            fired_at: at,
        }
    }
}

/// Result of one stage within one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage ID.
    pub stage_id: String,
    /// Current status.
    pub status: StageStatus,
    /// When the first attempt started.
    pub start_time: Option<DateTime<Utc>>,
    /// When the stage reached a terminal status.
    pub end_time: Option<DateTime<Utc>>,
    /// Handler output on success.
    pub output: Option<serde_json::Value>,
    /// Last error (or skip reason).
    pub error: Option<String>,
    /// Retries performed so far.
    pub retry_count: u32,
}

impl StageResult {
    /// Creates a pending result.
    #[must_use]
    pub fn pending(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Pending,
            start_time: None,
            end_time: None,
            output: None,
            error: None,
            retry_count: 0,
        }
    }
}

/// Counters derived from the stage results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Stages that ran to completion or failure.
    pub stages_executed: usize,
    /// Stages skipped because a dependency did not complete.
    pub stages_skipped: usize,
    /// Stages that failed after exhausting retries.
    pub stages_failed: usize,
    /// Wall-clock duration of the execution in milliseconds.
    pub total_duration_ms: u64,
}

impl ExecutionMetrics {
    /// Derives the counters from `results`.
    #[must_use]
    pub fn from_results(results: &[StageResult], total_duration_ms: u64) -> Self {
        let count = |status: StageStatus| results.iter().filter(|r| r.status == status).count();
        let failed = count(StageStatus::Failed);
        Self {
            stages_executed: count(StageStatus::Completed) + failed,
            stages_skipped: count(StageStatus::Skipped),
            stages_failed: failed,
            total_duration_ms,
        }
    }
}

/// One run of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique run ID.
    pub execution_id: Uuid,
    /// The pipeline being run.
    pub pipeline_id: String,
    /// Tenant of the pipeline.
    pub tenant_id: String,
    /// Current status.
    pub status: ExecutionStatus,
    /// When the execution was admitted.
    pub start_time: DateTime<Utc>,
    /// When the execution became terminal.
    pub end_time: Option<DateTime<Utc>>,
    /// `end_time - start_time`, fixed at the terminal transition.
    pub duration_ms: Option<u64>,
    /// What started the run.
    pub trigger: TriggerPayload,
    /// One result per stage, in execution order.
    pub stage_results: Vec<StageResult>,
    /// Counters, filled at the terminal transition.
    pub metrics: ExecutionMetrics,
    /// Top-level error for failed or cancelled runs.
    pub error: Option<String>,
}

impl Execution {
    /// Creates a running execution with a pending result per stage.
    #[must_use]
    pub fn new(pipeline: &Pipeline, trigger: TriggerPayload) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            pipeline_id: pipeline.id.clone(),
            tenant_id: pipeline.tenant_id.clone(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            trigger,
            stage_results: pipeline
                .execution_order
                .iter()
                .map(StageResult::pending)
                .collect(),
            metrics: ExecutionMetrics::default(),
            error: None,
        }
    }

    /// Returns the result of one stage.
    #[must_use]
    pub fn stage_result(&self, stage_id: &str) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.stage_id == stage_id)
    }

    pub(crate) fn stage_result_mut(&mut self, stage_id: &str) -> Option<&mut StageResult> {
        self.stage_results.iter_mut().find(|r| r.stage_id == stage_id)
    }

    /// Returns true once the status is no longer `Running`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Stage IDs in the order their results are listed.
    #[must_use]
    pub fn stage_order(&self) -> Vec<&str> {
        self.stage_results.iter().map(|r| r.stage_id.as_str()).collect()
    }

    /// Moves a running execution to `status`, fixing end time, duration and
    /// metrics. Returns false if it was already terminal.
    pub(crate) fn finish(&mut self, status: ExecutionStatus, error: Option<String>) -> bool {
        if self.is_terminal() || !status.is_terminal() {
            return false;
        }
        let end = Utc::now();
        let duration_ms = u64::try_from((end - self.start_time).num_milliseconds()).unwrap_or(0);
        self.status = status;
        self.end_time = Some(end);
        self.duration_ms = Some(duration_ms);
        self.metrics = ExecutionMetrics::from_results(&self.stage_results, duration_ms);
        if error.is_some() {
            self.error = error;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageKind;
    use crate::pipeline::{PipelineDefinition, StageDefinition};

    fn pipeline() -> Pipeline {
        let def = PipelineDefinition::new("p")
            .with_stage(StageDefinition::new("b", StageKind::Notification).with_dependency("a"))
            .with_stage(StageDefinition::new("a", StageKind::DataProcessing));
        Pipeline::from_definition("p1".into(), def, vec!["a".into(), "b".into()])
    }

    #[test]
    fn test_new_execution_has_pending_results_in_order() {
        let execution = Execution::new(&pipeline(), TriggerPayload::manual(serde_json::json!({})));
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.stage_order(), vec!["a", "b"]);
        assert!(execution
            .stage_results
            .iter()
            .all(|r| r.status == StageStatus::Pending && r.retry_count == 0));
    }

    #[test]
    fn test_finish_is_one_shot() {
        let mut execution = Execution::new(&pipeline(), TriggerPayload::manual(serde_json::json!({})));
        execution.stage_result_mut("a").unwrap().status = StageStatus::Completed;

        assert!(execution.finish(ExecutionStatus::Completed, None));
        let end = execution.end_time;
        let duration = execution.duration_ms;
        assert_eq!(execution.metrics.stages_executed, 1);

        assert!(!execution.finish(ExecutionStatus::Failed, Some("late".into())));
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.end_time, end);
        assert_eq!(execution.duration_ms, duration);
        assert!(execution.error.is_none());
    }

    #[test]
    fn test_metrics_from_results() {
        let mut results = vec![
            StageResult::pending("a"),
            StageResult::pending("b"),
            StageResult::pending("c"),
            StageResult::pending("d"),
        ];
        results[0].status = StageStatus::Completed;
        results[1].status = StageStatus::Failed;
        results[2].status = StageStatus::Skipped;

        let metrics = ExecutionMetrics::from_results(&results, 42);
        assert_eq!(
            metrics,
            ExecutionMetrics {
                stages_executed: 2,
                stages_skipped: 1,
                stages_failed: 1,
                total_duration_ms: 42,
            }
        );
    }

    #[test]
    fn test_schedule_payload_shape() {
        let at = Utc::now();
        let payload = TriggerPayload::schedule(at);
        assert_eq!(payload.kind, TriggerKind::Schedule);
        assert_eq!(payload.data["trigger"], "schedule");
        assert_eq!(payload.data["timestamp"], at.to_rfc3339());
    }
}
