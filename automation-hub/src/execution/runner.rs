//! Drives one execution through its stages in resolved order.
//!
//! Stages run one at a time. A stage whose dependency failed or was skipped
//! is skipped. The first stage failure halts the run: dependents of failed
//! or skipped stages are still marked skipped, other unreached stages stay
//! pending. Cancellation is checked before every stage.

use super::{Execution, ExecutionTracker, StageExecutor};
use crate::cancellation::CancellationToken;
use crate::core::StageStatus;
use crate::dispatch::StageContext;
use crate::errors::StageError;
use crate::events::{self, EventSink};
use crate::pipeline::{Pipeline, StageDefinition};
use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runs admitted executions.
#[derive(Clone)]
pub struct ExecutionRunner {
    tracker: Arc<ExecutionTracker>,
    executor: StageExecutor,
    events: Arc<dyn EventSink>,
}

impl ExecutionRunner {
    /// Creates a runner writing into `tracker`.
    #[must_use]
    pub fn new(
        tracker: Arc<ExecutionTracker>,
        executor: StageExecutor,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            tracker,
            executor,
            events,
        }
    }

    /// Runs every stage of `pipeline` for the tracked execution `execution_id`.
    ///
    /// Returns the final snapshot if this run made the terminal transition;
    /// `None` if the execution was cancelled (or is unknown).
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        execution_id: Uuid,
        token: &CancellationToken,
    ) -> Option<Execution> {
        let trigger = self.tracker.get(execution_id)?.trigger;
        let mut statuses: HashMap<&str, StageStatus> = HashMap::new();
        let mut outputs: HashMap<&str, serde_json::Value> = HashMap::new();
        let mut failure: Option<StageError> = None;

        for stage_id in &pipeline.execution_order {
            let Some(stage) = pipeline.stage(stage_id) else {
                continue;
            };
            if token.is_cancelled() {
                info!(
                    execution_id = %execution_id,
                    stage_id = %stage.id,
                    reason = ?token.reason(),
                    "Execution cancelled, not starting further stages"
                );
                return None;
            }

            let blocked_by = stage
                .dependencies
                .iter()
                .find(|d| statuses.get(d.as_str()).is_some_and(StageStatus::blocks_dependents));
            if let Some(dep) = blocked_by {
                self.skip(execution_id, stage, dep);
                statuses.insert(&stage.id, StageStatus::Skipped);
                continue;
            }
            if failure.is_some() {
                continue;
            }

            let inputs: BTreeMap<String, serde_json::Value> = stage
                .dependencies
                .iter()
                .filter_map(|d| outputs.get(d.as_str()).map(|v| (d.clone(), v.clone())))
                .collect();
            let ctx = StageContext {
                execution_id,
                pipeline_id: pipeline.id.clone(),
                tenant_id: pipeline.tenant_id.clone(),
                stage_id: stage.id.clone(),
                attempt: 0,
                trigger: trigger.clone(),
                inputs,
            };

            match self.run_stage(stage, ctx, token).await {
                Ok(output) => {
                    statuses.insert(&stage.id, StageStatus::Completed);
                    outputs.insert(&stage.id, output);
                }
                Err(StageError::Cancelled { .. }) => return None,
                Err(err) => {
                    statuses.insert(&stage.id, StageStatus::Failed);
                    failure = Some(err);
                }
            }
        }

        if token.is_cancelled() {
            return None;
        }

        let finished = self
            .tracker
            .finish(execution_id, failure.as_ref().map(ToString::to_string))?;
        let payload = json!({
            "execution_id": execution_id,
            "pipeline_id": pipeline.id,
            "duration_ms": finished.duration_ms,
            "metrics": finished.metrics,
        });
        if failure.is_some() {
            warn!(
                execution_id = %execution_id,
                pipeline_id = %pipeline.id,
                error = ?finished.error,
                "Execution failed"
            );
            self.events.try_emit(events::EXECUTION_FAILED, Some(payload));
        } else {
            info!(
                execution_id = %execution_id,
                pipeline_id = %pipeline.id,
                duration_ms = ?finished.duration_ms,
                "Execution completed"
            );
            self.events.try_emit(events::EXECUTION_COMPLETED, Some(payload));
        }
        Some(finished)
    }

    async fn run_stage(
        &self,
        stage: &StageDefinition,
        ctx: StageContext,
        token: &CancellationToken,
    ) -> Result<serde_json::Value, StageError> {
        let execution_id = ctx.execution_id;
        self.tracker.update_stage(execution_id, &stage.id, |r| {
            r.status = StageStatus::Running;
            r.start_time = Some(Utc::now());
        });
        debug!(execution_id = %execution_id, stage_id = %stage.id, kind = %stage.kind, "Stage started");
        self.events.try_emit(
            events::STAGE_STARTED,
            Some(json!({"execution_id": execution_id, "stage_id": stage.id})),
        );

        let tracker = &self.tracker;
        let sink = &self.events;
        let outcome = self
            .executor
            .run(stage, ctx, token, |retry_count, err, delay| {
                tracker.update_stage(execution_id, &stage.id, |r| {
                    r.retry_count = retry_count;
                    r.error = Some(err.to_string());
                });
                warn!(
                    execution_id = %execution_id,
                    stage_id = %stage.id,
                    retry = retry_count,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Stage attempt failed, retrying"
                );
                sink.try_emit(
                    events::STAGE_RETRYING,
                    Some(json!({
                        "execution_id": execution_id,
                        "stage_id": stage.id,
                        "retry_count": retry_count,
                        "error": err.to_string(),
                    })),
                );
            })
            .await;

        let retry_count = outcome.retry_count;
        match outcome.result {
            Ok(output) => {
                self.tracker.update_stage(execution_id, &stage.id, |r| {
                    r.status = StageStatus::Completed;
                    r.end_time = Some(Utc::now());
                    r.output = Some(output.clone());
                    r.error = None;
                    r.retry_count = retry_count;
                });
                debug!(execution_id = %execution_id, stage_id = %stage.id, retry_count, "Stage completed");
                self.events.try_emit(
                    events::STAGE_COMPLETED,
                    Some(json!({
                        "execution_id": execution_id,
                        "stage_id": stage.id,
                        "retry_count": retry_count,
                    })),
                );
                Ok(output)
            }
            Err(err @ StageError::Cancelled { .. }) => {
                debug!(execution_id = %execution_id, stage_id = %stage.id, "Stage abandoned on cancellation");
                Err(err)
            }
            Err(err) => {
                self.tracker.update_stage(execution_id, &stage.id, |r| {
                    r.status = StageStatus::Failed;
                    r.end_time = Some(Utc::now());
                    r.error = Some(err.to_string());
                    r.retry_count = retry_count;
                });
                error!(
                    execution_id = %execution_id,
                    stage_id = %stage.id,
                    retry_count,
                    error = %err,
                    "Stage failed"
                );
                self.events.try_emit(
                    events::STAGE_FAILED,
                    Some(json!({
                        "execution_id": execution_id,
                        "stage_id": stage.id,
                        "retry_count": retry_count,
                        "error": err.to_string(),
                    })),
                );
                Err(err)
            }
        }
    }

    fn skip(&self, execution_id: Uuid, stage: &StageDefinition, dependency: &str) {
        let reason = format!("Dependency '{dependency}' did not complete");
        self.tracker.update_stage(execution_id, &stage.id, |r| {
            r.status = StageStatus::Skipped;
            r.end_time = Some(Utc::now());
            r.error = Some(reason.clone());
        });
        debug!(execution_id = %execution_id, stage_id = %stage.id, dependency, "Stage skipped");
        self.events.try_emit(
            events::STAGE_SKIPPED,
            Some(json!({
                "execution_id": execution_id,
                "stage_id": stage.id,
                "dependency": dependency,
            })),
        );
    }
}

impl std::fmt::Debug for ExecutionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRunner")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExecutionStatus;
    use crate::dispatch::DispatchTable;
    use crate::events::CollectingEventSink;
    use crate::execution::TriggerPayload;
    use crate::pipeline::{dag, Pipeline, PipelineDefinition, RetryPolicy};
    use crate::testing::{definition, fan_out, stage, MockHandler};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Harness {
        tracker: Arc<ExecutionTracker>,
        runner: ExecutionRunner,
        sink: Arc<CollectingEventSink>,
    }

    fn harness(handler: &Arc<MockHandler>) -> Harness {
        let tracker = Arc::new(ExecutionTracker::new());
        let sink = Arc::new(CollectingEventSink::new());
        let executor = StageExecutor::new(
            Arc::new(DispatchTable::uniform(handler.clone())),
            Duration::from_secs(5),
        );
        Harness {
            runner: ExecutionRunner::new(tracker.clone(), executor, sink.clone()),
            tracker,
            sink,
        }
    }

    fn resolve(def: PipelineDefinition) -> Pipeline {
        let order = dag::sort(&def.stages).unwrap();
        let id = def.id.clone().unwrap();
        Pipeline::from_definition(id, def, order)
    }

    fn start(h: &Harness, pipeline: &Pipeline) -> Uuid {
        let execution = Execution::new(pipeline, TriggerPayload::manual(json!({"order": 7})));
        let id = execution.execution_id;
        h.tracker.insert(execution);
        id
    }

    fn status_of(execution: &Execution, stage: &str) -> StageStatus {
        execution.stage_result(stage).unwrap().status
    }

    #[tokio::test]
    async fn test_runs_in_order_and_passes_outputs() {
        let handler = Arc::new(MockHandler::new());
        let h = harness(&handler);
        let pipeline = resolve(fan_out("p"));
        let id = start(&h, &pipeline);

        let done = h.runner.run(&pipeline, id, &CancellationToken::new()).await.unwrap();

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(handler.calls(), vec!["a", "b", "c"]);
        let inputs = handler.inputs_seen("b").unwrap();
        assert_eq!(inputs["a"]["stage"], "a");
        assert_eq!(handler.triggers_seen()[0]["order"], 7);
        assert_eq!(done.metrics.stages_executed, 3);
        assert!(h.sink.types().contains(&"execution.completed".to_string()));
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_and_halts() {
        let handler = Arc::new(MockHandler::new().fail_always("b"));
        let h = harness(&handler);
        // a -> b -> d, a -> c; c is independent of b.
        let pipeline = resolve(definition(
            "p",
            vec![
                stage("a", &[]),
                stage("b", &["a"]),
                stage("c", &["a"]),
                stage("d", &["b"]),
            ],
        ));
        let id = start(&h, &pipeline);

        let done = h.runner.run(&pipeline, id, &CancellationToken::new()).await.unwrap();

        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(status_of(&done, "a"), StageStatus::Completed);
        assert_eq!(status_of(&done, "b"), StageStatus::Failed);
        assert_eq!(status_of(&done, "c"), StageStatus::Pending);
        assert_eq!(status_of(&done, "d"), StageStatus::Skipped);
        assert_eq!(handler.calls(), vec!["a", "b"]);
        assert!(done.error.unwrap().contains("'b'"));
        assert_eq!(done.metrics.stages_skipped, 1);
    }

    #[tokio::test]
    async fn test_skip_is_transitive() {
        let handler = Arc::new(MockHandler::new().fail_always("a"));
        let h = harness(&handler);
        let pipeline = resolve(definition(
            "p",
            vec![stage("a", &[]), stage("b", &["a"]), stage("c", &["b"])],
        ));
        let id = start(&h, &pipeline);

        let done = h.runner.run(&pipeline, id, &CancellationToken::new()).await.unwrap();

        assert_eq!(status_of(&done, "b"), StageStatus::Skipped);
        assert_eq!(status_of(&done, "c"), StageStatus::Skipped);
        assert_eq!(h.sink.events_of_type("stage.skipped").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_count_recorded() {
        let handler = Arc::new(MockHandler::new().fail_times("a", 1));
        let h = harness(&handler);
        let pipeline = resolve(definition(
            "p",
            vec![stage("a", &[]).with_retry_policy(RetryPolicy::none().with_max_retries(2))],
        ));
        let id = start(&h, &pipeline);

        let done = h.runner.run(&pipeline, id, &CancellationToken::new()).await.unwrap();

        let result = done.stage_result("a").unwrap();
        assert_eq!(result.status, StageStatus::Completed);
        assert_eq!(result.retry_count, 1);
        assert!(result.error.is_none());
        assert_eq!(h.sink.events_of_type("stage.retrying").len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let handler = Arc::new(MockHandler::new());
        let h = harness(&handler);
        let pipeline = resolve(fan_out("p"));
        let id = start(&h, &pipeline);

        let token = CancellationToken::new();
        token.cancel("stop");
        h.tracker.cancel(id, "stop").unwrap();

        assert!(h.runner.run(&pipeline, id, &token).await.is_none());
        assert!(handler.calls().is_empty());
        assert_eq!(h.tracker.get(id).unwrap().status, ExecutionStatus::Cancelled);
    }
}
