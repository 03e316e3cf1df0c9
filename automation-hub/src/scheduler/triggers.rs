//! Converts triggers into queued execution requests.
//!
//! Each enabled pipeline with schedule triggers owns one timer task per
//! schedule. Timers only enqueue; a full queue drops the tick and the timer
//! keeps running.

use super::Schedule;
use crate::cancellation::CancellationToken;
use crate::core::TriggerKind;
use crate::errors::HubError;
use crate::events::{self, EventSink};
use crate::execution::TriggerPayload;
use crate::pipeline::Pipeline;
use crate::queue::{ExecutionQueue, QueuedRequest};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct PipelineTimers {
    token: Arc<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the schedule timers and the enqueue path for every trigger kind.
pub struct TriggerScheduler {
    queue: Arc<ExecutionQueue>,
    events: Arc<dyn EventSink>,
    timers: DashMap<String, PipelineTimers>,
}

impl TriggerScheduler {
    /// Creates a scheduler feeding `queue`.
    #[must_use]
    pub fn new(queue: Arc<ExecutionQueue>, events: Arc<dyn EventSink>) -> Self {
        Self {
            queue,
            events,
            timers: DashMap::new(),
        }
    }

    /// Arms the enabled schedule triggers of `pipeline`, replacing any
    /// timers it already had. Disabled pipelines end up with no timers.
    ///
    /// Returns the number of timers armed. Must be called inside a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns `Schedule` if a schedule expression no longer parses.
    pub fn schedule(&self, pipeline: &Pipeline) -> Result<usize, HubError> {
        let schedules = pipeline.schedules()?;
        self.unschedule(&pipeline.id);
        if !pipeline.enabled || schedules.is_empty() {
            return Ok(0);
        }

        let token = Arc::new(CancellationToken::new());
        let handles: Vec<JoinHandle<()>> = schedules
            .into_iter()
            .map(|schedule| {
                tokio::spawn(run_timer(
                    pipeline.id.clone(),
                    schedule,
                    Arc::clone(&self.queue),
                    Arc::clone(&self.events),
                    Arc::clone(&token),
                ))
            })
            .collect();
        let armed = handles.len();
        self.timers
            .insert(pipeline.id.clone(), PipelineTimers { token, handles });
        info!(pipeline_id = %pipeline.id, timers = armed, "Schedule triggers armed");
        Ok(armed)
    }

    /// Stops the timers of `pipeline_id`. Returns false if it had none.
    pub fn unschedule(&self, pipeline_id: &str) -> bool {
        match self.timers.remove(pipeline_id) {
            Some((_, timers)) => {
                timers.token.cancel("unscheduled");
                debug!(pipeline_id = %pipeline_id, "Schedule triggers stopped");
                true
            }
            None => false,
        }
    }

    /// Returns true if `pipeline_id` has armed timers.
    #[must_use]
    pub fn is_scheduled(&self, pipeline_id: &str) -> bool {
        self.timers.contains_key(pipeline_id)
    }

    /// Number of pipelines with armed timers.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.timers.len()
    }

    /// Enqueues a fire-and-forget request for `pipeline_id`.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the queue is at capacity, `ShutDown` once it is closed.
    pub fn fire(
        &self,
        pipeline_id: &str,
        kind: TriggerKind,
        data: serde_json::Value,
    ) -> Result<Uuid, HubError> {
        enqueue(
            &self.queue,
            self.events.as_ref(),
            QueuedRequest::new(pipeline_id, TriggerPayload::new(kind, data)),
        )
    }

    /// Stops every timer and waits for the tasks to exit.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.timers.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::new();
        for id in ids {
            if let Some((_, timers)) = self.timers.remove(&id) {
                timers.token.cancel("shutdown");
                handles.extend(timers.handles);
            }
        }
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Schedule timer ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for TriggerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerScheduler")
            .field("scheduled", &self.timers.len())
            .field("queue_len", &self.queue.len())
            .finish()
    }
}

/// Pushes `request` and reports the outcome as an event.
pub(crate) fn enqueue(
    queue: &ExecutionQueue,
    sink: &dyn EventSink,
    request: QueuedRequest,
) -> Result<Uuid, HubError> {
    let pipeline_id = request.pipeline_id.clone();
    let kind = request.trigger.kind;
    match queue.push(request) {
        Ok(request_id) => {
            sink.try_emit(
                events::QUEUE_ENQUEUED,
                Some(serde_json::json!({
                    "request_id": request_id,
                    "pipeline_id": pipeline_id,
                    "trigger": kind,
                })),
            );
            Ok(request_id)
        }
        Err(e) => {
            sink.try_emit(
                events::QUEUE_REJECTED,
                Some(serde_json::json!({
                    "pipeline_id": pipeline_id,
                    "trigger": kind,
                    "error": e.to_string(),
                })),
            );
            Err(e)
        }
    }
}

async fn run_timer(
    pipeline_id: String,
    schedule: Schedule,
    queue: Arc<ExecutionQueue>,
    sink: Arc<dyn EventSink>,
    token: Arc<CancellationToken>,
) {
    loop {
        let Some(delay) = schedule.next_delay(Utc::now()) else {
            debug!(pipeline_id = %pipeline_id, "Schedule has no further occurrences");
            return;
        };
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let request = QueuedRequest::new(pipeline_id.as_str(), TriggerPayload::schedule(Utc::now()));
        match enqueue(&queue, sink.as_ref(), request) {
            Ok(request_id) => {
                debug!(pipeline_id = %pipeline_id, request_id = %request_id, "Schedule tick enqueued");
            }
            Err(HubError::ShutDown) => return,
            Err(e) => {
                warn!(pipeline_id = %pipeline_id, error = %e, "Schedule tick dropped");
            }
        }
    }
}
