//! The automation hub: wires the registry, scheduler, queue, runner and
//! tracker together behind one API.
//!
//! Lifecycle is `Created -> Running -> Stopped`. A stopped hub cannot be
//! restarted; build a new one over the same store instead.

use crate::cancellation::CancellationToken;
use crate::config::HubConfig;
use crate::core::{StageKind, TriggerKind};
use crate::dispatch::{DispatchTable, StageHandler};
use crate::errors::{HubError, NotFoundError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::execution::{
    CancelOutcome, Execution, ExecutionRunner, ExecutionTracker, StageExecutor, TriggerPayload,
};
use crate::metrics::{AggregateMetrics, MetricsAggregator, TenantTotals, TimeRange};
use crate::observability::execution_span;
use crate::pipeline::{Pipeline, PipelineDefinition, PipelineRegistry};
use crate::queue::{ExecutionQueue, QueuedRequest};
use crate::scheduler::{self, TriggerScheduler};
use crate::store::{MemoryStore, PipelineStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

enum Lifecycle {
    Created,
    Running(JoinHandle<()>),
    Stopped,
}

/// Builder for [`AutomationHub`].
#[derive(Default)]
pub struct AutomationHubBuilder {
    config: HubConfig,
    store: Option<Arc<dyn PipelineStore>>,
    dispatch: DispatchTable,
    events: Option<Arc<dyn EventSink>>,
}

impl AutomationHubBuilder {
    /// Sets the hub configuration.
    #[must_use]
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the pipeline store. Defaults to an in-memory store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn PipelineStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the whole dispatch table.
    #[must_use]
    pub fn dispatch(mut self, dispatch: DispatchTable) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Registers the handler for one stage kind.
    #[must_use]
    pub fn handler(mut self, kind: StageKind, handler: Arc<dyn StageHandler>) -> Self {
        self.dispatch.register(kind, handler);
        self
    }

    /// Sets the event sink. Defaults to [`NoOpEventSink`].
    #[must_use]
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Builds a hub in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration does not validate.
    pub fn build(self) -> Result<Arc<AutomationHub>, HubError> {
        self.config.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn PipelineStore>);
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(NoOpEventSink) as Arc<dyn EventSink>);

        let queue = Arc::new(ExecutionQueue::new(self.config.queue_capacity));
        let tracker = Arc::new(ExecutionTracker::new());
        let executor = StageExecutor::new(
            Arc::new(self.dispatch),
            Duration::from_millis(self.config.default_stage_timeout_ms),
        );

        Ok(Arc::new(AutomationHub {
            registry: PipelineRegistry::new(store),
            scheduler: TriggerScheduler::new(Arc::clone(&queue), Arc::clone(&events)),
            runner: ExecutionRunner::new(Arc::clone(&tracker), executor, Arc::clone(&events)),
            permits: Arc::new(Semaphore::new(self.config.max_concurrency)),
            queue,
            tracker,
            metrics: MetricsAggregator::new(),
            events,
            tokens: DashMap::new(),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Created),
            pipeline_writes: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            config: self.config,
        }))
    }
}

/// Orchestrates pipelines from trigger to finished execution.
pub struct AutomationHub {
    config: HubConfig,
    registry: PipelineRegistry,
    queue: Arc<ExecutionQueue>,
    scheduler: TriggerScheduler,
    tracker: Arc<ExecutionTracker>,
    runner: ExecutionRunner,
    metrics: MetricsAggregator,
    events: Arc<dyn EventSink>,
    permits: Arc<Semaphore>,
    tokens: DashMap<Uuid, Arc<CancellationToken>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    /// Held across a registry change and the timer re-arm that follows it.
    pipeline_writes: tokio::sync::Mutex<()>,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl AutomationHub {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> AutomationHubBuilder {
        AutomationHubBuilder::default()
    }

    /// Loads stored pipelines, arms their schedules and starts admitting
    /// queued requests. Starting a running hub is a no-op.
    ///
    /// # Errors
    ///
    /// `ShutDown` if the hub was already stopped, `Store` if loading fails.
    pub async fn start(self: &Arc<Self>) -> Result<(), HubError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::Stopped => return Err(HubError::ShutDown),
            Lifecycle::Created => {}
        }

        let loaded = self.registry.load_all().await?;
        let mut armed = 0;
        for pipeline in self.registry.list().into_iter().filter(|p| p.enabled) {
            match self.scheduler.schedule(&pipeline) {
                Ok(n) => armed += n,
                Err(e) => {
                    warn!(pipeline_id = %pipeline.id, error = %e, "Could not arm schedule triggers");
                }
            }
        }

        self.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(Arc::clone(self).admission_loop());
        *lifecycle = Lifecycle::Running(handle);
        info!(
            pipelines = loaded,
            timers = armed,
            max_concurrency = self.config.max_concurrency,
            "Automation hub started"
        );
        Ok(())
    }

    /// Stops timers and admission, and fails every queued request with
    /// `ShutDown`. Executions already running finish on their own.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel("hub shutdown");
        self.scheduler.shutdown().await;

        if let Lifecycle::Running(handle) = previous {
            if let Err(e) = handle.await {
                warn!(error = %e, "Admission loop ended abnormally");
            }
        }

        let pending = self.queue.close();
        let dropped = pending.len();
        for request in pending {
            request.respond(Err(HubError::ShutDown));
        }
        info!(dropped, running = self.tracker.running_count(), "Automation hub stopped");
    }

    /// Returns true between `start` and `shutdown`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    // ---- pipelines ----

    /// Registers a pipeline and, on a running hub, arms its schedules.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition`, `Cycle` or `Schedule` when the definition is rejected,
    /// `Store` if persisting fails.
    pub async fn create_pipeline(&self, def: PipelineDefinition) -> Result<Pipeline, HubError> {
        let pipeline = {
            let _writes = self.pipeline_writes.lock().await;
            let pipeline = self.registry.register(def).await?;
            if self.is_running() {
                self.scheduler.schedule(&pipeline)?;
            }
            pipeline
        };
        self.events
            .emit(
                events::PIPELINE_REGISTERED,
                Some(json!({
                    "pipeline_id": pipeline.id,
                    "tenant_id": pipeline.tenant_id,
                    "stages": pipeline.execution_order,
                })),
            )
            .await;
        Ok(pipeline)
    }

    /// Returns one pipeline.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ID.
    pub fn get_pipeline(&self, pipeline_id: &str) -> Result<Pipeline, HubError> {
        self.registry.get(pipeline_id)
    }

    /// Returns every pipeline.
    #[must_use]
    pub fn list_pipelines(&self) -> Vec<Pipeline> {
        self.registry.list()
    }

    /// Returns the pipelines of one tenant.
    #[must_use]
    pub fn list_pipelines_for_tenant(&self, tenant_id: &str) -> Vec<Pipeline> {
        self.registry.list_by_tenant(tenant_id)
    }

    /// Enables or disables a pipeline, arming or stopping its schedules.
    ///
    /// Requests already queued for a disabled pipeline are dropped at
    /// admission.
    pub async fn set_pipeline_enabled(
        &self,
        pipeline_id: &str,
        enabled: bool,
    ) -> Result<Pipeline, HubError> {
        let pipeline = {
            let _writes = self.pipeline_writes.lock().await;
            let pipeline = self.registry.set_enabled(pipeline_id, enabled).await?;
            if self.is_running() {
                self.scheduler.schedule(&pipeline)?;
            }
            pipeline
        };
        let event = if enabled {
            events::PIPELINE_ENABLED
        } else {
            events::PIPELINE_DISABLED
        };
        self.events
            .emit(event, Some(json!({ "pipeline_id": pipeline.id })))
            .await;
        Ok(pipeline)
    }

    /// Enables or disables one trigger and re-arms the pipeline's schedules.
    pub async fn set_trigger_enabled(
        &self,
        pipeline_id: &str,
        trigger_index: usize,
        enabled: bool,
    ) -> Result<Pipeline, HubError> {
        let _writes = self.pipeline_writes.lock().await;
        let pipeline = self
            .registry
            .set_trigger_enabled(pipeline_id, trigger_index, enabled)
            .await?;
        if self.is_running() {
            self.scheduler.schedule(&pipeline)?;
        }
        Ok(pipeline)
    }

    /// Removes a pipeline and stops its schedules. Running executions of
    /// the pipeline are left to finish.
    pub async fn delete_pipeline(&self, pipeline_id: &str) -> Result<Pipeline, HubError> {
        let pipeline = {
            let _writes = self.pipeline_writes.lock().await;
            let pipeline = self.registry.delete(pipeline_id).await?;
            self.scheduler.unschedule(pipeline_id);
            pipeline
        };
        self.events
            .emit(events::PIPELINE_DELETED, Some(json!({ "pipeline_id": pipeline_id })))
            .await;
        Ok(pipeline)
    }

    // ---- triggers ----

    /// Queues a manual run and waits until it is admitted.
    ///
    /// Returns the execution as it was at admission, status `Running`.
    ///
    /// # Errors
    ///
    /// `NotRunning` before `start`, `NotFound` for an unknown pipeline,
    /// `PipelineDisabled`, `QueueFull`, or `ShutDown` if the hub stops
    /// before admitting the request.
    pub async fn execute_pipeline(
        &self,
        pipeline_id: &str,
        data: serde_json::Value,
    ) -> Result<Execution, HubError> {
        if !self.is_running() {
            return Err(HubError::NotRunning);
        }
        self.ensure_enabled(pipeline_id)?;

        let (tx, rx) = oneshot::channel();
        let request =
            QueuedRequest::new(pipeline_id, TriggerPayload::manual(data)).with_responder(tx);
        scheduler::enqueue(&self.queue, self.events.as_ref(), request)?;
        rx.await.map_err(|_| HubError::ShutDown)?
    }

    /// Queues a fire-and-forget run, as a webhook or condition trigger
    /// would. Returns the request ID.
    ///
    /// Requests queued before `start` are admitted once the hub runs.
    ///
    /// # Errors
    ///
    /// `NotFound`, `PipelineDisabled`, `QueueFull` or `ShutDown`.
    pub fn fire(
        &self,
        pipeline_id: &str,
        kind: TriggerKind,
        data: serde_json::Value,
    ) -> Result<Uuid, HubError> {
        self.ensure_enabled(pipeline_id)?;
        self.scheduler.fire(pipeline_id, kind, data)
    }

    /// Queues one run for every enabled pipeline listening to `event`.
    ///
    /// Returns the request IDs in pipeline ID order; an event nobody
    /// listens to yields an empty list.
    ///
    /// # Errors
    ///
    /// Stops at the first `QueueFull` or `ShutDown`; requests queued before
    /// it stay queued.
    pub fn fire_event(&self, event: &str, data: serde_json::Value) -> Result<Vec<Uuid>, HubError> {
        let mut subscribers = self.registry.subscribers(event);
        subscribers.sort();
        debug!(event = %event, subscribers = subscribers.len(), "Dispatching domain event");
        subscribers
            .iter()
            .map(|id| self.scheduler.fire(id, TriggerKind::Event, data.clone()))
            .collect()
    }

    fn ensure_enabled(&self, pipeline_id: &str) -> Result<Pipeline, HubError> {
        let pipeline = self.registry.get(pipeline_id)?;
        if !pipeline.enabled {
            return Err(HubError::PipelineDisabled(pipeline.id));
        }
        Ok(pipeline)
    }

    // ---- admission ----

    async fn admission_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let admitted = self.admit_pending();
                    if admitted > 0 {
                        debug!(
                            admitted,
                            queued = self.queue.len(),
                            running = self.tracker.running_count(),
                            "Admission pass"
                        );
                    }
                }
            }
        }
        debug!("Admission loop stopped");
    }

    /// Admits queued requests while concurrency permits are free.
    ///
    /// The admission loop calls this every poll interval. Returns the number
    /// of executions started.
    pub fn admit_pending(self: &Arc<Self>) -> usize {
        let mut admitted = 0;
        while self.is_running() {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let Some(request) = self.queue.pop() else {
                break;
            };
            if self.start_execution(request, permit) {
                admitted += 1;
            }
        }
        admitted
    }

    fn start_execution(self: &Arc<Self>, request: QueuedRequest, permit: OwnedSemaphorePermit) -> bool {
        let pipeline = match self.ensure_enabled(&request.pipeline_id) {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    pipeline_id = %request.pipeline_id,
                    error = %e,
                    "Dropping queued request"
                );
                request.respond(Err(e));
                return false;
            }
        };

        let execution = Execution::new(&pipeline, request.trigger.clone());
        let execution_id = execution.execution_id;
        let token = Arc::new(CancellationToken::new());
        self.tokens.insert(execution_id, Arc::clone(&token));
        self.tracker.insert(execution.clone());

        info!(
            execution_id = %execution_id,
            pipeline_id = %pipeline.id,
            trigger = %execution.trigger.kind,
            queued_ms = (Utc::now() - request.enqueued_at).num_milliseconds(),
            "Execution started"
        );
        self.events.try_emit(
            events::EXECUTION_STARTED,
            Some(json!({
                "execution_id": execution_id,
                "pipeline_id": pipeline.id,
                "tenant_id": pipeline.tenant_id,
                "trigger": execution.trigger.kind,
            })),
        );
        request.respond(Ok(execution));

        let hub = Arc::clone(self);
        let span = execution_span(execution_id, &pipeline.id, &pipeline.tenant_id);
        tokio::spawn(
            async move {
                let _permit = permit;
                if let Some(finished) = hub.runner.run(&pipeline, execution_id, &token).await {
                    hub.metrics.record(&finished);
                }
                hub.tokens.remove(&execution_id);
            }
            .instrument(span),
        );
        true
    }

    // ---- executions ----

    /// Returns a snapshot of one execution.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown or purged ID.
    pub fn get_execution_status(&self, execution_id: Uuid) -> Result<Execution, HubError> {
        self.tracker
            .get(execution_id)
            .ok_or_else(|| NotFoundError::execution(execution_id).into())
    }

    /// Returns the executions of a pipeline, oldest first.
    #[must_use]
    pub fn list_executions(&self, pipeline_id: &str) -> Vec<Execution> {
        self.tracker.list_for_pipeline(pipeline_id)
    }

    /// Cancels a running execution.
    ///
    /// Cancelling an execution that already finished is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ID.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<(), HubError> {
        match self.tracker.cancel(execution_id, "Cancelled by request")? {
            CancelOutcome::Cancelled(execution) => {
                let token = self.tokens.get(&execution_id).map(|t| Arc::clone(&t));
                if let Some(token) = token {
                    token.cancel("cancelled by request");
                }
                self.metrics.record(&execution);
                info!(
                    execution_id = %execution_id,
                    pipeline_id = %execution.pipeline_id,
                    "Execution cancelled"
                );
                self.events
                    .emit(
                        events::EXECUTION_CANCELLED,
                        Some(json!({
                            "execution_id": execution_id,
                            "pipeline_id": execution.pipeline_id,
                            "tenant_id": execution.tenant_id,
                        })),
                    )
                    .await;
            }
            CancelOutcome::AlreadyTerminal(status) => {
                debug!(execution_id = %execution_id, status = %status, "Cancel ignored");
            }
        }
        Ok(())
    }

    /// Drops finished executions that ended before `cutoff`. Tenant totals
    /// are kept.
    pub fn purge_executions(&self, cutoff: DateTime<Utc>) -> usize {
        let purged = self.tracker.purge_before(cutoff);
        if purged > 0 {
            info!(purged, "Purged finished executions");
        }
        purged
    }

    // ---- metrics ----

    /// Aggregates the executions of `tenant_id` started within `range`.
    #[must_use]
    pub fn get_metrics(&self, tenant_id: &str, range: &TimeRange) -> AggregateMetrics {
        AggregateMetrics::compute(&self.tracker.snapshot(), tenant_id, range)
    }

    /// Lifetime totals of `tenant_id`.
    #[must_use]
    pub fn tenant_totals(&self, tenant_id: &str) -> TenantTotals {
        self.metrics.totals(tenant_id)
    }

    /// Number of executions currently running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.tracker.running_count()
    }

    /// Number of requests waiting for admission.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for AutomationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationHub")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("pipelines", &self.registry.len())
            .field("queued", &self.queue.len())
            .field("executions", &self.tracker.len())
            .finish_non_exhaustive()
    }
}
