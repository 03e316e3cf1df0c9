//! End-to-end tests running a started hub with mock handlers.

#[cfg(test)]
mod tests {
    use crate::config::HubConfig;
    use crate::core::{ExecutionStatus, StageKind, StageStatus, TriggerKind};
    use crate::dispatch::{DispatchTable, FnHandler};
    use crate::errors::HubError;
    use crate::events::CollectingEventSink;
    use crate::execution::Execution;
    use crate::hub::AutomationHub;
    use crate::metrics::TimeRange;
    use crate::pipeline::{BackoffStrategy, RetryPolicy, StageDefinition, Trigger};
    use crate::store::JsonFileStore;
    use crate::testing::{definition, fan_out, stage, MockHandler};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    struct Harness {
        hub: Arc<AutomationHub>,
        handler: Arc<MockHandler>,
        sink: Arc<CollectingEventSink>,
    }

    async fn started(config: HubConfig, handler: MockHandler) -> Harness {
        let handler = Arc::new(handler);
        let sink = Arc::new(CollectingEventSink::new());
        let hub = AutomationHub::builder()
            .config(config.with_poll_interval_ms(10))
            .dispatch(DispatchTable::uniform(handler.clone()))
            .event_sink(sink.clone())
            .build()
            .unwrap();
        hub.start().await.unwrap();
        Harness { hub, handler, sink }
    }

    async fn wait_terminal(hub: &AutomationHub, execution_id: Uuid) -> Execution {
        for _ in 0..300 {
            let execution = hub.get_execution_status(execution_id).unwrap();
            if execution.is_terminal() {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {execution_id} did not finish");
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_and_passes_outputs() {
        let h = started(HubConfig::new(), MockHandler::new()).await;
        let def = definition(
            "chain",
            vec![
                stage("c", &["b"]),
                stage("a", &[]).with_config("output", json!({"leads": 3})),
                stage("b", &["a"]),
            ],
        )
        .with_tenant("acme");
        h.hub.create_pipeline(def).await.unwrap();

        let admitted = h.hub.execute_pipeline("chain", json!({"source": "crm"})).await.unwrap();
        assert_eq!(admitted.status, ExecutionStatus::Running);

        let done = wait_terminal(&h.hub, admitted.execution_id).await;
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.stage_order(), vec!["a", "b", "c"]);
        assert!(done.stage_results.iter().all(|r| r.status == StageStatus::Completed));
        assert_eq!(done.metrics.stages_executed, 3);
        assert!(done.duration_ms.is_some());

        assert_eq!(h.handler.calls(), vec!["a", "b", "c"]);
        let b_inputs = h.handler.inputs_seen("b").unwrap();
        assert_eq!(b_inputs.get("a"), Some(&json!({"leads": 3})));
        assert_eq!(b_inputs.len(), 1);
        assert_eq!(h.handler.triggers_seen()[0], json!({"source": "crm"}));

        wait_until(|| h.hub.tenant_totals("acme").completed == 1).await;
        let types = h.sink.types();
        assert!(types.contains(&"execution.started".to_string()));
        assert_eq!(types.last().map(String::as_str), Some("execution.completed"));

        let metrics = h.hub.get_metrics("acme", &TimeRange::last(chrono::Duration::hours(1)));
        assert_eq!(metrics.total_executions, 1);
        assert_eq!(metrics.completed, 1);
        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let h = started(
            HubConfig::new().with_max_concurrency(2),
            MockHandler::new().with_delay(Duration::from_millis(60)),
        )
        .await;
        h.hub.create_pipeline(definition("slow", vec![stage("a", &[])])).await.unwrap();

        for n in 0..4 {
            assert_ok!(h.hub.fire("slow", TriggerKind::Webhook, json!({ "n": n })));
        }
        let hub = h.hub.clone();
        wait_until(|| {
            let runs = hub.list_executions("slow");
            runs.len() == 4 && runs.iter().all(Execution::is_terminal)
        })
        .await;

        assert_eq!(h.handler.call_count("a"), 4);
        assert!(h.handler.max_in_flight() <= 2);
        assert!(h.hub.running_count() == 0);
        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_and_halts() {
        let h = started(HubConfig::new(), MockHandler::new().fail_always("b")).await;
        let def = definition(
            "halt",
            vec![
                stage("a", &[]),
                stage("b", &["a"]),
                stage("c", &["b"]),
                stage("d", &["a"]),
            ],
        );
        h.hub.create_pipeline(def).await.unwrap();

        let id = h.hub.execute_pipeline("halt", json!({})).await.unwrap().execution_id;
        let done = wait_terminal(&h.hub, id).await;

        let status = |s: &str| done.stage_result(s).unwrap().status;
        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(status("a"), StageStatus::Completed);
        assert_eq!(status("b"), StageStatus::Failed);
        assert_eq!(status("c"), StageStatus::Skipped);
        assert_eq!(status("d"), StageStatus::Pending);
        assert!(done.error.as_deref().unwrap().contains("scripted failure"));
        assert_eq!(done.metrics.stages_skipped, 1);
        assert_eq!(h.handler.call_count("d"), 0);
        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let h = started(HubConfig::new(), MockHandler::new().fail_times("a", 2)).await;
        let policy = RetryPolicy::default()
            .with_max_retries(3)
            .with_backoff(BackoffStrategy::Exponential)
            .with_multiplier(5);
        h.hub
            .create_pipeline(definition("flaky", vec![stage("a", &[]).with_retry_policy(policy)]))
            .await
            .unwrap();

        let id = h.hub.execute_pipeline("flaky", json!({})).await.unwrap().execution_id;
        let done = wait_terminal(&h.hub, id).await;

        assert_eq!(done.status, ExecutionStatus::Completed);
        let a = done.stage_result("a").unwrap();
        assert_eq!(a.retry_count, 2);
        assert_eq!(a.error, None);
        assert_eq!(h.handler.call_count("a"), 3);
        assert_eq!(h.sink.events_of_type("stage.retrying").len(), 2);
        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_is_retried_then_fails() {
        let h = started(
            HubConfig::new(),
            MockHandler::new().with_stage_delay("slow", Duration::from_millis(500)),
        )
        .await;
        let slow = stage("slow", &[])
            .with_timeout_ms(30)
            .with_retry_policy(RetryPolicy::default().with_max_retries(1).with_multiplier(5));
        h.hub
            .create_pipeline(definition("timeouts", vec![slow, stage("after", &["slow"])]))
            .await
            .unwrap();

        let id = h.hub.execute_pipeline("timeouts", json!({})).await.unwrap().execution_id;
        let done = wait_terminal(&h.hub, id).await;

        let slow = done.stage_result("slow").unwrap();
        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(slow.status, StageStatus::Failed);
        assert_eq!(slow.retry_count, 1);
        assert!(slow.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(done.stage_result("after").unwrap().status, StageStatus::Skipped);
        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_final() {
        let h = started(
            HubConfig::new(),
            MockHandler::new().with_stage_delay("a", Duration::from_millis(200)),
        )
        .await;
        h.hub.create_pipeline(fan_out("cancel-me")).await.unwrap();

        let id = h.hub.execute_pipeline("cancel-me", json!({})).await.unwrap().execution_id;
        wait_until(|| h.handler.call_count("a") == 1).await;

        assert_ok!(h.hub.cancel_execution(id).await);
        assert_ok!(h.hub.cancel_execution(id).await);
        let cancelled = h.hub.get_execution_status(id).unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        let end_time = cancelled.end_time;
        let interrupted = cancelled.stage_result("a").unwrap();
        assert_eq!(interrupted.status, StageStatus::Failed);
        assert!(interrupted.end_time.is_some());
        assert_eq!(interrupted.error.as_deref(), Some("Cancelled by request"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let later = h.hub.get_execution_status(id).unwrap();
        assert_eq!(later.status, ExecutionStatus::Cancelled);
        assert_eq!(later.end_time, end_time);
        assert_eq!(later.stage_result("a"), cancelled.stage_result("a"));
        assert_eq!(h.handler.call_count("b"), 0);
        assert_eq!(h.sink.events_of_type("execution.cancelled").len(), 1);
        assert_eq!(h.hub.tenant_totals("default").cancelled, 1);

        let missing = h.hub.cancel_execution(Uuid::new_v4()).await;
        assert!(matches!(assert_err!(missing), HubError::NotFound(_)));
        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_schedule_trigger_starts_executions() {
        let h = started(HubConfig::new(), MockHandler::new()).await;
        let def = definition("ticker", vec![stage("a", &[])]).with_trigger(Trigger::schedule("50ms"));
        h.hub.create_pipeline(def).await.unwrap();

        let hub = h.hub.clone();
        wait_until(|| hub.list_executions("ticker").len() >= 2).await;

        let first = &h.hub.list_executions("ticker")[0];
        assert_eq!(first.trigger.kind, TriggerKind::Schedule);
        assert_eq!(first.trigger.data["trigger"], "schedule");

        h.hub.set_pipeline_enabled("ticker", false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = h.hub.list_executions("ticker").len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.hub.list_executions("ticker").len(), seen);
        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_event_reaches_every_subscriber() {
        let h = started(HubConfig::new(), MockHandler::new()).await;
        for id in ["on-signup-a", "on-signup-b"] {
            let def = definition(id, vec![stage("a", &[])]).with_trigger(Trigger::event("user.signup"));
            h.hub.create_pipeline(def).await.unwrap();
        }
        let def = definition("muted", vec![stage("a", &[])])
            .with_trigger(Trigger::event("user.signup").disabled());
        h.hub.create_pipeline(def).await.unwrap();

        let requests = h.hub.fire_event("user.signup", json!({"user": 42})).unwrap();
        assert_eq!(requests.len(), 2);
        assert!(h.hub.fire_event("user.deleted", json!({})).unwrap().is_empty());

        let hub = h.hub.clone();
        wait_until(|| {
            ["on-signup-a", "on-signup-b"]
                .iter()
                .all(|id| hub.list_executions(id).iter().any(Execution::is_terminal))
        })
        .await;
        let run = &h.hub.list_executions("on-signup-a")[0];
        assert_eq!(run.trigger.kind, TriggerKind::Event);
        assert_eq!(run.trigger.data, json!({"user": 42}));
        assert!(h.hub.list_executions("muted").is_empty());
        h.hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full_is_retriable() {
        let handler = Arc::new(MockHandler::new());
        let hub = AutomationHub::builder()
            .config(HubConfig::new().with_queue_capacity(1))
            .dispatch(DispatchTable::uniform(handler))
            .build()
            .unwrap();
        hub.create_pipeline(definition("p", vec![stage("a", &[])])).await.unwrap();

        assert_ok!(hub.fire("p", TriggerKind::Condition, json!({})));
        let err = hub.fire("p", TriggerKind::Condition, json!({})).unwrap_err();
        assert!(matches!(err, HubError::QueueFull(_)));
        assert!(err.is_retriable());
        assert_eq!(hub.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_fails_queued_and_lets_running_finish() {
        let h = started(
            HubConfig::new().with_max_concurrency(1),
            MockHandler::new().with_delay(Duration::from_millis(150)),
        )
        .await;
        h.hub.create_pipeline(definition("p", vec![stage("a", &[])])).await.unwrap();

        let running = h.hub.execute_pipeline("p", json!({})).await.unwrap().execution_id;
        let hub = h.hub.clone();
        let waiter = tokio::spawn(async move { hub.execute_pipeline("p", json!({})).await });
        wait_until(|| h.hub.queue_len() == 1).await;

        h.hub.shutdown().await;
        assert!(matches!(waiter.await.unwrap(), Err(HubError::ShutDown)));
        assert!(matches!(
            h.hub.execute_pipeline("p", json!({})).await,
            Err(HubError::NotRunning)
        ));
        assert!(matches!(
            h.hub.fire("p", TriggerKind::Manual, json!({})),
            Err(HubError::ShutDown)
        ));

        let done = wait_terminal(&h.hub, running).await;
        assert_eq!(done.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_restart_reloads_pipelines_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let handler: Arc<MockHandler> = Arc::new(MockHandler::new());

        let store = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
        let first = AutomationHub::builder()
            .store(store)
            .dispatch(DispatchTable::uniform(handler.clone()))
            .build()
            .unwrap();
        first.start().await.unwrap();
        first.create_pipeline(fan_out("persisted").with_tenant("acme")).await.unwrap();
        first.shutdown().await;

        let store = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
        let second = AutomationHub::builder()
            .config(HubConfig::new().with_poll_interval_ms(10))
            .store(store)
            .dispatch(DispatchTable::uniform(handler.clone()))
            .build()
            .unwrap();
        second.start().await.unwrap();

        let reloaded = second.get_pipeline("persisted").unwrap();
        assert_eq!(reloaded.execution_order, vec!["a", "b", "c"]);
        assert_eq!(second.list_pipelines_for_tenant("acme").len(), 1);

        let id = second.execute_pipeline("persisted", json!({})).await.unwrap().execution_id;
        assert_eq!(wait_terminal(&second, id).await.status, ExecutionStatus::Completed);
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_handler_fails_stage() {
        let hub = AutomationHub::builder()
            .config(HubConfig::new().with_poll_interval_ms(10))
            .handler(
                StageKind::BusinessLogic,
                Arc::new(FnHandler::new("echo", |_, _, ctx| Ok(json!({"stage": ctx.stage_id})))),
            )
            .build()
            .unwrap();
        hub.start().await.unwrap();
        let def = definition(
            "mixed",
            vec![
                stage("rules", &[]),
                StageDefinition::new("notify", StageKind::Notification)
                    .with_dependency("rules"),
            ],
        );
        hub.create_pipeline(def).await.unwrap();

        let id = hub.execute_pipeline("mixed", json!({})).await.unwrap().execution_id;
        let done = wait_terminal(&hub, id).await;

        assert_eq!(done.stage_result("rules").unwrap().status, StageStatus::Completed);
        let notify = done.stage_result("notify").unwrap();
        assert_eq!(notify.status, StageStatus::Failed);
        assert_eq!(notify.retry_count, 0);
        assert!(notify.error.as_deref().unwrap().contains("notification"));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_purge_keeps_running_and_totals() {
        let h = started(HubConfig::new(), MockHandler::new()).await;
        h.hub.create_pipeline(definition("p", vec![stage("a", &[])])).await.unwrap();
        let id = h.hub.execute_pipeline("p", json!({})).await.unwrap().execution_id;
        wait_terminal(&h.hub, id).await;
        wait_until(|| h.hub.tenant_totals("default").executions == 1).await;

        assert_eq!(h.hub.purge_executions(chrono::Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(h.hub.purge_executions(chrono::Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(matches!(h.hub.get_execution_status(id), Err(HubError::NotFound(_))));
        assert_eq!(h.hub.tenant_totals("default").executions, 1);
        h.hub.shutdown().await;
    }
}
