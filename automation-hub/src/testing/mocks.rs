//! Mock stage handler and a slow store.

use crate::core::StageKind;
use crate::dispatch::{StageContext, StageHandler};
use crate::pipeline::Configuration;
use crate::store::{MemoryStore, PipelineStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A handler whose behaviour is scripted per stage ID.
///
/// By default every call succeeds with
/// `{"stage": <id>, "attempt": <n>, "inputs": {...}}`, or with the stage's
/// `output` configuration entry when present.
#[derive(Debug, Default)]
pub struct MockHandler {
    failures: Mutex<HashMap<String, Option<u32>>>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    calls: Mutex<Vec<String>>,
    inputs: Mutex<HashMap<String, BTreeMap<String, serde_json::Value>>>,
    triggers: Mutex<Vec<serde_json::Value>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockHandler {
    /// Creates a handler that always succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `times` calls for `stage`.
    #[must_use]
    pub fn fail_times(self, stage: &str, times: u32) -> Self {
        self.failures.lock().insert(stage.to_string(), Some(times));
        self
    }

    /// Fails every call for `stage`.
    #[must_use]
    pub fn fail_always(self, stage: &str) -> Self {
        self.failures.lock().insert(stage.to_string(), None);
        self
    }

    /// Sleeps for `delay` in every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Sleeps for `delay` in calls for `stage`.
    #[must_use]
    pub fn with_stage_delay(mut self, stage: &str, delay: Duration) -> Self {
        self.delays.insert(stage.to_string(), delay);
        self
    }

    /// Stage IDs of every call, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls for `stage`.
    #[must_use]
    pub fn call_count(&self, stage: &str) -> usize {
        self.calls.lock().iter().filter(|s| *s == stage).count()
    }

    /// Dependency inputs seen by the last call for `stage`.
    #[must_use]
    pub fn inputs_seen(&self, stage: &str) -> Option<BTreeMap<String, serde_json::Value>> {
        self.inputs.lock().get(stage).cloned()
    }

    /// Trigger data of every call.
    #[must_use]
    pub fn triggers_seen(&self) -> Vec<serde_json::Value> {
        self.triggers.lock().clone()
    }

    /// Highest number of calls that were in flight at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, stage: &str) -> bool {
        let mut failures = self.failures.lock();
        match failures.get_mut(stage) {
            Some(None) => true,
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl StageHandler for MockHandler {
    async fn handle(
        &self,
        kind: StageKind,
        configuration: &Configuration,
        ctx: &StageContext,
    ) -> anyhow::Result<serde_json::Value> {
        self.calls.lock().push(ctx.stage_id.clone());
        self.inputs
            .lock()
            .insert(ctx.stage_id.clone(), ctx.inputs.clone());
        self.triggers.lock().push(ctx.trigger.data.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&ctx.stage_id)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.should_fail(&ctx.stage_id) {
            anyhow::bail!("scripted failure in '{}' ({kind})", ctx.stage_id);
        }

        Ok(configuration.get("output").cloned().unwrap_or_else(|| {
            serde_json::json!({
                "stage": ctx.stage_id,
                "attempt": ctx.attempt,
                "inputs": ctx.inputs,
            })
        }))
    }
}

/// An in-memory store whose writes sleep before landing.
///
/// Widens the window between reading and persisting a pipeline.
#[derive(Debug, Default)]
pub struct SlowStore {
    inner: MemoryStore,
    put_delay: Duration,
}

impl SlowStore {
    /// Creates a store that delays every `put` by `put_delay`.
    #[must_use]
    pub fn new(put_delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            put_delay,
        }
    }
}

#[async_trait]
impl PipelineStore for SlowStore {
    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
        tokio::time::sleep(self.put_delay).await;
        self.inner.put(collection, key, value).await
    }

    async fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        self.inner.get(collection, key).await
    }

    async fn get_all(&self, collection: &str) -> anyhow::Result<Vec<(String, serde_json::Value)>> {
        self.inner.get_all(collection).await
    }

    async fn delete(&self, collection: &str, key: &str) -> anyhow::Result<()> {
        self.inner.delete(collection, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_context;

    #[tokio::test]
    async fn test_fail_times_then_succeed() {
        let handler = MockHandler::new().fail_times("a", 2);
        let ctx = test_context("a");
        let config = Configuration::new();

        assert!(handler.handle(StageKind::Integration, &config, &ctx).await.is_err());
        assert!(handler.handle(StageKind::Integration, &config, &ctx).await.is_err());
        let out = handler
            .handle(StageKind::Integration, &config, &ctx)
            .await
            .unwrap();
        assert_eq!(out["stage"], "a");
        assert_eq!(handler.call_count("a"), 3);
    }

    #[tokio::test]
    async fn test_configured_output() {
        let handler = MockHandler::new();
        let mut config = Configuration::new();
        config.insert("output".into(), serde_json::json!({"score": 9}));
        let out = handler
            .handle(StageKind::AiAnalysis, &config, &test_context("s"))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"score": 9}));
    }
}
