//! Stage dispatch.
//!
//! The hub never does stage work itself. Each [`StageKind`] maps to a
//! [`StageHandler`] in a [`DispatchTable`]; the executor hands the handler
//! the stage configuration and a [`StageContext`], and treats any error as
//! an attempt failure.

#[cfg(feature = "http")]
mod http;
mod script;

#[cfg(feature = "http")]
pub use http::HttpHandler;
pub use script::ScriptHandler;

use crate::core::StageKind;
use crate::errors::StageError;
use crate::execution::TriggerPayload;
use crate::pipeline::{Configuration, StageDefinition};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a handler knows about the stage it is running.
#[derive(Debug, Clone, PartialEq)]
pub struct StageContext {
    /// The running execution.
    pub execution_id: Uuid,
    /// The pipeline being run.
    pub pipeline_id: String,
    /// Tenant of the pipeline.
    pub tenant_id: String,
    /// The stage being run.
    pub stage_id: String,
    /// Zero for the first attempt, then the retry number.
    pub attempt: u32,
    /// What started the execution.
    pub trigger: TriggerPayload,
    /// Outputs of the stage's declared dependencies, keyed by stage ID.
    pub inputs: BTreeMap<String, serde_json::Value>,
}

impl StageContext {
    /// Returns the output of dependency `stage_id`.
    #[must_use]
    pub fn input(&self, stage_id: &str) -> Option<&serde_json::Value> {
        self.inputs.get(stage_id)
    }

    /// Builds the JSON document handed to out-of-process handlers.
    #[must_use]
    pub fn to_document(&self, configuration: &Configuration) -> serde_json::Value {
        serde_json::json!({
            "execution_id": self.execution_id,
            "pipeline_id": self.pipeline_id,
            "tenant_id": self.tenant_id,
            "stage_id": self.stage_id,
            "attempt": self.attempt,
            "configuration": configuration,
            "inputs": self.inputs,
            "trigger": self.trigger.data,
        })
    }
}

/// Performs the work of one stage kind.
#[async_trait]
pub trait StageHandler: Send + Sync + Debug {
    /// Runs one attempt of a stage and returns its output.
    async fn handle(
        &self,
        kind: StageKind,
        configuration: &Configuration,
        ctx: &StageContext,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Maps stage kinds to handlers.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<StageKind, Arc<dyn StageHandler>>,
}

impl DispatchTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table routing every kind to `handler`.
    #[must_use]
    pub fn uniform(handler: Arc<dyn StageHandler>) -> Self {
        let mut table = Self::new();
        for kind in StageKind::ALL {
            table.register(kind, Arc::clone(&handler));
        }
        table
    }

    /// Routes `kind` to `handler`.
    #[must_use]
    pub fn with_handler(mut self, kind: StageKind, handler: Arc<dyn StageHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    /// Routes `kind` to `handler`, replacing any previous handler.
    pub fn register(&mut self, kind: StageKind, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Returns the handler for `kind`.
    #[must_use]
    pub fn get(&self, kind: StageKind) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Runs one attempt of `stage`.
    ///
    /// # Errors
    ///
    /// `NoHandler` if the kind is unrouted, `Execution` if the handler fails.
    pub async fn dispatch(
        &self,
        stage: &StageDefinition,
        ctx: &StageContext,
    ) -> Result<serde_json::Value, StageError> {
        let handler = self.get(stage.kind).ok_or_else(|| StageError::NoHandler {
            stage: stage.id.clone(),
            kind: stage.kind,
        })?;
        handler
            .handle(stage.kind, &stage.configuration, ctx)
            .await
            .map_err(|e| StageError::execution(&stage.id, format!("{e:#}")))
    }
}

impl Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<String> = self.handlers.keys().map(ToString::to_string).collect();
        kinds.sort();
        f.debug_struct("DispatchTable").field("kinds", &kinds).finish()
    }
}

/// A handler backed by a synchronous closure.
pub struct FnHandler<F>
where
    F: Fn(StageKind, &Configuration, &StageContext) -> anyhow::Result<serde_json::Value>
        + Send
        + Sync,
{
    name: String,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(StageKind, &Configuration, &StageContext) -> anyhow::Result<serde_json::Value>
        + Send
        + Sync,
{
    /// Creates a new closure handler.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnHandler<F>
where
    F: Fn(StageKind, &Configuration, &StageContext) -> anyhow::Result<serde_json::Value>
        + Send
        + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> StageHandler for FnHandler<F>
where
    F: Fn(StageKind, &Configuration, &StageContext) -> anyhow::Result<serde_json::Value>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        kind: StageKind,
        configuration: &Configuration,
        ctx: &StageContext,
    ) -> anyhow::Result<serde_json::Value> {
        (self.func)(kind, configuration, ctx)
    }
}

#[cfg(test)]
pub(crate) fn test_context(stage_id: &str) -> StageContext {
    StageContext {
        execution_id: Uuid::nil(),
        pipeline_id: "p".to_string(),
        tenant_id: "default".to_string(),
        stage_id: stage_id.to_string(),
        attempt: 0,
        trigger: TriggerPayload::manual(serde_json::json!({"source": "test"})),
        inputs: BTreeMap::new(),
    }
}
