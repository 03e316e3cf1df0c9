//! Registry of pipeline definitions, cached in memory and backed by a store.

use super::{dag, Pipeline, PipelineDefinition};
use crate::errors::{codes, ErrorInfo, HubError, InvalidDefinitionError, NotFoundError};
use crate::store::{validate_key, PipelineStore, PIPELINES};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Holds every registered pipeline keyed by ID.
///
/// Mutations are serialized: each one reads, persists and caches under
/// `mutations`, so a toggle can never write back a pipeline that was
/// deleted while it was persisting.
pub struct PipelineRegistry {
    store: Arc<dyn PipelineStore>,
    pipelines: DashMap<String, Pipeline>,
    mutations: Mutex<()>,
}

impl PipelineRegistry {
    /// Creates an empty registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self {
            store,
            pipelines: DashMap::new(),
            mutations: Mutex::new(()),
        }
    }

    /// Validates, resolves and persists a definition.
    ///
    /// Nothing is cached or persisted when validation fails.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` for structural problems, `Schedule` for a
    /// malformed schedule, `Cycle` for dependency cycles, `Store` if
    /// persisting fails.
    pub async fn register(&self, def: PipelineDefinition) -> Result<Pipeline, HubError> {
        def.validate()?;
        let order = dag::sort(&def.stages)?;

        let id = def.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        validate_key(&id).map_err(|e| {
            InvalidDefinitionError::new(format!("Pipeline ID '{id}' is not usable: {e}"))
                .with_error_info(ErrorInfo::new(codes::MISSING_FIELD, "Invalid pipeline ID"))
        })?;

        let pipeline = Pipeline::from_definition(id.clone(), def, order);

        let _guard = self.mutations.lock().await;
        match self.pipelines.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(InvalidDefinitionError::new(format!(
                    "Pipeline '{id}' already exists"
                ))
                .with_error_info(ErrorInfo::new(
                    codes::DUPLICATE_PIPELINE,
                    "Pipeline IDs must be unique",
                ))
                .into());
            }
            Entry::Vacant(slot) => {
                slot.insert(pipeline.clone());
            }
        }

        if let Err(e) = self.persist(&pipeline).await {
            self.pipelines.remove(&id);
            return Err(e);
        }

        info!(
            pipeline_id = %pipeline.id,
            stages = pipeline.stages.len(),
            fingerprint = %pipeline.fingerprint,
            "Pipeline registered"
        );
        Ok(pipeline)
    }

    /// Returns a pipeline by ID.
    pub fn get(&self, id: &str) -> Result<Pipeline, HubError> {
        self.pipelines
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| NotFoundError::pipeline(id).into())
    }

    /// Returns all pipelines ordered by creation time.
    #[must_use]
    pub fn list(&self) -> Vec<Pipeline> {
        let mut all: Vec<Pipeline> = self.pipelines.iter().map(|p| p.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Returns the pipelines of one tenant.
    #[must_use]
    pub fn list_by_tenant(&self, tenant_id: &str) -> Vec<Pipeline> {
        self.list()
            .into_iter()
            .filter(|p| p.tenant_id == tenant_id)
            .collect()
    }

    /// Returns the IDs of enabled pipelines with an enabled trigger for `event`.
    #[must_use]
    pub fn subscribers(&self, event: &str) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|p| p.enabled && p.listens_for(event))
            .map(|p| p.id)
            .collect()
    }

    /// Toggles the `enabled` flag.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Pipeline, HubError> {
        self.update(id, |p| {
            p.enabled = enabled;
            Ok(())
        })
        .await
    }

    /// Toggles the `enabled` flag of one trigger.
    pub async fn set_trigger_enabled(
        &self,
        id: &str,
        trigger_index: usize,
        enabled: bool,
    ) -> Result<Pipeline, HubError> {
        self.update(id, |p| {
            let Some(trigger) = p.triggers.get_mut(trigger_index) else {
                return Err(InvalidDefinitionError::new(format!(
                    "Pipeline '{id}' has no trigger at index {trigger_index}"
                ))
                .with_error_info(ErrorInfo::new(codes::BAD_TRIGGER, "Unknown trigger index"))
                .into());
            };
            if enabled {
                // A trigger that was stored disabled has never been validated.
                let mut candidate = trigger.clone();
                candidate.enabled = true;
                candidate.validate()?;
            }
            trigger.enabled = enabled;
            p.refresh_fingerprint();
            Ok(())
        })
        .await
    }

    /// Removes a pipeline from the registry and the store.
    pub async fn delete(&self, id: &str) -> Result<Pipeline, HubError> {
        let _guard = self.mutations.lock().await;
        let existing = self.get(id)?;
        self.store.delete(PIPELINES, id).await?;
        self.pipelines.remove(id);
        info!(pipeline_id = %id, "Pipeline deleted");
        Ok(existing)
    }

    /// Loads every stored pipeline into the cache.
    ///
    /// Stored entries that no longer validate are logged and skipped.
    /// Returns the number of pipelines loaded.
    pub async fn load_all(&self) -> Result<usize, HubError> {
        let _guard = self.mutations.lock().await;
        let entries = self.store.get_all(PIPELINES).await?;
        let mut loaded = 0;
        for (key, value) in entries {
            let mut pipeline: Pipeline = match serde_json::from_value(value) {
                Ok(p) => p,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable stored pipeline");
                    continue;
                }
            };
            if let Err(e) = pipeline.validate() {
                warn!(pipeline_id = %pipeline.id, error = %e, "Skipping invalid stored pipeline");
                continue;
            }
            match dag::sort(&pipeline.stages) {
                Ok(order) => pipeline.execution_order = order,
                Err(e) => {
                    warn!(pipeline_id = %pipeline.id, error = %e, "Skipping stored pipeline");
                    continue;
                }
            }
            debug!(pipeline_id = %pipeline.id, "Pipeline loaded from store");
            self.pipelines.insert(pipeline.id.clone(), pipeline);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Returns the number of registered pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns true if no pipelines are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Applies `mutate` to the current cached pipeline, then persists it.
    ///
    /// The pipeline is re-read under the mutation lock, so a concurrent
    /// delete wins with `NotFound`.
    async fn update<F>(&self, id: &str, mutate: F) -> Result<Pipeline, HubError>
    where
        F: FnOnce(&mut Pipeline) -> Result<(), HubError>,
    {
        let _guard = self.mutations.lock().await;
        let mut pipeline = self.get(id)?;
        mutate(&mut pipeline)?;
        pipeline.updated_at = Utc::now();
        self.persist(&pipeline).await?;
        self.pipelines.insert(pipeline.id.clone(), pipeline.clone());
        Ok(pipeline)
    }

    async fn persist(&self, pipeline: &Pipeline) -> Result<(), HubError> {
        let value = serde_json::to_value(pipeline)?;
        self.store.put(PIPELINES, &pipeline.id, value).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}
