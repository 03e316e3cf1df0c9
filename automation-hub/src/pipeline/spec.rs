//! Pipeline, stage and trigger definitions.

use super::RetryPolicy;
use crate::core::{StageKind, TriggerKind};
use crate::errors::{codes, ErrorInfo, HubError, InvalidDefinitionError, ScheduleError};
use crate::scheduler::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Opaque key/value configuration handed to stage handlers and triggers.
pub type Configuration = serde_json::Map<String, serde_json::Value>;

/// Definition of a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique ID within the pipeline.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// The kind of work, selects the handler.
    pub kind: StageKind,
    /// Handler configuration.
    #[serde(default)]
    pub configuration: Configuration,
    /// IDs of stages that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Per-attempt timeout; the hub default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retry behaviour on failure or timeout.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl StageDefinition {
    /// Creates a stage with no dependencies and no retries.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: StageKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            configuration: Configuration::new(),
            dependencies: Vec::new(),
            timeout_ms: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a configuration entry.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout_ms = Some(timeout);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// A condition that creates executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// The trigger kind.
    pub kind: TriggerKind,
    /// Kind-specific configuration (`schedule`, `interval_ms`, `event`).
    #[serde(default)]
    pub configuration: Configuration,
    /// Disabled triggers never fire.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl Trigger {
    /// Creates an enabled trigger with empty configuration.
    #[must_use]
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            kind,
            configuration: Configuration::new(),
            enabled: true,
        }
    }

    /// Creates a schedule trigger from an expression such as `30s` or `0 */5 * * * *`.
    #[must_use]
    pub fn schedule(expression: impl Into<String>) -> Self {
        Self::new(TriggerKind::Schedule).with_config("schedule", serde_json::json!(expression.into()))
    }

    /// Creates an event trigger listening for `event`.
    #[must_use]
    pub fn event(event: impl Into<String>) -> Self {
        Self::new(TriggerKind::Event).with_config("event", serde_json::json!(event.into()))
    }

    /// Creates a manual trigger.
    #[must_use]
    pub fn manual() -> Self {
        Self::new(TriggerKind::Manual)
    }

    /// Adds a configuration entry.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    /// Marks the trigger as disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Parses the schedule of a schedule trigger.
    ///
    /// Returns `Ok(None)` for other trigger kinds.
    ///
    /// # Errors
    ///
    /// `Schedule` when the expression or interval is malformed,
    /// `InvalidDefinition` when neither is configured.
    pub fn parse_schedule(&self) -> Result<Option<Schedule>, HubError> {
        if self.kind != TriggerKind::Schedule {
            return Ok(None);
        }
        let parsed = match (
            self.configuration.get("schedule"),
            self.configuration.get("interval_ms"),
        ) {
            (Some(serde_json::Value::String(expr)), _) => Schedule::parse(expr),
            (_, Some(value)) => match value.as_u64() {
                Some(ms) => Schedule::from_interval_ms(ms),
                None => Err(ScheduleError::new(
                    value.to_string(),
                    "interval_ms must be a positive integer",
                )),
            },
            _ => {
                return Err(bad_trigger(
                    "Schedule trigger needs a 'schedule' string or an 'interval_ms' integer",
                )
                .into())
            }
        };
        Ok(Some(parsed?))
    }

    /// Checks the configuration this trigger needs to fire.
    ///
    /// # Errors
    ///
    /// See [`Trigger::parse_schedule`]; an event trigger without an
    /// `event` name is an `InvalidDefinition`.
    pub fn validate(&self) -> Result<(), HubError> {
        self.parse_schedule()?;
        if self.kind == TriggerKind::Event && self.event_name().is_none() {
            return Err(bad_trigger("Event trigger needs an 'event' name").into());
        }
        Ok(())
    }

    /// Returns the event name of an event trigger.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        if self.kind != TriggerKind::Event {
            return None;
        }
        self.configuration.get("event").and_then(serde_json::Value::as_str)
    }
}

fn bad_trigger(message: impl Into<String>) -> InvalidDefinitionError {
    let message = message.into();
    InvalidDefinitionError::new(message.clone())
        .with_error_info(ErrorInfo::new(codes::BAD_TRIGGER, message))
}

/// The caller-supplied shape of a pipeline, before registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Requested ID; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Pipeline name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Stages in declaration order.
    pub stages: Vec<StageDefinition>,
    /// Triggers.
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Whether schedule triggers are armed.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Informational priority.
    #[serde(default)]
    pub priority: i32,
    /// Owning tenant.
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

fn default_tenant() -> String {
    "default".to_string()
}

impl PipelineDefinition {
    /// Creates an enabled definition with no stages.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            stages: Vec::new(),
            triggers: Vec::new(),
            enabled: true,
            priority: 0,
            tenant_id: default_tenant(),
        }
    }

    /// Sets an explicit ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Sets the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Registers the pipeline disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Checks everything except acyclicity: names, stage IDs, dependency
    /// references and trigger configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), HubError> {
        check_structure(&self.name, self.id.as_deref(), &self.stages)?;
        validate_triggers(&self.triggers)
    }
}

fn validate_triggers(triggers: &[Trigger]) -> Result<(), HubError> {
    triggers.iter().filter(|t| t.enabled).try_for_each(Trigger::validate)
}

fn check_structure(
    name: &str,
    id: Option<&str>,
    stages: &[StageDefinition],
) -> Result<(), InvalidDefinitionError> {
    if name.trim().is_empty() {
        return Err(missing_field("Pipeline name cannot be empty or whitespace-only"));
    }
    if id.is_some_and(|id| id.trim().is_empty()) {
        return Err(missing_field("Pipeline ID cannot be blank"));
    }
    if stages.is_empty() {
        return Err(InvalidDefinitionError::new("Pipeline has no stages").with_error_info(
            ErrorInfo::new(codes::EMPTY, "Cannot register an empty pipeline")
                .with_fix_hint("Add at least one stage to the pipeline."),
        ));
    }

    let mut seen = HashSet::new();
    for stage in stages {
        if stage.id.trim().is_empty() {
            return Err(missing_field("Stage ID cannot be empty"));
        }
        if !seen.insert(stage.id.as_str()) {
            return Err(InvalidDefinitionError::new(format!(
                "Duplicate stage ID '{}'",
                stage.id
            ))
            .with_stages(vec![stage.id.clone()])
            .with_error_info(ErrorInfo::new(
                codes::DUPLICATE_STAGE,
                format!("Stage '{}' is declared more than once", stage.id),
            )));
        }
    }

    for stage in stages {
        for dep in &stage.dependencies {
            if !seen.contains(dep.as_str()) {
                return Err(InvalidDefinitionError::new(format!(
                    "Stage '{}' depends on unknown stage '{}'",
                    stage.id, dep
                ))
                .with_stages(vec![stage.id.clone(), dep.clone()])
                .with_error_info(
                    ErrorInfo::new(codes::MISSING_DEP, format!("Dependency '{dep}' not found"))
                        .with_fix_hint("Check the dependency for typos."),
                ));
            }
        }
    }
    Ok(())
}

fn missing_field(message: &str) -> InvalidDefinitionError {
    InvalidDefinitionError::new(message)
        .with_error_info(ErrorInfo::new(codes::MISSING_FIELD, message))
}

/// A registered pipeline.
///
/// Stage definitions never change after registration; only `enabled` and
/// trigger `enabled` flags are mutable through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Unique ID.
    pub id: String,
    /// Pipeline name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Stages in declaration order.
    pub stages: Vec<StageDefinition>,
    /// Triggers.
    pub triggers: Vec<Trigger>,
    /// Whether schedule triggers are armed.
    pub enabled: bool,
    /// Informational priority.
    pub priority: i32,
    /// Owning tenant.
    pub tenant_id: String,
    /// Resolved stage order.
    pub execution_order: Vec<String>,
    /// SHA-256 of the stage and trigger definitions.
    pub fingerprint: String,
    /// When the pipeline was registered.
    pub created_at: DateTime<Utc>,
    /// Last `enabled` toggle.
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    /// Builds a pipeline from a validated definition and its resolved order.
    #[must_use]
    pub fn from_definition(id: String, def: PipelineDefinition, execution_order: Vec<String>) -> Self {
        let fingerprint = fingerprint(&def.stages, &def.triggers);
        let now = Utc::now();
        Self {
            id,
            name: def.name,
            description: def.description,
            stages: def.stages,
            triggers: def.triggers,
            enabled: def.enabled,
            priority: def.priority,
            tenant_id: def.tenant_id,
            execution_order,
            fingerprint,
            created_at: now,
            updated_at: now,
        }
    }

    /// Looks up a stage by ID.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Re-runs the registration checks on a pipeline read back from a store.
    ///
    /// # Errors
    ///
    /// The same errors as [`PipelineDefinition::validate`].
    pub fn validate(&self) -> Result<(), HubError> {
        check_structure(&self.name, Some(&self.id), &self.stages)?;
        validate_triggers(&self.triggers)
    }

    /// Returns the enabled schedule triggers with their parsed schedules.
    pub fn schedules(&self) -> Result<Vec<Schedule>, HubError> {
        let mut schedules = Vec::new();
        for trigger in self.triggers.iter().filter(|t| t.enabled) {
            if let Some(schedule) = trigger.parse_schedule()? {
                schedules.push(schedule);
            }
        }
        Ok(schedules)
    }

    /// Returns true if the pipeline listens for `event`.
    #[must_use]
    pub fn listens_for(&self, event: &str) -> bool {
        self.triggers
            .iter()
            .any(|t| t.enabled && t.event_name() == Some(event))
    }

    /// Recomputes the fingerprint after a trigger toggle.
    pub fn refresh_fingerprint(&mut self) {
        self.fingerprint = fingerprint(&self.stages, &self.triggers);
    }
}

fn fingerprint(stages: &[StageDefinition], triggers: &[Trigger]) -> String {
    let mut hasher = Sha256::new();
    if let Ok(bytes) = serde_json::to_vec(&(stages, triggers)) {
        hasher.update(bytes);
    }
    hex::encode(hasher.finalize())
}
