//! Live state of every execution.
//!
//! The tracker owns the terminal transition: an execution leaves `Running`
//! exactly once, and every write that arrives afterwards is discarded.

use super::{Execution, StageResult};
use crate::core::{ExecutionStatus, StageStatus};
use crate::errors::NotFoundError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Outcome of a cancel request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The execution was running and is now cancelled.
    Cancelled(Execution),
    /// The execution had already finished; nothing changed.
    AlreadyTerminal(ExecutionStatus),
}

/// Thread-safe store of executions keyed by ID.
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    executions: RwLock<HashMap<Uuid, Execution>>,
}

impl ExecutionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a new execution.
    pub fn insert(&self, execution: Execution) {
        self.executions.write().insert(execution.execution_id, execution);
    }

    /// Returns a snapshot of one execution.
    #[must_use]
    pub fn get(&self, execution_id: Uuid) -> Option<Execution> {
        self.executions.read().get(&execution_id).cloned()
    }

    /// Returns the executions of one pipeline, oldest first.
    #[must_use]
    pub fn list_for_pipeline(&self, pipeline_id: &str) -> Vec<Execution> {
        let mut list: Vec<Execution> = self
            .executions
            .read()
            .values()
            .filter(|e| e.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        list.sort_by_key(|e| e.start_time);
        list
    }

    /// Returns a snapshot of every execution.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Execution> {
        self.executions.read().values().cloned().collect()
    }

    /// Number of executions still running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.executions
            .read()
            .values()
            .filter(|e| !e.is_terminal())
            .count()
    }

    /// Applies `update` to one stage result of a running execution.
    ///
    /// Returns false, without applying anything, if the execution is unknown
    /// or already terminal.
    pub fn update_stage<F>(&self, execution_id: Uuid, stage_id: &str, update: F) -> bool
    where
        F: FnOnce(&mut StageResult),
    {
        let mut executions = self.executions.write();
        let Some(execution) = executions.get_mut(&execution_id) else {
            return false;
        };
        if execution.is_terminal() {
            debug!(
                execution_id = %execution_id,
                stage_id = %stage_id,
                status = %execution.status,
                "Discarding stage update for finished execution"
            );
            return false;
        }
        match execution.stage_result_mut(stage_id) {
            Some(result) => {
                update(result);
                true
            }
            None => false,
        }
    }

    /// Moves a running execution to `Completed`, or to `Failed` when a
    /// stage failed or `error` is set.
    ///
    /// Returns the final snapshot if this call made the transition.
    pub fn finish(&self, execution_id: Uuid, error: Option<String>) -> Option<Execution> {
        let mut executions = self.executions.write();
        let execution = executions.get_mut(&execution_id)?;
        let failed = error.is_some()
            || execution
                .stage_results
                .iter()
                .any(|r| r.status == StageStatus::Failed);
        let status = if failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        if execution.finish(status, error) {
            Some(execution.clone())
        } else {
            debug!(execution_id = %execution_id, status = %execution.status, "Execution already finished");
            None
        }
    }

    /// Cancels a running execution. Cancelling a finished execution is a no-op.
    ///
    /// Stages still running are closed as `Failed` with the cancel reason,
    /// since their own completion will be discarded.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError` for an unknown ID.
    pub fn cancel(
        &self,
        execution_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<CancelOutcome, NotFoundError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&execution_id)
            .ok_or_else(|| NotFoundError::execution(execution_id))?;
        if execution.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(execution.status));
        }

        let reason = reason.into();
        let now = Utc::now();
        for result in execution
            .stage_results
            .iter_mut()
            .filter(|r| r.status == StageStatus::Running)
        {
            result.status = StageStatus::Failed;
            result.end_time = Some(now);
            result.error = Some(reason.clone());
        }
        execution.finish(ExecutionStatus::Cancelled, Some(reason));
        Ok(CancelOutcome::Cancelled(execution.clone()))
    }

    /// Drops finished executions that ended before `cutoff`.
    ///
    /// Returns the number removed.
    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut executions = self.executions.write();
        let before = executions.len();
        executions.retain(|_, e| match e.end_time {
            Some(end) if e.is_terminal() => end >= cutoff,
            _ => true,
        });
        before - executions.len()
    }

    /// Number of tracked executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executions.read().len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executions.read().is_empty()
    }
}
