//! Execution metrics.
//!
//! Two views are kept:
//!
//! - [`AggregateMetrics`]: computed on demand from execution snapshots for
//!   a tenant and a time window
//! - [`TenantTotals`]: running counters updated at every terminal
//!   transition, so they survive purging of old executions

use crate::core::ExecutionStatus;
use crate::execution::Execution;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a window.
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window ending now and spanning `span`.
    #[must_use]
    pub fn last(span: Duration) -> Self {
        let end = Utc::now();
        Self::new(end - span, end)
    }

    /// Returns true if `at` falls inside the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    /// Length of the window in hours.
    #[must_use]
    pub fn hours(&self) -> f64 {
        (self.end - self.start).num_milliseconds().max(0) as f64 / 3_600_000.0
    }
}

/// Aggregate figures for one tenant over one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    /// Executions started inside the window.
    pub total_executions: usize,
    /// Of those, completed.
    pub completed: usize,
    /// Of those, failed.
    pub failed: usize,
    /// Of those, cancelled.
    pub cancelled: usize,
    /// Of those, still running.
    pub running: usize,
    /// `completed / finished`, 0 when nothing finished.
    pub success_rate: f64,
    /// `failed / finished`, 0 when nothing finished.
    pub error_rate: f64,
    /// Mean duration of finished executions in milliseconds.
    pub average_duration_ms: f64,
    /// Finished executions per hour of window.
    pub throughput_per_hour: f64,
    /// Stages that ran (completed or failed).
    pub stages_executed: usize,
    /// Stages that failed.
    pub stages_failed: usize,
}

impl AggregateMetrics {
    /// Computes the figures for `tenant_id` from `executions`, counting those
    /// whose start time falls in `range`.
    #[must_use]
    pub fn compute<'a>(
        executions: impl IntoIterator<Item = &'a Execution>,
        tenant_id: &str,
        range: &TimeRange,
    ) -> Self {
        let mut metrics = Self::default();
        let mut total_duration: u64 = 0;
        let mut timed = 0usize;

        for execution in executions
            .into_iter()
            .filter(|e| e.tenant_id == tenant_id && range.contains(e.start_time))
        {
            metrics.total_executions += 1;
            match execution.status {
                ExecutionStatus::Running => metrics.running += 1,
                ExecutionStatus::Completed => metrics.completed += 1,
                ExecutionStatus::Failed => metrics.failed += 1,
                ExecutionStatus::Cancelled => metrics.cancelled += 1,
            }
            if let Some(duration) = execution.duration_ms {
                total_duration = total_duration.saturating_add(duration);
                timed += 1;
            }
            metrics.stages_executed += execution.metrics.stages_executed;
            metrics.stages_failed += execution.metrics.stages_failed;
        }

        let finished = metrics.completed + metrics.failed + metrics.cancelled;
        if finished > 0 {
            metrics.success_rate = metrics.completed as f64 / finished as f64;
            metrics.error_rate = metrics.failed as f64 / finished as f64;
        }
        if timed > 0 {
            metrics.average_duration_ms = total_duration as f64 / timed as f64;
        }
        let hours = range.hours();
        if hours > 0.0 {
            metrics.throughput_per_hour = finished as f64 / hours;
        }
        metrics
    }
}

/// Lifetime counters of one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantTotals {
    /// Executions that reached a terminal status.
    pub executions: u64,
    /// Completed executions.
    pub completed: u64,
    /// Failed executions.
    pub failed: u64,
    /// Cancelled executions.
    pub cancelled: u64,
    /// Sum of execution durations in milliseconds.
    pub total_duration_ms: u64,
}

/// Maintains per-tenant totals.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    totals: DashMap<String, TenantTotals>,
}

impl MetricsAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a finished execution. Running executions are ignored.
    pub fn record(&self, execution: &Execution) {
        if !execution.is_terminal() {
            return;
        }
        let mut totals = self.totals.entry(execution.tenant_id.clone()).or_default();
        totals.executions += 1;
        match execution.status {
            ExecutionStatus::Completed => totals.completed += 1,
            ExecutionStatus::Failed => totals.failed += 1,
            ExecutionStatus::Cancelled => totals.cancelled += 1,
            ExecutionStatus::Running => {}
        }
        totals.total_duration_ms = totals
            .total_duration_ms
            .saturating_add(execution.duration_ms.unwrap_or(0));
    }

    /// Returns the totals of `tenant_id`.
    #[must_use]
    pub fn totals(&self, tenant_id: &str) -> TenantTotals {
        self.totals.get(tenant_id).map(|t| *t).unwrap_or_default()
    }
}
