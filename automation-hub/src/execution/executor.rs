//! Runs one stage: per-attempt timeout, retries with back-off, and
//! cancellation while waiting to retry.

use crate::cancellation::CancellationToken;
use crate::dispatch::{DispatchTable, StageContext};
use crate::errors::StageError;
use crate::pipeline::StageDefinition;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Final result of a stage after all attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    /// The output, or the error of the last attempt.
    pub result: Result<serde_json::Value, StageError>,
    /// Retries performed (attempts minus one).
    pub retry_count: u32,
}

/// Drives single stages through the dispatch table.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    dispatch: Arc<DispatchTable>,
    default_timeout: Duration,
}

impl StageExecutor {
    /// Creates an executor; `default_timeout` applies to stages without one.
    #[must_use]
    pub fn new(dispatch: Arc<DispatchTable>, default_timeout: Duration) -> Self {
        Self {
            dispatch,
            default_timeout,
        }
    }

    /// The per-attempt timeout of `stage`.
    #[must_use]
    pub fn timeout_for(&self, stage: &StageDefinition) -> Duration {
        stage
            .timeout_ms
            .map_or(self.default_timeout, Duration::from_millis)
    }

    async fn attempt(
        &self,
        stage: &StageDefinition,
        ctx: &StageContext,
    ) -> Result<serde_json::Value, StageError> {
        let limit = self.timeout_for(stage);
        match tokio::time::timeout(limit, self.dispatch.dispatch(stage, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::timeout(
                &stage.id,
                u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    /// Runs `stage` until it succeeds, fails with a final error, or runs out
    /// of retries.
    ///
    /// `on_retry` is called before each back-off wait with the new retry
    /// count, the error that caused it and the delay. Cancellation observed
    /// during the wait ends the stage with `StageError::Cancelled`.
    pub async fn run<F>(
        &self,
        stage: &StageDefinition,
        mut ctx: StageContext,
        cancel: &CancellationToken,
        mut on_retry: F,
    ) -> StageOutcome
    where
        F: FnMut(u32, &StageError, Duration) + Send,
    {
        let policy = &stage.retry_policy;
        let mut retry_count = 0;

        loop {
            ctx.attempt = retry_count;
            let err = match self.attempt(stage, &ctx).await {
                Ok(output) => {
                    return StageOutcome {
                        result: Ok(output),
                        retry_count,
                    }
                }
                Err(err) => err,
            };

            if !err.is_retryable() || !policy.allows_retry(retry_count) {
                return StageOutcome {
                    result: Err(err),
                    retry_count,
                };
            }

            let delay_ms = policy.delay_ms(retry_count);
            let delay = Duration::from_millis(delay_ms);
            retry_count += 1;
            on_retry(retry_count, &err, delay);
            debug!(stage_id = %stage.id, retry = retry_count, delay_ms, "Waiting to retry");

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return StageOutcome {
                        result: Err(StageError::Cancelled { stage: stage.id.clone() }),
                        retry_count,
                    };
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
