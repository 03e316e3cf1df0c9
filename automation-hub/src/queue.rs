//! Bounded FIFO of execution requests awaiting admission.
//!
//! Triggers only ever enqueue; the admission loop in the hub is the single
//! consumer. Requests keep their arrival order. Pipeline priority is recorded
//! on the pipeline but does not reorder the queue. Once closed, the queue
//! refuses every push.

use crate::errors::{HubError, QueueFullError};
use crate::execution::{Execution, TriggerPayload};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Channel a waiting caller uses to learn the outcome of admission.
pub type AdmissionResponder = oneshot::Sender<Result<Execution, HubError>>;

/// A request to run a pipeline once.
pub struct QueuedRequest {
    /// Unique request ID.
    pub request_id: Uuid,
    /// Pipeline to run.
    pub pipeline_id: String,
    /// What fired the request.
    pub trigger: TriggerPayload,
    /// When the request entered the queue.
    pub enqueued_at: DateTime<Utc>,
    responder: Option<AdmissionResponder>,
}

impl QueuedRequest {
    /// Creates a fire-and-forget request.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, trigger: TriggerPayload) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            pipeline_id: pipeline_id.into(),
            trigger,
            enqueued_at: Utc::now(),
            responder: None,
        }
    }

    /// Attaches a responder that receives the admitted execution.
    #[must_use]
    pub fn with_responder(mut self, responder: AdmissionResponder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Reports the admission outcome to the waiting caller, if any.
    pub fn respond(self, result: Result<Execution, HubError>) {
        if let Some(tx) = self.responder {
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        }
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("request_id", &self.request_id)
            .field("pipeline_id", &self.pipeline_id)
            .field("trigger", &self.trigger.kind)
            .field("enqueued_at", &self.enqueued_at)
            .field("awaited", &self.responder.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueuedRequest>,
    closed: bool,
}

/// The bounded request queue.
#[derive(Debug)]
pub struct ExecutionQueue {
    state: Mutex<QueueState>,
    capacity: usize,
}

impl ExecutionQueue {
    /// Creates an empty queue holding at most `capacity` requests.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity,
        }
    }

    /// Appends a request.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the queue is at capacity, `ShutDown` once the queue
    /// is closed. The request is dropped and its responder, if any, closed.
    pub fn push(&self, request: QueuedRequest) -> Result<Uuid, HubError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(HubError::ShutDown);
        }
        if state.items.len() >= self.capacity {
            return Err(QueueFullError {
                capacity: self.capacity,
            }
            .into());
        }
        let id = request.request_id;
        state.items.push_back(request);
        Ok(id)
    }

    /// Removes the oldest request.
    pub fn pop(&self) -> Option<QueuedRequest> {
        self.state.lock().items.pop_front()
    }

    /// Refuses further pushes and returns every queued request, oldest first.
    pub fn close(&self) -> Vec<QueuedRequest> {
        let mut state = self.state.lock();
        state.closed = true;
        state.items.drain(..).collect()
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Maximum number of queued requests.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
