//! Core enums shared by every layer of the hub.

mod status;

pub use status::{ExecutionStatus, StageKind, StageStatus, TriggerKind};
