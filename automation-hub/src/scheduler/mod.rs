//! Schedule parsing and trigger timers.

mod schedule;
mod triggers;

pub use schedule::Schedule;
pub use triggers::TriggerScheduler;
pub(crate) use triggers::enqueue;
