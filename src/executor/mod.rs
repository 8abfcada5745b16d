//! Download task execution, one executor per task from admission to a terminal status.
//!
//! Split into focused submodules:
//! - [`context`] - Per-task inputs, control handles and run state
//! - [`orchestration`] - Top-level task lifecycle (admission, resolution, enumeration)
//! - [`mode`] - Retrieval mode correction against the resolved URL
//! - [`batching`] - Batch loop with pause/cancel checkpoints and retry
//! - [`finalization`] - Terminal status, history update and cleanup

mod batching;
mod context;
mod finalization;
mod mode;
mod orchestration;


pub(crate) use context::{ActiveTasks, ExecutorContext, TaskControl};
pub(crate) use orchestration::run_task;
