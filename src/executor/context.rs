//! Executor context with per-task inputs, control handles and run state.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigSnapshot;
use crate::history::HistoryStore;
use crate::orchestrator::dispatch::{Command, CommandSender, TaskUpdate};
use crate::platform::{BackendRegistry, ConfigInjector};
use crate::types::{Status, TaskId};

use super::orchestration::Outcome;

/// Live executors keyed by task id
pub(crate) type ActiveTasks = Arc<tokio::sync::Mutex<HashMap<TaskId, TaskControl>>>;

/// Cooperative cancel and pause signals for one task
#[derive(Clone, Debug)]
pub(crate) struct TaskControl {
    cancel: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
}

impl TaskControl {
    /// Create a control pair; the receiver goes to the executor
    pub(crate) fn new(cancel: CancellationToken) -> (Self, watch::Receiver<bool>) {
        let (pause, pause_rx) = watch::channel(false);
        (
            Self {
                cancel,
                pause: Arc::new(pause),
            },
            pause_rx,
        )
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn request_pause(&self) {
        self.pause.send_replace(true);
    }

    /// Clear the pause flag, returning whether it was set
    pub(crate) fn clear_pause(&self) -> bool {
        self.pause.send_replace(false)
    }

    pub(crate) fn pause_requested(&self) -> bool {
        *self.pause.borrow()
    }
}

/// Everything an executor needs, assembled by the orchestrator at start time
pub(crate) struct ExecutorContext {
    pub(crate) id: TaskId,
    pub(crate) platform: String,
    pub(crate) mode: String,
    pub(crate) original_input: String,
    pub(crate) snapshot: Arc<ConfigSnapshot>,
    pub(crate) updates: CommandSender,
    pub(crate) cancel: CancellationToken,
    pub(crate) pause_rx: watch::Receiver<bool>,
    pub(crate) backends: Arc<BackendRegistry>,
    pub(crate) injector: ConfigInjector,
    pub(crate) history: Option<Arc<dyn HistoryStore>>,
    pub(crate) slots: Arc<Semaphore>,
    pub(crate) active: ActiveTasks,
}

/// Mutable state of one executor run
pub(super) struct TaskRun {
    pub(super) ctx: ExecutorContext,
    /// Status as last reported by this executor
    pub(super) status: Status,
    /// Items processed so far
    pub(super) processed: u64,
    /// Retrieval mode in effect, after correction
    pub(super) mode: String,
    pub(super) history_record: Option<String>,
    /// Held until the executor exits
    pub(super) permit: Option<OwnedSemaphorePermit>,
}

impl TaskRun {
    pub(super) fn new(ctx: ExecutorContext) -> Self {
        Self {
            mode: ctx.mode.clone(),
            ctx,
            status: Status::Pending,
            processed: 0,
            history_record: None,
            permit: None,
        }
    }

    /// Forward an update to the dispatcher
    pub(super) fn send(&self, update: TaskUpdate) {
        if self.ctx.updates.send(Command::Update(update)).is_err() {
            tracing::debug!(task_id = %self.ctx.id, "Dispatcher gone, dropping task update");
        }
    }

    pub(super) fn transition(&mut self, status: Status) {
        self.status = status;
        self.send(TaskUpdate::Status {
            id: self.ctx.id.clone(),
            status,
        });
    }

    pub(super) fn message(&self, text: impl Into<String>) {
        self.send(TaskUpdate::Message {
            id: self.ctx.id.clone(),
            text: text.into(),
        });
    }

    pub(super) fn progress(&self, current: u64, total: Option<u64>) {
        self.send(TaskUpdate::Progress {
            id: self.ctx.id.clone(),
            current,
            total,
        });
    }

    /// Wait for an execution slot while `Pending`
    ///
    /// Returns an outcome only when the task is cancelled before a slot frees up.
    pub(super) async fn acquire_slot(&mut self) -> Option<Outcome> {
        let slots = Arc::clone(&self.ctx.slots);
        let acquired = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => None,
            permit = slots.acquire_owned() => Some(permit),
        };
        match acquired {
            Some(Ok(permit)) => {
                self.permit = Some(permit);
                None
            }
            // Cancelled while waiting, or the semaphore was closed during shutdown
            Some(Err(_)) | None => Some(Outcome::Cancelled),
        }
    }

    /// Batch-boundary checkpoint for cancellation and pause
    ///
    /// A pending pause moves the task to `Paused` and blocks until it is resumed
    /// (back to `Downloading`, returns `None`) or cancelled.
    pub(super) async fn checkpoint(&mut self) -> Option<Outcome> {
        if self.ctx.cancel.is_cancelled() {
            return Some(Outcome::Cancelled);
        }
        if !*self.ctx.pause_rx.borrow_and_update() {
            return None;
        }

        self.transition(Status::Paused);
        tracing::info!(
            task_id = %self.ctx.id,
            processed = self.processed,
            "Task paused at batch boundary"
        );

        let resumed = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => false,
            changed = self.ctx.pause_rx.wait_for(|paused| !*paused) => changed.is_ok(),
        };
        if !resumed {
            return Some(Outcome::Cancelled);
        }

        self.transition(Status::Downloading);
        tracing::info!(task_id = %self.ctx.id, "Task resumed");
        None
    }

    /// Sleep for the configured inter-page wait; `false` if cancelled meanwhile
    pub(super) async fn wait_between_pages(&self) -> bool {
        let wait = self.ctx.snapshot.page_wait;
        if wait.is_zero() {
            return true;
        }
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    /// Move to `Failed`, entering `Downloading` first if the task never got there
    pub(super) fn mark_failed(&mut self, message: &str) {
        if self.status.is_terminal() {
            return;
        }
        for step in [Status::Resolving, Status::Downloading] {
            if !self.status.can_transition_to(Status::Failed) && self.status.can_transition_to(step)
            {
                self.transition(step);
            }
        }
        self.status = Status::Failed;
        self.send(TaskUpdate::Failed {
            id: self.ctx.id.clone(),
            message: message.to_string(),
        });
    }

    /// Leave the active map and send `Finished` under one lock hold
    ///
    /// Anyone who sees the task gone from the active map also finds `Finished`
    /// already queued ahead of their own commands.
    pub(super) async fn finish(&self) {
        let mut active = self.ctx.active.lock().await;
        active.remove(&self.ctx.id);
        self.send(TaskUpdate::Finished {
            id: self.ctx.id.clone(),
        });
    }
}
