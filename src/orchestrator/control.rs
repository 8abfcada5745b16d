//! Task control: pause, resume, cancel, removal and registry queries.

use tokio::sync::oneshot;

use crate::error::{Error, Result, TaskError};
use crate::types::{Status, Task, TaskId, TaskStats};

use super::Orchestrator;
use super::dispatch::Command;

impl Orchestrator {
    /// Pause a downloading task
    ///
    /// Pause is cooperative: the batch in flight completes, then the task moves to
    /// `Paused` at the next batch boundary.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] for an unknown id, [`TaskError::InvalidOperation`]
    /// when the task is not `Downloading`. The task is left untouched either way.
    pub async fn pause(&self, id: &TaskId) -> Result<()> {
        let status = self.status_of(id).await?;
        let active = self.active.lock().await;
        match (status, active.get(id)) {
            (Status::Downloading, Some(control)) => {
                control.request_pause();
                tracing::info!(task_id = %id, "Pause requested");
                Ok(())
            }
            _ => Err(rejected(id, "pause", status)),
        }
    }

    /// Resume a paused task
    ///
    /// Also withdraws a pause that was requested but has not taken effect yet.
    pub async fn resume(&self, id: &TaskId) -> Result<()> {
        let status = self.status_of(id).await?;
        let active = self.active.lock().await;
        let Some(control) = active.get(id) else {
            return Err(rejected(id, "resume", status));
        };

        let legal = match status {
            Status::Paused => true,
            Status::Downloading => control.pause_requested(),
            _ => false,
        };
        if !legal {
            return Err(rejected(id, "resume", status));
        }

        control.clear_pause();
        tracing::info!(task_id = %id, "Resume requested");
        Ok(())
    }

    /// Cancel a task that has not reached a terminal status
    ///
    /// A `Pending` task goes straight to `Cancelled`; a running one stops at its
    /// next suspension point.
    pub async fn cancel(&self, id: &TaskId) -> Result<()> {
        let status = self.status_of(id).await?;
        if status.is_terminal() {
            return Err(rejected(id, "cancel", status));
        }
        let active = self.active.lock().await;
        match active.get(id) {
            Some(control) => {
                control.cancel();
                tracing::info!(task_id = %id, status = ?status, "Cancellation requested");
                Ok(())
            }
            // Executor already on its way out
            None => Err(rejected(id, "cancel", status)),
        }
    }

    /// Remove a task that reached a terminal status
    pub async fn remove(&self, id: &TaskId) -> Result<Task> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Remove {
                id: id.clone(),
                reply,
            })
            .map_err(|_| Error::ShuttingDown)?;
        let task = rx.await.map_err(|_| Error::ShuttingDown)??;
        tracing::debug!(task_id = %id, "Task removed");
        Ok(task)
    }

    /// Remove every `Completed` task, returning the removed ids
    pub async fn clear_completed(&self) -> Result<Vec<TaskId>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ClearCompleted { reply })
            .map_err(|_| Error::ShuttingDown)?;
        let removed = rx.await.map_err(|_| Error::ShuttingDown)?;
        tracing::debug!(count = removed.len(), "Cleared completed tasks");
        Ok(removed)
    }

    /// Get a copy of one task
    pub async fn get(&self, id: &TaskId) -> Result<Task> {
        let registry = self.registry.read().await;
        Ok(registry.get(id)?.clone())
    }

    /// All tasks in creation order
    pub async fn list(&self) -> Vec<Task> {
        self.registry.read().await.list()
    }

    /// Tasks currently in `status`
    pub async fn tasks_by_status(&self, status: Status) -> Vec<Task> {
        self.registry.read().await.tasks_by_status(status)
    }

    /// Task counts per status
    pub async fn stats(&self) -> TaskStats {
        self.registry.read().await.stats()
    }

    /// Ids of tasks whose executor is still running, sorted
    pub async fn list_active(&self) -> Vec<TaskId> {
        let active = self.active.lock().await;
        let mut ids: Vec<TaskId> = active.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn status_of(&self, id: &TaskId) -> Result<Status> {
        let registry = self.registry.read().await;
        Ok(registry.get(id)?.status)
    }
}

/// Log and build the error for an operation the task's state does not allow
fn rejected(id: &TaskId, operation: &str, current_state: Status) -> Error {
    tracing::warn!(
        task_id = %id,
        operation,
        status = ?current_state,
        "Operation not allowed in current state, ignoring"
    );
    TaskError::InvalidOperation {
        id: id.clone(),
        operation: operation.to_string(),
        current_state,
    }
    .into()
}
