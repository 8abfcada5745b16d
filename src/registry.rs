//! Task registry
//!
//! The authoritative in-memory store of task metadata. It performs no I/O and
//! never panics: every rejected mutation returns a [`TaskError`] and leaves the
//! stored task untouched. The orchestrator's dispatcher is the only writer.

use chrono::Utc;
use std::collections::HashMap;

use crate::error::TaskError;
use crate::types::{Identity, Progress, Status, Task, TaskId, TaskSpec, TaskStats};

type Result<T> = std::result::Result<T, TaskError>;

/// In-memory task store keyed by [`TaskId`], preserving insertion order
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `Pending` task
    ///
    /// Uses the caller-supplied id when present, otherwise generates one.
    pub fn create(&mut self, spec: TaskSpec) -> Result<TaskId> {
        let id = spec.id.unwrap_or_else(TaskId::generate);
        if self.tasks.contains_key(&id) {
            return Err(TaskError::AlreadyExists { id });
        }

        let task = Task {
            id: id.clone(),
            platform: spec.platform,
            mode: spec.mode,
            original_input: spec.original_input,
            resolved_url: String::new(),
            identity: None,
            status: Status::Pending,
            progress: Progress::default(),
            updated_items: 0,
            config_snapshot: spec.config_snapshot,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        self.tasks.insert(id.clone(), task);
        self.order.push(id.clone());
        Ok(id)
    }

    /// Look up a task
    pub fn get(&self, id: &TaskId) -> Result<&Task> {
        self.tasks
            .get(id)
            .ok_or_else(|| TaskError::NotFound { id: id.clone() })
    }

    /// Whether a task with this id exists
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    fn get_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound { id: id.clone() })
    }

    /// Move a task to `status` if the state machine permits it
    pub fn update_status(&mut self, id: &TaskId, status: Status) -> Result<()> {
        let task = self.get_mut(id)?;
        if !task.status.can_transition_to(status) {
            return Err(TaskError::InvalidTransition {
                id: id.clone(),
                from: task.status,
                to: status,
            });
        }

        task.status = status;
        let now = Utc::now();
        if status == Status::Downloading && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if status.is_terminal() {
            task.finished_at = Some(now);
        }
        Ok(())
    }

    /// Record progress
    ///
    /// While `Downloading`, `current` may not decrease unless the update switches
    /// to an unknown total. Terminal tasks accept no progress.
    pub fn update_progress(
        &mut self,
        id: &TaskId,
        current: u64,
        total: Option<u64>,
    ) -> Result<Progress> {
        let task = self.get_mut(id)?;
        if task.status.is_terminal() {
            return Err(TaskError::InvalidOperation {
                id: id.clone(),
                operation: "update progress".to_string(),
                current_state: task.status,
            });
        }
        if task.status == Status::Downloading
            && total.is_some()
            && current < task.progress.current
        {
            return Err(TaskError::ProgressRegression {
                id: id.clone(),
                previous: task.progress.current,
                requested: current,
            });
        }

        task.progress = Progress::new(current, total);
        Ok(task.progress)
    }

    /// Set the canonical URL once
    ///
    /// Returns `false` (and changes nothing) when `url` is empty or a URL is already set.
    pub fn set_resolved_url(&mut self, id: &TaskId, url: &str) -> Result<bool> {
        let task = self.get_mut(id)?;
        if url.is_empty() || !task.resolved_url.is_empty() {
            return Ok(false);
        }
        task.resolved_url = url.to_string();
        Ok(true)
    }

    /// Set the resolved identity once
    ///
    /// Returns `false` (and changes nothing) when `identity` is empty or one is already set.
    pub fn set_identity(&mut self, id: &TaskId, identity: Identity) -> Result<bool> {
        let task = self.get_mut(id)?;
        if identity.is_empty() || task.identity.is_some() {
            return Ok(false);
        }
        task.identity = Some(identity);
        Ok(true)
    }

    /// Add to the count of items the backend actually wrote
    pub fn add_updated_items(&mut self, id: &TaskId, count: u64) -> Result<u64> {
        let task = self.get_mut(id)?;
        task.updated_items = task.updated_items.saturating_add(count);
        Ok(task.updated_items)
    }

    /// Attach an error message to a task that is failing or has failed
    pub fn set_error(&mut self, id: &TaskId, message: impl Into<String>) -> Result<()> {
        let task = self.get_mut(id)?;
        if task.status != Status::Failed && !task.status.can_transition_to(Status::Failed) {
            return Err(TaskError::InvalidOperation {
                id: id.clone(),
                operation: "set error".to_string(),
                current_state: task.status,
            });
        }
        task.error = Some(message.into());
        Ok(())
    }

    /// Record the error and move the task to `Failed` in one step
    pub fn fail(&mut self, id: &TaskId, message: impl Into<String>) -> Result<()> {
        self.set_error(id, message)?;
        self.update_status(id, Status::Failed)
    }

    /// Remove a task that has reached a terminal status
    pub fn remove(&mut self, id: &TaskId) -> Result<Task> {
        let status = self.get(id)?.status;
        if !status.is_terminal() {
            return Err(TaskError::StillActive {
                id: id.clone(),
                status,
            });
        }
        self.order.retain(|existing| existing != id);
        self.tasks
            .remove(id)
            .ok_or_else(|| TaskError::NotFound { id: id.clone() })
    }

    /// All tasks in creation order
    pub fn list(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect()
    }

    /// Tasks currently in `status`, in creation order
    pub fn tasks_by_status(&self, status: Status) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|task| task.status == status)
            .cloned()
            .collect()
    }

    /// Task counts by status
    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats::default();
        for task in self.tasks.values() {
            stats.record(task.status);
        }
        stats
    }

    /// Remove every `Completed` task, returning the removed ids
    pub fn clear_completed(&mut self) -> Vec<TaskId> {
        self.remove_where(|status| status == Status::Completed)
    }

    /// Remove every terminal task, returning the removed ids
    ///
    /// Tasks that still have a live executor are kept.
    pub fn clear_all(&mut self) -> Vec<TaskId> {
        self.remove_where(|status| status.is_terminal())
    }

    fn remove_where(&mut self, predicate: impl Fn(Status) -> bool) -> Vec<TaskId> {
        let removed: Vec<TaskId> = self
            .order
            .iter()
            .filter(|id| self.tasks.get(*id).is_some_and(|t| predicate(t.status)))
            .cloned()
            .collect();
        for id in &removed {
            self.tasks.remove(id);
        }
        self.order.retain(|id| self.tasks.contains_key(id));
        removed
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the registry holds no tasks
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
