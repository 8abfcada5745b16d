//! Task creation and executor spawning.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::oneshot;

use crate::config::ConfigSnapshot;
use crate::error::{Error, Result, TaskError};
use crate::executor::{ExecutorContext, TaskControl, run_task};
use crate::platform::ConfigInjector;
use crate::types::{TaskId, TaskSpec};

use super::Orchestrator;
use super::dispatch::Command;

/// Everything needed to start one task
#[derive(Clone, Debug)]
pub struct StartRequest {
    /// Caller-chosen task id; must not be in use
    pub id: TaskId,
    /// Platform name the backend was registered under
    pub platform: String,
    /// Retrieval mode (e.g. `"post"`, `"one"`)
    pub mode: String,
    /// Raw user input: a URL or share text containing one
    pub input: String,
    /// Settings the task runs with for its whole lifetime
    pub snapshot: Arc<ConfigSnapshot>,
}

impl StartRequest {
    /// Build a start request
    pub fn new(
        id: impl Into<TaskId>,
        platform: impl Into<String>,
        mode: impl Into<String>,
        input: impl Into<String>,
        snapshot: Arc<ConfigSnapshot>,
    ) -> Self {
        Self {
            id: id.into(),
            platform: platform.into(),
            mode: mode.into(),
            input: input.into(),
            snapshot,
        }
    }
}

impl Orchestrator {
    /// Create a task and start its executor
    ///
    /// Returns `Ok(false)` without side effects when a task with the same id is
    /// already active or registered. The executor waits in `Pending` until one of
    /// the `max_concurrent_tasks` slots frees up.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`Error::Config`] when the request's snapshot fails validation
    /// - [`Error::UnknownPlatform`] when no backend is registered for the platform
    /// - [`Error::UnsupportedMode`] when the config's platform table lists the
    ///   platform without the requested mode
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use media_dl::{Orchestrator, Config, StartRequest};
    /// # async fn example(orchestrator: Orchestrator) -> media_dl::Result<()> {
    /// let snapshot = orchestrator.get_config().snapshot()?;
    /// let started = orchestrator
    ///     .start(StartRequest::new("t1", "douyin", "post", "https://site/x", snapshot))
    ///     .await?;
    /// assert!(started);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(&self, request: StartRequest) -> Result<bool> {
        self.check_startable(&request).await?;

        let mut active = self.active.lock().await;
        if active.contains_key(&request.id) {
            tracing::warn!(task_id = %request.id, "Task already active, not starting again");
            return Ok(false);
        }

        let spec = TaskSpec {
            id: Some(request.id.clone()),
            platform: request.platform.clone(),
            mode: request.mode.clone(),
            original_input: request.input.clone(),
            config_snapshot: Arc::clone(&request.snapshot),
        };
        let id = match self.create_task(spec).await {
            Ok(id) => id,
            Err(Error::Task(TaskError::AlreadyExists { id })) => {
                tracing::warn!(task_id = %id, "Task id already registered, not starting");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.spawn_executor(&mut active, id, request);
        Ok(true)
    }

    /// Start a task under a generated id, using a snapshot of the global config
    pub async fn start_new(
        &self,
        platform: impl Into<String>,
        mode: impl Into<String>,
        input: impl Into<String>,
    ) -> Result<TaskId> {
        let id = TaskId::generate();
        let request = StartRequest::new(id.clone(), platform, mode, input, self.config.snapshot()?);
        if self.start(request).await? {
            Ok(id)
        } else {
            Err(TaskError::AlreadyExists { id }.into())
        }
    }

    async fn check_startable(&self, request: &StartRequest) -> Result<()> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let platform = request.platform.as_str();
        if let Err(e) = request.snapshot.validate() {
            tracing::warn!(task_id = %request.id, error = %e, "Rejecting task with invalid settings");
            return Err(e);
        }
        if !self.backends.contains(platform).await {
            tracing::warn!(platform = %platform, "No backend registered for platform");
            return Err(Error::UnknownPlatform(platform.to_string()));
        }
        let offered = self
            .config
            .modes_for(platform)
            .is_none_or(|modes| modes.contains(&request.mode));
        if !offered {
            tracing::warn!(platform = %platform, mode = %request.mode, "Mode not offered for platform");
            return Err(Error::UnsupportedMode {
                platform: platform.to_string(),
                mode: request.mode.clone(),
            });
        }
        Ok(())
    }

    /// Register the task through the dispatcher so `task_added` precedes its other events
    async fn create_task(&self, spec: TaskSpec) -> Result<TaskId> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Create { spec, reply })
            .map_err(|_| Error::ShuttingDown)?;
        let id = rx.await.map_err(|_| Error::ShuttingDown)??;
        Ok(id)
    }

    fn spawn_executor(
        &self,
        active: &mut HashMap<TaskId, TaskControl>,
        id: TaskId,
        request: StartRequest,
    ) {
        let cancel = self.shutdown_token.child_token();
        let (control, pause_rx) = TaskControl::new(cancel.clone());
        active.insert(id.clone(), control);

        tracing::info!(
            task_id = %id,
            platform = %request.platform,
            mode = %request.mode,
            "Starting task"
        );

        let injector = ConfigInjector::new(Arc::clone(&self.backends))
            .rederive_timeout(request.snapshot.request_timeout);
        let ctx = ExecutorContext {
            id,
            platform: request.platform,
            mode: request.mode,
            original_input: request.input,
            snapshot: request.snapshot,
            updates: self.commands.clone(),
            cancel,
            pause_rx,
            backends: Arc::clone(&self.backends),
            injector,
            history: self.history.clone(),
            slots: Arc::clone(&self.slots),
            active: Arc::clone(&self.active),
        };
        tokio::spawn(run_task(ctx));
    }
}
