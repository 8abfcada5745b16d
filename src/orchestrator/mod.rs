//! Task orchestration split into focused submodules.
//!
//! The `Orchestrator` struct and its methods are organized by domain:
//! - [`start`] - Task creation and executor spawning
//! - [`control`] - Pause, resume, cancel and registry queries
//! - [`lifecycle`] - Graceful shutdown
//! - [`dispatch`] - Single-writer registry updates and event publication

mod control;
pub(crate) mod dispatch;
mod lifecycle;
mod start;


pub use start::StartRequest;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{RwLock, Semaphore, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::backend::BackendFactory;
use crate::config::Config;
use crate::error::Result;
use crate::executor::ActiveTasks;
use crate::history::HistoryStore;
use crate::platform::BackendRegistry;
use crate::registry::TaskRegistry;
use crate::types::Event;

use dispatch::CommandSender;

/// Main orchestrator instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Orchestrator {
    /// Global configuration; tasks run against snapshots taken from it
    pub(crate) config: Arc<Config>,
    /// Task store, written only by the dispatcher
    pub(crate) registry: Arc<RwLock<TaskRegistry>>,
    /// Queue into the dispatcher
    pub(crate) commands: CommandSender,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Live executors and their control handles
    pub(crate) active: ActiveTasks,
    /// Backend factories, shared instances and per-platform settings
    pub(crate) backends: Arc<BackendRegistry>,
    pub(crate) history: Option<Arc<dyn HistoryStore>>,
    /// Bounds concurrently running executors (`max_concurrent_tasks`)
    pub(crate) slots: Arc<Semaphore>,
    /// Set to false during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Parent of every task's cancellation token
    pub(crate) shutdown_token: CancellationToken,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// Validates the configuration, sets up the event broadcast channel and starts
    /// the dispatcher task. Must be called from within a Tokio runtime.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(config.orchestrator.event_buffer);
        let registry = Arc::new(RwLock::new(TaskRegistry::new()));
        let commands = dispatch::spawn_dispatcher(Arc::clone(&registry), event_tx.clone());

        tracing::info!(
            max_concurrent_tasks = config.orchestrator.max_concurrent_tasks,
            event_buffer = config.orchestrator.event_buffer,
            "Orchestrator started"
        );

        Ok(Self {
            slots: Arc::new(Semaphore::new(config.orchestrator.max_concurrent_tasks)),
            config: Arc::new(config),
            registry,
            commands,
            event_tx,
            active: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            backends: Arc::new(BackendRegistry::new()),
            history: None,
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Record every task in `history`
    ///
    /// Applies to tasks started after this call.
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Register the backend factory for `platform`
    ///
    /// The backend is built lazily, on the first task for the platform.
    pub async fn register_backend(
        &self,
        platform: impl Into<String>,
        factory: Arc<dyn BackendFactory>,
    ) {
        let platform = platform.into();
        tracing::debug!(platform = %platform, "Registering backend factory");
        self.backends.register(platform, factory).await;
    }

    /// Backend registry shared by all tasks
    pub fn backends(&self) -> &Arc<BackendRegistry> {
        &self.backends
    }

    /// Subscribe to task events
    ///
    /// Every subscriber receives all events published after subscribing. A
    /// subscriber that falls more than `event_buffer` events behind receives
    /// `RecvError::Lagged` and misses the overwritten events.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use media_dl::{Orchestrator, Config, Event};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let orchestrator = Orchestrator::new(Config::default()).await?;
    ///
    /// let mut events = orchestrator.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         if let Event::TaskProgress { id, current, total } = event {
    ///             println!("{id}: {current}/{total:?}");
    ///         }
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Task events as a stream
    ///
    /// Lagging is logged and skipped instead of surfacing as an error item.
    pub fn event_stream(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream lagged, events dropped");
                None
            }
        })
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}
