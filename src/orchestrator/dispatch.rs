//! Registry serialization point. Applies task updates and publishes events.
//!
//! Every registry mutation travels through one unbounded channel to a single
//! dispatcher task. An update is published to subscribers only after the
//! registry accepted it, so rejected transitions never reach the event stream and
//! per-task event order is the order in which the executor sent its updates.

use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc, oneshot};

use crate::error::TaskError;
use crate::registry::TaskRegistry;
use crate::types::{Event, Identity, Status, Task, TaskId, TaskSpec};

/// A state change reported by an executor
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TaskUpdate {
    Status { id: TaskId, status: Status },
    Progress { id: TaskId, current: u64, total: Option<u64> },
    Message { id: TaskId, text: String },
    ResolvedUrl { id: TaskId, url: String },
    Identity { id: TaskId, identity: Identity },
    UpdatedItems { id: TaskId, count: u64 },
    /// Record the error and move to `Failed`
    Failed { id: TaskId, message: String },
    /// The executor exited; sent exactly once, after the terminal status
    Finished { id: TaskId },
}

impl TaskUpdate {
    pub(crate) fn id(&self) -> &TaskId {
        match self {
            TaskUpdate::Status { id, .. }
            | TaskUpdate::Progress { id, .. }
            | TaskUpdate::Message { id, .. }
            | TaskUpdate::ResolvedUrl { id, .. }
            | TaskUpdate::Identity { id, .. }
            | TaskUpdate::UpdatedItems { id, .. }
            | TaskUpdate::Failed { id, .. }
            | TaskUpdate::Finished { id } => id,
        }
    }
}

/// Requests handled by the dispatcher
pub(crate) enum Command {
    Update(TaskUpdate),
    Create {
        spec: TaskSpec,
        reply: oneshot::Sender<Result<TaskId, TaskError>>,
    },
    Remove {
        id: TaskId,
        reply: oneshot::Sender<Result<Task, TaskError>>,
    },
    ClearCompleted {
        reply: oneshot::Sender<Vec<TaskId>>,
    },
    Shutdown,
}

/// Sending half used by the orchestrator and executors
pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;

/// Start the dispatcher task
pub(crate) fn spawn_dispatcher(
    registry: Arc<RwLock<TaskRegistry>>,
    event_tx: broadcast::Sender<Event>,
) -> CommandSender {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let events = {
                let mut registry = registry.write().await;
                handle_command(&mut registry, command)
            };
            for event in events {
                // No subscribers is fine
                event_tx.send(event).ok();
            }
        }
        tracing::debug!("Dispatcher stopped");
    });

    tx
}

fn handle_command(registry: &mut TaskRegistry, command: Command) -> Vec<Event> {
    match command {
        Command::Update(update) => {
            let id = update.id().clone();
            match apply_update(registry, update) {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(task_id = %id, error = %e, "Rejected task update");
                    Vec::new()
                }
            }
        }
        Command::Create { spec, reply } => {
            let result = registry.create(spec);
            let events = match &result {
                Ok(id) => vec![Event::TaskAdded { id: id.clone() }],
                Err(_) => Vec::new(),
            };
            // Caller gone: the task still exists and can be queried
            let _ = reply.send(result);
            events
        }
        Command::Remove { id, reply } => {
            let result = registry.remove(&id);
            let events = match &result {
                Ok(_) => vec![Event::TaskRemoved { id }],
                Err(_) => Vec::new(),
            };
            let _ = reply.send(result);
            events
        }
        Command::ClearCompleted { reply } => {
            let removed = registry.clear_completed();
            let events = removed
                .iter()
                .map(|id| Event::TaskRemoved { id: id.clone() })
                .collect();
            let _ = reply.send(removed);
            events
        }
        Command::Shutdown => vec![Event::Shutdown],
    }
}

/// Apply one update, returning the events it produces
pub(crate) fn apply_update(
    registry: &mut TaskRegistry,
    update: TaskUpdate,
) -> Result<Vec<Event>, TaskError> {
    let events = match update {
        TaskUpdate::Status { id, status } => {
            registry.update_status(&id, status)?;
            vec![Event::TaskStatusChanged { id, status }]
        }
        TaskUpdate::Progress { id, current, total } => {
            let progress = registry.update_progress(&id, current, total)?;
            vec![Event::TaskProgress {
                id,
                current: progress.current,
                total: progress.total,
            }]
        }
        TaskUpdate::Message { id, text } => {
            registry.get(&id)?;
            vec![Event::TaskMessage { id, text }]
        }
        TaskUpdate::ResolvedUrl { id, url } => {
            let changed = registry.set_resolved_url(&id, &url)?;
            // Only a URL that differs from what the user typed is news
            if changed && registry.get(&id)?.original_input != url {
                vec![Event::TaskUrlResolved { id, url }]
            } else {
                Vec::new()
            }
        }
        TaskUpdate::Identity { id, identity } => {
            if registry.set_identity(&id, identity.clone())? {
                vec![Event::TaskIdentityResolved {
                    id,
                    nickname: identity.nickname,
                    external_id: identity.external_id,
                }]
            } else {
                Vec::new()
            }
        }
        TaskUpdate::UpdatedItems { id, count } => {
            registry.add_updated_items(&id, count)?;
            Vec::new()
        }
        TaskUpdate::Failed { id, message } => {
            registry.fail(&id, message.clone())?;
            vec![
                Event::TaskError {
                    id: id.clone(),
                    message,
                },
                Event::TaskStatusChanged {
                    id,
                    status: Status::Failed,
                },
            ]
        }
        TaskUpdate::Finished { id } => {
            let status = registry.get(&id)?.status;
            if !status.is_terminal() {
                return Err(TaskError::InvalidOperation {
                    id,
                    operation: "finish".to_string(),
                    current_state: status,
                });
            }
            vec![Event::TaskFinished { id }]
        }
    };
    Ok(events)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn registry_with(id: &str, input: &str) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .create(TaskSpec {
                id: Some(TaskId::from(id)),
                platform: "demo".into(),
                mode: "post".into(),
                original_input: input.into(),
                config_snapshot: Config::default().snapshot().unwrap(),
            })
            .unwrap();
        registry
    }

    fn status(id: &str, status: Status) -> TaskUpdate {
        TaskUpdate::Status {
            id: TaskId::from(id),
            status,
        }
    }

    #[test]
    fn accepted_status_update_produces_event() {
        let mut registry = registry_with("t1", "https://site/x");
        let events = apply_update(&mut registry, status("t1", Status::Resolving)).unwrap();
        assert_eq!(
            events,
            vec![Event::TaskStatusChanged {
                id: TaskId::from("t1"),
                status: Status::Resolving
            }]
        );
    }

    #[test]
    fn rejected_update_produces_no_event() {
        let mut registry = registry_with("t1", "https://site/x");
        let events = handle_command(
            &mut registry,
            Command::Update(status("t1", Status::Completed)),
        );
        assert!(events.is_empty(), "illegal transitions must not be published");
        assert_eq!(
            registry.get(&TaskId::from("t1")).unwrap().status,
            Status::Pending
        );
    }

    #[test]
    fn url_event_only_when_resolution_changes_input() {
        let mut registry = registry_with("same", "https://site/x");
        let events = apply_update(
            &mut registry,
            TaskUpdate::ResolvedUrl {
                id: TaskId::from("same"),
                url: "https://site/x".into(),
            },
        )
        .unwrap();
        assert!(events.is_empty());
        assert_eq!(
            registry.get(&TaskId::from("same")).unwrap().resolved_url,
            "https://site/x",
            "URL is stored even when no event is published"
        );

        let mut registry = registry_with("share", "look: https://site/y !");
        let events = apply_update(
            &mut registry,
            TaskUpdate::ResolvedUrl {
                id: TaskId::from("share"),
                url: "https://site/y".into(),
            },
        )
        .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn failure_emits_error_then_status() {
        let mut registry = registry_with("t1", "x");
        for s in [Status::Resolving, Status::Downloading] {
            apply_update(&mut registry, status("t1", s)).unwrap();
        }

        let events = apply_update(
            &mut registry,
            TaskUpdate::Failed {
                id: TaskId::from("t1"),
                message: "boom".into(),
            },
        )
        .unwrap();

        assert!(matches!(events[0], Event::TaskError { .. }));
        assert!(matches!(
            events[1],
            Event::TaskStatusChanged {
                status: Status::Failed,
                ..
            }
        ));
    }

    #[test]
    fn finished_requires_terminal_status() {
        let mut registry = registry_with("t1", "x");
        let finished = TaskUpdate::Finished {
            id: TaskId::from("t1"),
        };
        assert!(apply_update(&mut registry, finished.clone()).is_err());

        apply_update(&mut registry, status("t1", Status::Cancelled)).unwrap();
        assert_eq!(
            apply_update(&mut registry, finished).unwrap(),
            vec![Event::TaskFinished {
                id: TaskId::from("t1")
            }]
        );
    }

    #[tokio::test]
    async fn dispatcher_replies_and_publishes_in_order() {
        let registry = Arc::new(RwLock::new(TaskRegistry::new()));
        let (event_tx, mut events) = broadcast::channel(16);
        let commands = spawn_dispatcher(registry.clone(), event_tx);

        let (reply, rx) = oneshot::channel();
        commands
            .send(Command::Create {
                spec: TaskSpec {
                    id: Some(TaskId::from("t1")),
                    platform: "demo".into(),
                    mode: "post".into(),
                    original_input: "x".into(),
                    config_snapshot: Config::default().snapshot().unwrap(),
                },
                reply,
            })
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), "t1");

        commands
            .send(Command::Update(status("t1", Status::Resolving)))
            .unwrap();
        commands
            .send(Command::Update(TaskUpdate::Message {
                id: TaskId::from("t1"),
                text: "hello".into(),
            }))
            .unwrap();

        assert!(matches!(events.recv().await.unwrap(), Event::TaskAdded { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::TaskStatusChanged { .. }
        ));
        assert!(matches!(events.recv().await.unwrap(), Event::TaskMessage { .. }));
        assert_eq!(registry.read().await.len(), 1);
    }
}
