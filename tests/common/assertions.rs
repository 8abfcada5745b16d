//! Event collection helpers

use media_dl::{Event, Status, TaskId};
use std::time::Duration;
use tokio::sync::broadcast;

/// Default wait for a task to finish
pub const TASK_TIMEOUT: Duration = Duration::from_secs(10);

/// Collect every event of task `id` up to and including its `TaskFinished`
///
/// Panics on timeout or a closed channel.
pub async fn collect_task_events(events: &mut broadcast::Receiver<Event>, id: &str) -> Vec<Event> {
    let id = TaskId::from(id);
    tokio::time::timeout(TASK_TIMEOUT, async {
        let mut collected = Vec::new();
        loop {
            let event = events.recv().await.expect("event channel closed");
            if event.task_id() != Some(&id) {
                continue;
            }
            let finished = matches!(event, Event::TaskFinished { .. });
            collected.push(event);
            if finished {
                return collected;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for task {id} to finish"))
}

/// Wait until task `id` reports `status`
pub async fn wait_for_status(events: &mut broadcast::Receiver<Event>, id: &str, status: Status) {
    let wanted = Event::TaskStatusChanged {
        id: TaskId::from(id),
        status,
    };
    wait_for_event(events, wanted).await;
}

/// Wait until `wanted` is received
pub async fn wait_for_event(events: &mut broadcast::Receiver<Event>, wanted: Event) {
    tokio::time::timeout(TASK_TIMEOUT, async {
        loop {
            if events.recv().await.expect("event channel closed") == wanted {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"));
}

/// Drop informational messages, which interleave freely with other events
pub fn without_messages(events: Vec<Event>) -> Vec<Event> {
    events
        .into_iter()
        .filter(|e| !matches!(e, Event::TaskMessage { .. }))
        .collect()
}

/// Statuses reported in `events`, in order
pub fn statuses(events: &[Event]) -> Vec<Status> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::TaskStatusChanged { status, .. } => Some(*status),
            _ => None,
        })
        .collect()
}

/// `current` values of progress events, in order
pub fn progress_values(events: &[Event]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::TaskProgress { current, .. } => Some(*current),
            _ => None,
        })
        .collect()
}
