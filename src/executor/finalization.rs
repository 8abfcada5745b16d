//! Task finalization: terminal status, history update and cleanup.

use crate::history::RecordUpdate;
use crate::types::Status;

use super::context::TaskRun;
use super::orchestration::Outcome;

/// Report the terminal status, update history and release the task's slot.
///
/// `task_finished` is always the last update an executor sends.
pub(super) async fn finalize_task(mut run: TaskRun, outcome: Outcome) {
    let id = run.ctx.id.clone();

    match outcome {
        Outcome::Completed { processed, total } => {
            if total != Some(processed) {
                // Unknown or overstated total: report a full bar
                run.progress(processed, Some(processed));
            }
            run.message(format!("Download finished, {processed} items processed"));
            run.transition(Status::Completed);
            tracing::info!(task_id = %id, processed, "Task completed");
        }
        Outcome::Failed(message) => {
            tracing::error!(
                task_id = %id,
                processed = run.processed,
                error = %message,
                "Task failed"
            );
            run.mark_failed(&message);
        }
        Outcome::Cancelled => {
            run.transition(Status::Cancelled);
            tracing::info!(task_id = %id, processed = run.processed, "Task cancelled");
        }
    }

    update_history(&run).await;
    run.finish().await;
}

async fn update_history(run: &TaskRun) {
    let (Some(history), Some(record_id)) = (&run.ctx.history, &run.history_record) else {
        return;
    };
    let update = RecordUpdate {
        status: Some(run.status),
        item_count: Some(run.processed),
        mode: Some(run.mode.clone()),
    };
    if let Err(e) = history.update_record(record_id, update).await {
        tracing::warn!(task_id = %run.ctx.id, error = %e, "Failed to update history record");
    }
}
