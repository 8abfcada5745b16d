//! Batch loop: fetch a page, materialize it, report progress, then check pause and cancel.

use futures::FutureExt;

use crate::backend::{ContentBackend, ItemEnumerator};
use crate::retry::{download_with_retry, retry_with_state, with_timeout};
use crate::types::TaskId;

use super::context::TaskRun;
use super::orchestration::Outcome;

/// Process batches until the enumerator is exhausted or `max_items` is reached
///
/// Pause and cancellation are observed between batches; a batch that has
/// started materializing always completes first. Cancellation also ends a
/// retry backoff, and a request that failed after cancellation ends the task as
/// cancelled rather than failed.
pub(super) async fn download_batches(
    run: &mut TaskRun,
    backend: &dyn ContentBackend,
    mut enumerator: Box<dyn ItemEnumerator>,
) -> Outcome {
    let id = run.ctx.id.clone();
    let snapshot = std::sync::Arc::clone(&run.ctx.snapshot);
    let policy = snapshot.retry_policy();
    let timeout = snapshot.request_timeout;
    let destination = snapshot.destination();
    let max_items = snapshot.max_items;

    let mut total = capped_total(enumerator.total_hint(), max_items);
    let mut empty_streak = 0u32;
    let mut first_page = true;

    loop {
        if !first_page && !run.wait_between_pages().await {
            return Outcome::Cancelled;
        }
        first_page = false;
        if let Some(outcome) = run.checkpoint().await {
            return outcome;
        }

        let next = retry_with_state(&policy, &run.ctx.cancel, &mut *enumerator, |e| {
            with_timeout(timeout, e.next_batch()).boxed()
        })
        .await;
        let mut batch = match next {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(_) if run.ctx.cancel.is_cancelled() => return Outcome::Cancelled,
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "Failed to fetch next page");
                return Outcome::Failed(format!("failed to fetch page: {e}"));
            }
        };

        if batch.is_empty() {
            empty_streak += 1;
            tracing::debug!(task_id = %id, empty_streak, "Page returned no items");
            if empty_streak > snapshot.max_empty_batches {
                return Outcome::Failed(format!(
                    "no items returned in {empty_streak} consecutive pages"
                ));
            }
            run.message("Page returned no items");
            continue;
        }
        empty_streak = 0;

        if max_items > 0 {
            let remaining = max_items.saturating_sub(run.processed);
            if batch.len() as u64 > remaining {
                batch.truncate(remaining as usize);
            }
        }
        let fetched = batch.len() as u64;
        run.message(format!(
            "Fetched {} items, {} so far",
            fetched,
            run.processed + fetched
        ));

        let updated = match download_with_retry(&policy, &run.ctx.cancel, || {
            with_timeout(timeout, backend.materialize(&batch, &destination))
        })
        .await
        {
            Ok(updated) => updated,
            Err(_) if run.ctx.cancel.is_cancelled() => return Outcome::Cancelled,
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "Failed to materialize batch");
                return Outcome::Failed(format!("failed to download batch: {e}"));
            }
        };

        run.processed += fetched;
        record_updated(run, &id, fetched, updated);

        total = capped_total(enumerator.total_hint(), max_items).or(total);
        run.progress(run.processed, total);

        if max_items > 0 && run.processed >= max_items {
            tracing::info!(task_id = %id, max_items, "Reached maximum item count");
            run.message(format!("Reached the limit of {max_items} items"));
            break;
        }
    }

    Outcome::Completed {
        processed: run.processed,
        total,
    }
}

fn record_updated(run: &TaskRun, id: &TaskId, fetched: u64, updated: u64) {
    run.send(crate::orchestrator::dispatch::TaskUpdate::UpdatedItems {
        id: id.clone(),
        count: updated,
    });
    run.message(format!("Updated {updated} of {fetched} items"));
    tracing::debug!(task_id = %id, fetched, updated, "Batch materialized");
}

/// Backend total, limited by `max_items` when one is set
fn capped_total(hint: Option<u64>, max_items: u64) -> Option<u64> {
    hint.map(|total| {
        if max_items > 0 {
            total.min(max_items)
        } else {
            total
        }
    })
}
