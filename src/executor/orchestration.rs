//! Executor orchestration: the top-level lifecycle of a single task.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::backend::{ContentBackend, EnumerateRequest};
use crate::error::Error;
use crate::history::NewRecord;
use crate::orchestrator::dispatch::TaskUpdate;
use crate::platform::PlatformOverrides;
use crate::resolver::{Resolution, UrlResolver};
use crate::retry::{download_with_retry, with_timeout};
use crate::types::Status;

use super::batching::download_batches;
use super::context::{ExecutorContext, TaskRun};
use super::finalization::finalize_task;
use super::mode::choose_mode;

/// How the pipeline ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed { processed: u64, total: Option<u64> },
    Failed(String),
    Cancelled,
}

/// Run one task to a terminal status
///
/// Phases:
/// 1. Wait for an execution slot (cancellable while `Pending`)
/// 2. Apply platform settings and resolve the input (`Resolving`)
/// 3. Enter `Downloading` and pick the retrieval mode
/// 4. Start enumeration and process batches until exhausted, cancelled or failed
/// 5. Finalize: terminal status, history, `task_finished`
///
/// Nothing escapes this function: errors and panics become a `Failed` task.
pub(crate) async fn run_task(ctx: ExecutorContext) {
    let mut run = TaskRun::new(ctx);

    let result = AssertUnwindSafe(run_pipeline(&mut run))
        .catch_unwind()
        .await;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            tracing::error!(task_id = %run.ctx.id, panic = %reason, "Executor panicked");
            Outcome::Failed(format!("internal error: {reason}"))
        }
    };

    finalize_task(run, outcome).await;
}

async fn run_pipeline(run: &mut TaskRun) -> Outcome {
    // Phase 1: admission
    if let Some(outcome) = run.acquire_slot().await {
        return outcome;
    }

    // Phase 2: resolution
    run.transition(Status::Resolving);
    let backend = tokio::select! {
        _ = run.ctx.cancel.cancelled() => return Outcome::Cancelled,
        backend = prepare_backend(run) => backend,
    };
    let resolution = resolve_input(run, &backend).await;
    if run.ctx.cancel.is_cancelled() {
        return Outcome::Cancelled;
    }
    apply_resolution(run, &resolution);
    record_history(run, &resolution).await;

    // Phase 3: mode selection
    run.transition(Status::Downloading);
    let backend = match backend {
        Ok(backend) => backend,
        Err(e) => return Outcome::Failed(format!("backend unavailable: {e}")),
    };
    let choice = match choose_mode(backend.as_ref(), &resolution.resolved_url, &run.ctx.mode) {
        Ok(choice) => choice,
        Err(e) => return Outcome::Failed(e.to_string()),
    };
    run.mode = choice.mode.clone();
    if let Some(requested) = &choice.corrected_from {
        tracing::warn!(
            task_id = %run.ctx.id,
            requested = %requested,
            corrected = %choice.mode,
            url = %resolution.resolved_url,
            "Retrieval mode does not match URL, substituting"
        );
        run.message(format!(
            "Mode '{}' does not match this link, using '{}' instead",
            requested, choice.mode
        ));
    }

    // Phase 4: enumeration
    let snapshot = Arc::clone(&run.ctx.snapshot);
    let request = EnumerateRequest {
        mode: choice.mode,
        url: resolution.resolved_url.clone(),
        identity: resolution.identity.clone(),
        range: snapshot.cursor_range(),
        page_size: snapshot.page_size,
    };
    let enumerator = match download_with_retry(&snapshot.retry_policy(), &run.ctx.cancel, || {
        with_timeout(snapshot.request_timeout, backend.enumerate(request.clone()))
    })
    .await
    {
        Ok(enumerator) => enumerator,
        Err(_) if run.ctx.cancel.is_cancelled() => return Outcome::Cancelled,
        Err(e) => return Outcome::Failed(format!("failed to start enumeration: {e}")),
    };

    download_batches(run, backend.as_ref(), enumerator).await
}

/// Install this task's platform settings, then obtain the shared backend
///
/// Injection failures (including a `rederive` that times out) are logged and
/// never stop the task. The caller races this against cancellation.
async fn prepare_backend(run: &TaskRun) -> Result<Arc<dyn ContentBackend>, Error> {
    let ctx = &run.ctx;
    let overrides = PlatformOverrides::from_snapshot(&ctx.platform, &ctx.snapshot);
    match ctx.injector.ensure_configured(&ctx.platform, &overrides).await {
        Ok(injection) => {
            tracing::debug!(task_id = %ctx.id, platform = %ctx.platform, ?injection, "Platform settings applied");
        }
        Err(e) => {
            tracing::warn!(
                task_id = %ctx.id,
                platform = %ctx.platform,
                error = %e,
                "Failed to apply platform settings, continuing with current settings"
            );
        }
    }

    let backend = ctx.backends.backend(&ctx.platform).await;
    if let Err(e) = &backend {
        tracing::error!(task_id = %ctx.id, platform = %ctx.platform, error = %e, "Backend unavailable");
    }
    backend
}

async fn resolve_input(
    run: &TaskRun,
    backend: &Result<Arc<dyn ContentBackend>, Error>,
) -> Resolution {
    let ctx = &run.ctx;
    let resolver = match backend {
        Ok(backend) => UrlResolver::new(Arc::clone(backend), ctx.snapshot.request_timeout),
        Err(_) => UrlResolver::url_only(),
    };
    let mut resolution = resolver
        .spawn(ctx.original_input.clone(), ctx.cancel.child_token())
        .wait()
        .await;
    if let Err(e) = backend {
        resolution.error = Some(format!("backend unavailable: {e}"));
    }
    resolution
}

fn apply_resolution(run: &TaskRun, resolution: &Resolution) {
    let id = run.ctx.id.clone();
    run.send(TaskUpdate::ResolvedUrl {
        id: id.clone(),
        url: resolution.resolved_url.clone(),
    });
    if let Some(identity) = &resolution.identity {
        tracing::info!(
            task_id = %id,
            nickname = %identity.nickname,
            external_id = %identity.external_id,
            "Identity resolved"
        );
        run.send(TaskUpdate::Identity {
            id,
            identity: identity.clone(),
        });
    }
    if let Some(error) = &resolution.error {
        tracing::warn!(task_id = %run.ctx.id, error = %error, "Resolution incomplete, continuing with URL");
        run.message(format!("Could not fully resolve input: {error}"));
    }
}

async fn record_history(run: &mut TaskRun, resolution: &Resolution) {
    let Some(history) = run.ctx.history.clone() else {
        return;
    };
    let record = NewRecord {
        platform: run.ctx.platform.clone(),
        url: resolution.resolved_url.clone(),
        status: Status::Downloading,
        item_count: 0,
        mode: run.ctx.mode.clone(),
        identity: resolution.identity.clone(),
    };
    match history.add_record(record).await {
        Ok(record_id) => run.history_record = Some(record_id),
        Err(e) => {
            tracing::warn!(task_id = %run.ctx.id, error = %e, "Failed to add history record");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "executor panicked".to_string()
    }
}
