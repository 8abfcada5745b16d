//! # media-dl
//!
//! Download task orchestration core for media platforms.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Backend-agnostic** - Platforms plug in through the [`ContentBackend`] trait
//! - **Isolated** - Every task runs on its own Tokio task; one stalled or failing
//!   task never blocks another
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, Orchestrator, StartRequest};
//! use std::sync::Arc;
//! # use media_dl::{BackendError, ContentBackend, PlatformConfigHandle};
//! # fn build_backend(_config: PlatformConfigHandle) -> Result<Arc<dyn ContentBackend>, BackendError> {
//! #     unimplemented!()
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(Config::default()).await?;
//!     orchestrator
//!         .register_backend("douyin", Arc::new(build_backend))
//!         .await;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let snapshot = orchestrator.get_config().snapshot()?;
//!     orchestrator
//!         .start(StartRequest::new("t1", "douyin", "post", "https://site/x", snapshot))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Content backend collaborator contract
pub mod backend;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Per-task download pipeline
mod executor;
/// Download history collaborator
pub mod history;
/// Task orchestration (decomposed into focused submodules)
pub mod orchestrator;
/// Backend registry and platform settings injection
pub mod platform;
/// In-memory task store
pub mod registry;
/// Input URL and identity resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use backend::{
    BackendFactory, Batch, ContentBackend, CursorRange, DestinationConfig, EnumerateRequest,
    Item, ItemEnumerator, UrlKind,
};
pub use config::{Config, ConfigSnapshot};
pub use error::{
    BackendError, BackendErrorKind, ConfigInjectionError, Error, Result, TaskError,
};
pub use history::{HistoryRecord, HistoryStore, MemoryHistory, NewRecord, RecordUpdate};
pub use orchestrator::{Orchestrator, StartRequest};
pub use platform::{
    BackendRegistry, ConfigInjector, Injection, PlatformConfigHandle, PlatformOverrides,
    PlatformSettings,
};
pub use registry::TaskRegistry;
pub use resolver::{Resolution, UrlResolver};
pub use types::{Event, Identity, Progress, Status, Task, TaskId, TaskSpec, TaskStats};

/// Helper function to run the orchestrator with graceful signal handling.
///
/// Waits for a termination signal and then calls the orchestrator's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl::{Orchestrator, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Orchestrator::new(Config::default()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(orchestrator).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(orchestrator: Orchestrator) -> Result<()> {
    wait_for_signal().await;
    orchestrator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
