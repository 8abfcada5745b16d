//! Shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Result;

use super::Orchestrator;
use super::dispatch::Command;

impl Orchestrator {
    /// Gracefully shut down the orchestrator
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new tasks
    /// 2. Cancels every task (pending tasks leave the admission queue immediately)
    /// 3. Waits up to `orchestrator.shutdown_timeout` for executors to exit
    /// 4. Emits [`Event::Shutdown`](crate::Event::Shutdown) after all task events
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.accepting_new.swap(false, Ordering::SeqCst) {
            tracing::debug!("Shutdown already performed");
            return Ok(());
        }
        tracing::info!("Initiating graceful shutdown");

        let active_count = self.active.lock().await.len();
        self.shutdown_token.cancel();
        tracing::info!(active_count, "Signaled cancellation to all tasks");

        let timeout = self.config.orchestrator.shutdown_timeout;
        match tokio::time::timeout(timeout, self.wait_for_active_tasks()).await {
            Ok(()) => {
                tracing::info!("All tasks stopped");
            }
            Err(_) => {
                let remaining = self.list_active().await;
                tracing::warn!(
                    remaining = remaining.len(),
                    "Timeout waiting for tasks to stop, proceeding with shutdown"
                );
            }
        }

        // Queued behind every update the executors sent
        if self.commands.send(Command::Shutdown).is_err() {
            tracing::debug!("Dispatcher already stopped");
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_tasks(&self) {
        loop {
            let active_count = self.active.lock().await.len();
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "Waiting for active tasks to stop");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
