//! Per-platform settings injection
//!
//! Backends compute derived secrets from their settings when they are built. If
//! settings arrive after construction, the live instance must be told to
//! recompute them, otherwise it keeps using values derived from stale settings.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigInjectionError;
use crate::retry::with_timeout;

use super::{BackendRegistry, PlatformOverrides};

/// Bound on a live backend's `rederive` unless configured otherwise
const DEFAULT_REDERIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Which injection case applied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Injection {
    /// Backend not built yet; its first construction will use the new settings
    Installed,
    /// Backend already built; settings changed in place and the backend re-derived
    Updated,
    /// Settings already matched
    Unchanged,
}

/// The only writer of per-platform settings
#[derive(Clone)]
pub struct ConfigInjector {
    backends: Arc<BackendRegistry>,
    rederive_timeout: Duration,
}

impl ConfigInjector {
    /// Create an injector over a backend registry
    pub fn new(backends: Arc<BackendRegistry>) -> Self {
        Self {
            backends,
            rederive_timeout: DEFAULT_REDERIVE_TIMEOUT,
        }
    }

    /// Bound each `rederive` call by `timeout`
    pub fn rederive_timeout(mut self, timeout: Duration) -> Self {
        self.rederive_timeout = timeout;
        self
    }

    /// Make `overrides` the settings in effect for `platform`
    ///
    /// Must be called before a task for `platform` obtains its backend. Only
    /// this platform is held up while a live backend re-derives; other
    /// platforms proceed. On error the settings that were in effect before
    /// remain in effect, except for [`ConfigInjectionError::Rederive`] (failure
    /// or timeout) where the settings were updated but the backend could not
    /// refresh its derived values.
    pub async fn ensure_configured(
        &self,
        platform: &str,
        overrides: &PlatformOverrides,
    ) -> Result<Injection, ConfigInjectionError> {
        let unregistered = || ConfigInjectionError::Write {
            platform: platform.to_string(),
            reason: "no backend registered".to_string(),
        };
        let gate = self.backends.gate(platform).await.ok_or_else(unregistered)?;
        let _gate = gate.lock().await;

        let live = {
            let slots = self.backends.slots.lock().await;
            let slot = slots.get(platform).ok_or_else(unregistered)?;
            let mut settings =
                slot.settings
                    .write()
                    .map_err(|_| ConfigInjectionError::Write {
                        platform: platform.to_string(),
                        reason: "settings lock poisoned".to_string(),
                    })?;
            if settings.matches(overrides) {
                return Ok(Injection::Unchanged);
            }
            settings.apply(overrides);
            slot.instance.clone()
        };

        let Some(backend) = live else {
            tracing::debug!(platform = %platform, "Installed settings before backend construction");
            return Ok(Injection::Installed);
        };

        // The gate stays held so no task of this platform obtains the backend mid-rederive
        with_timeout(self.rederive_timeout, backend.rederive())
            .await
            .map_err(|source| ConfigInjectionError::Rederive {
                platform: platform.to_string(),
                source,
            })?;
        tracing::info!(platform = %platform, "Updated settings of live backend");
        Ok(Injection::Updated)
    }
}
