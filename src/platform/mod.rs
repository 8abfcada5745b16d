//! Platform settings and backend instances
//!
//! Each platform has one mutable settings cell ([`PlatformSettings`]) and at most
//! one shared backend instance, built lazily by its [`BackendFactory`]. Backends
//! only ever see a read-only [`PlatformConfigHandle`]; the
//! [`ConfigInjector`](injector::ConfigInjector) is the only writer.

mod injector;

pub use injector::{ConfigInjector, Injection};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::backend::{BackendFactory, ContentBackend};
use crate::config::ConfigSnapshot;
use crate::error::{Error, Result};

/// Settings a backend derives its client state from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlatformSettings {
    /// Outbound proxy URL
    pub proxy: Option<String>,
    /// Credential string (e.g. cookies)
    pub credential: Option<String>,
    /// Incremented on every change
    pub generation: u64,
}

impl PlatformSettings {
    fn matches(&self, overrides: &PlatformOverrides) -> bool {
        self.proxy == overrides.proxy && self.credential == overrides.credential
    }

    fn apply(&mut self, overrides: &PlatformOverrides) {
        self.proxy = overrides.proxy.clone();
        self.credential = overrides.credential.clone();
        self.generation += 1;
    }
}

/// Desired per-platform settings for one task
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlatformOverrides {
    /// Outbound proxy URL
    pub proxy: Option<String>,
    /// Credential string
    pub credential: Option<String>,
}

impl PlatformOverrides {
    /// Extract the overrides for `platform` from a task's snapshot
    pub fn from_snapshot(platform: &str, snapshot: &ConfigSnapshot) -> Self {
        Self {
            proxy: snapshot.proxy.effective().map(str::to_string),
            credential: snapshot.credential_for(platform).map(str::to_string),
        }
    }
}

/// Read-only view of a platform's settings cell, handed to backends
#[derive(Clone, Debug)]
pub struct PlatformConfigHandle {
    platform: String,
    cell: Arc<RwLock<PlatformSettings>>,
}

impl PlatformConfigHandle {
    /// Platform name
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Copy of the settings currently in effect
    pub fn current(&self) -> PlatformSettings {
        match self.cell.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Proxy currently in effect
    pub fn proxy(&self) -> Option<String> {
        self.current().proxy
    }

    /// Credential currently in effect
    pub fn credential(&self) -> Option<String> {
        self.current().credential
    }
}

/// Serializes construction and injection for one platform
type PlatformGate = Arc<tokio::sync::Mutex<()>>;

struct PlatformSlot {
    factory: Arc<dyn BackendFactory>,
    settings: Arc<RwLock<PlatformSettings>>,
    instance: Option<Arc<dyn ContentBackend>>,
    gate: PlatformGate,
}

impl PlatformSlot {
    fn handle(&self, platform: &str) -> PlatformConfigHandle {
        PlatformConfigHandle {
            platform: platform.to_string(),
            cell: Arc::clone(&self.settings),
        }
    }
}

/// Registered backend factories and their lazily built, shared instances
///
/// Construction and settings injection for a platform take that platform's
/// gate, so a backend is never built or handed out halfway through an
/// injection. The map lock itself is never held across backend code.
#[derive(Default)]
pub struct BackendRegistry {
    slots: tokio::sync::Mutex<HashMap<String, PlatformSlot>>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for a platform
    ///
    /// Replacing a factory drops any existing instance; settings are kept.
    pub async fn register(&self, platform: impl Into<String>, factory: Arc<dyn BackendFactory>) {
        let platform = platform.into();
        let mut slots = self.slots.lock().await;
        match slots.get_mut(&platform) {
            Some(slot) => {
                slot.factory = factory;
                slot.instance = None;
            }
            None => {
                slots.insert(
                    platform.clone(),
                    PlatformSlot {
                        factory,
                        settings: Arc::new(RwLock::new(PlatformSettings::default())),
                        instance: None,
                        gate: PlatformGate::default(),
                    },
                );
            }
        }
        tracing::debug!(platform = %platform, "Registered backend factory");
    }

    /// Whether a factory is registered for `platform`
    pub async fn contains(&self, platform: &str) -> bool {
        self.slots.lock().await.contains_key(platform)
    }

    /// Registered platform names, sorted
    pub async fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the platform's backend has been constructed
    pub async fn is_instantiated(&self, platform: &str) -> bool {
        self.slots
            .lock()
            .await
            .get(platform)
            .is_some_and(|slot| slot.instance.is_some())
    }

    /// Settings currently in effect for `platform`
    pub async fn settings(&self, platform: &str) -> Option<PlatformSettings> {
        let slots = self.slots.lock().await;
        slots.get(platform).map(|slot| slot.handle(platform).current())
    }

    /// Shared backend for `platform`, constructing it on first use
    ///
    /// Waits while an injection for the same platform is in progress.
    pub async fn backend(&self, platform: &str) -> Result<Arc<dyn ContentBackend>> {
        let gate = self
            .gate(platform)
            .await
            .ok_or_else(|| Error::UnknownPlatform(platform.to_string()))?;
        let _gate = gate.lock().await;

        let mut slots = self.slots.lock().await;
        let slot = slots
            .get_mut(platform)
            .ok_or_else(|| Error::UnknownPlatform(platform.to_string()))?;

        if let Some(instance) = &slot.instance {
            return Ok(Arc::clone(instance));
        }

        let instance = slot.factory.build(slot.handle(platform))?;
        tracing::info!(platform = %platform, "Constructed content backend");
        slot.instance = Some(Arc::clone(&instance));
        Ok(instance)
    }

    async fn gate(&self, platform: &str) -> Option<PlatformGate> {
        self.slots
            .lock()
            .await
            .get(platform)
            .map(|slot| Arc::clone(&slot.gate))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
