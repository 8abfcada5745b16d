//! Scripted demo backend

use async_trait::async_trait;
use media_dl::{
    BackendError, BackendFactory, Batch, ContentBackend, DestinationConfig, EnumerateRequest,
    Identity, Item, ItemEnumerator, PlatformConfigHandle,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// What the demo backend returns
#[derive(Clone)]
pub struct DemoScript {
    /// `None` makes identity lookup fail with not-found
    pub identity: Option<Identity>,
    /// Items available in total (also reported as the total hint)
    pub total: u64,
    /// Items per page
    pub page_size: u64,
    /// Permanent materialize failure message
    pub fail_materialize: Option<String>,
    /// When set, each `materialize` call waits for one permit
    pub gate: Option<Arc<Semaphore>>,
    /// `rederive` never returns
    pub stall_rederive: bool,
}

impl Default for DemoScript {
    fn default() -> Self {
        Self {
            identity: Some(Identity::new("Alice", "u123")),
            total: 100,
            page_size: 20,
            fail_materialize: None,
            gate: None,
            stall_rederive: false,
        }
    }
}

/// Observations shared between a factory and the test
#[derive(Clone, Default)]
pub struct DemoProbe {
    /// Number of backend constructions
    pub builds: Arc<AtomicUsize>,
    /// Derived proxy value seen by every backend call, in call order
    pub observed: Arc<Mutex<Vec<Option<String>>>>,
}

impl DemoProbe {
    /// Backend constructions so far
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Derived proxy values observed so far
    pub fn observed(&self) -> Vec<Option<String>> {
        self.observed.lock().unwrap().clone()
    }
}

/// Backend serving `total` numbered items in pages of `page_size`
///
/// The proxy is turned into a "derived" value once at construction and again on
/// `rederive`, so tests can tell stale derived state from fresh state.
pub struct DemoBackend {
    script: DemoScript,
    config: PlatformConfigHandle,
    derived_proxy: Mutex<Option<String>>,
    probe: DemoProbe,
}

impl DemoBackend {
    fn observe(&self) {
        let derived = self.derived_proxy.lock().unwrap().clone();
        self.probe.observed.lock().unwrap().push(derived);
    }
}

fn derive(proxy: Option<String>) -> Option<String> {
    proxy.map(|p| format!("derived:{p}"))
}

struct DemoPages {
    next: u64,
    total: u64,
    page_size: u64,
}

#[async_trait]
impl ItemEnumerator for DemoPages {
    async fn next_batch(&mut self) -> Result<Option<Batch>, BackendError> {
        if self.next >= self.total {
            return Ok(None);
        }
        let end = (self.next + self.page_size).min(self.total);
        let items = (self.next..end)
            .map(|n| Item::new(format!("item-{n}")))
            .collect();
        self.next = end;
        Ok(Some(Batch::new(items)))
    }

    fn total_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}

#[async_trait]
impl ContentBackend for DemoBackend {
    fn platform(&self) -> &str {
        self.config.platform()
    }

    fn supported_modes(&self) -> Vec<String> {
        ["one", "post", "list"].iter().map(|m| m.to_string()).collect()
    }

    async fn resolve_identity(&self, _url: &str) -> Result<Identity, BackendError> {
        self.observe();
        self.script
            .identity
            .clone()
            .ok_or_else(|| BackendError::not_found("no such account"))
    }

    async fn enumerate(
        &self,
        _request: EnumerateRequest,
    ) -> Result<Box<dyn ItemEnumerator>, BackendError> {
        self.observe();
        Ok(Box::new(DemoPages {
            next: 0,
            total: self.script.total,
            page_size: self.script.page_size,
        }))
    }

    async fn materialize(
        &self,
        batch: &Batch,
        _destination: &DestinationConfig,
    ) -> Result<u64, BackendError> {
        self.observe();
        if let Some(gate) = &self.script.gate {
            gate.acquire()
                .await
                .map_err(|_| BackendError::permanent("gate closed"))?
                .forget();
        }
        match &self.script.fail_materialize {
            Some(message) => Err(BackendError::permanent(message.clone())),
            None => Ok(batch.len() as u64),
        }
    }

    async fn rederive(&self) -> Result<(), BackendError> {
        if self.script.stall_rederive {
            std::future::pending::<()>().await;
        }
        *self.derived_proxy.lock().unwrap() = derive(self.config.proxy());
        Ok(())
    }
}

/// Factory building [`DemoBackend`]s for `script`, plus the probe observing them
pub fn demo_factory(script: DemoScript) -> (Arc<dyn BackendFactory>, DemoProbe) {
    let probe = DemoProbe::default();
    let factory_probe = probe.clone();
    let factory = move |config: PlatformConfigHandle| -> Result<Arc<dyn ContentBackend>, BackendError> {
        factory_probe.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(DemoBackend {
            script: script.clone(),
            derived_proxy: Mutex::new(derive(config.proxy())),
            config,
            probe: factory_probe.clone(),
        }))
    };
    (Arc::new(factory), probe)
}
