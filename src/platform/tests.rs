use super::*;
use crate::backend::{Batch, DestinationConfig, EnumerateRequest, ItemEnumerator};
use crate::error::{BackendError, ConfigInjectionError};
use crate::types::Identity;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone, Copy)]
enum Rederive {
    Derive,
    Fail,
    /// Never returns, like a token endpoint that stopped answering
    Stall,
}

/// Backend that derives a token from the proxy it sees at build and rederive time
struct TokenBackend {
    config: PlatformConfigHandle,
    token: Mutex<String>,
    rederive: Rederive,
}

fn derive_token(config: &PlatformConfigHandle) -> String {
    format!("token-via-{}", config.proxy().unwrap_or_else(|| "direct".into()))
}

#[async_trait]
impl ContentBackend for TokenBackend {
    fn platform(&self) -> &str {
        self.config.platform()
    }

    fn supported_modes(&self) -> Vec<String> {
        vec!["post".into()]
    }

    async fn resolve_identity(&self, _url: &str) -> std::result::Result<Identity, BackendError> {
        Ok(Identity::new(self.token.lock().unwrap().clone(), "id"))
    }

    async fn enumerate(
        &self,
        _request: EnumerateRequest,
    ) -> std::result::Result<Box<dyn ItemEnumerator>, BackendError> {
        Err(BackendError::permanent("not used"))
    }

    async fn materialize(
        &self,
        _batch: &Batch,
        _destination: &DestinationConfig,
    ) -> std::result::Result<u64, BackendError> {
        Ok(0)
    }

    async fn rederive(&self) -> std::result::Result<(), BackendError> {
        match self.rederive {
            Rederive::Derive => {
                *self.token.lock().unwrap() = derive_token(&self.config);
                Ok(())
            }
            Rederive::Fail => Err(BackendError::transient("token endpoint unreachable")),
            Rederive::Stall => std::future::pending().await,
        }
    }
}

fn factory(builds: Arc<AtomicUsize>, rederive: Rederive) -> Arc<dyn BackendFactory> {
    Arc::new(
        move |config: PlatformConfigHandle| -> std::result::Result<Arc<dyn ContentBackend>, BackendError> {
            builds.fetch_add(1, Ordering::SeqCst);
            let token = Mutex::new(derive_token(&config));
            Ok(Arc::new(TokenBackend {
                config,
                token,
                rederive,
            }))
        },
    )
}

fn proxy(address: &str) -> PlatformOverrides {
    PlatformOverrides {
        proxy: Some(address.to_string()),
        credential: None,
    }
}

async fn current_token(registry: &BackendRegistry) -> String {
    registry
        .backend("demo")
        .await
        .unwrap()
        .resolve_identity("x")
        .await
        .unwrap()
        .nickname
}

#[tokio::test]
async fn settings_installed_before_construction_are_used_by_first_build() {
    let registry = Arc::new(BackendRegistry::new());
    let builds = Arc::new(AtomicUsize::new(0));
    registry.register("demo", factory(builds.clone(), Rederive::Derive)).await;
    let injector = ConfigInjector::new(registry.clone());

    let outcome = injector
        .ensure_configured("demo", &proxy("http://p1:1"))
        .await
        .unwrap();

    assert_eq!(outcome, Injection::Installed);
    assert!(!registry.is_instantiated("demo").await, "injection must not build");
    assert_eq!(current_token(&registry).await, "token-via-http://p1:1");
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn live_backend_is_updated_in_place_and_rederived() {
    let registry = Arc::new(BackendRegistry::new());
    let builds = Arc::new(AtomicUsize::new(0));
    registry.register("demo", factory(builds.clone(), Rederive::Derive)).await;
    let injector = ConfigInjector::new(registry.clone());

    assert_eq!(current_token(&registry).await, "token-via-direct");

    let outcome = injector
        .ensure_configured("demo", &proxy("http://p2:2"))
        .await
        .unwrap();

    assert_eq!(outcome, Injection::Updated);
    assert_eq!(
        current_token(&registry).await,
        "token-via-http://p2:2",
        "stale derived token must be recomputed"
    );
    assert_eq!(
        builds.load(Ordering::SeqCst),
        1,
        "the existing instance is reused, not rebuilt"
    );
}

#[tokio::test]
async fn matching_settings_are_unchanged() {
    let registry = Arc::new(BackendRegistry::new());
    registry
        .register("demo", factory(Arc::new(AtomicUsize::new(0)), Rederive::Derive))
        .await;
    let injector = ConfigInjector::new(registry.clone());

    assert_eq!(
        injector
            .ensure_configured("demo", &PlatformOverrides::default())
            .await
            .unwrap(),
        Injection::Unchanged
    );

    injector
        .ensure_configured("demo", &proxy("http://p:1"))
        .await
        .unwrap();
    let generation = registry.settings("demo").await.unwrap().generation;
    assert_eq!(
        injector
            .ensure_configured("demo", &proxy("http://p:1"))
            .await
            .unwrap(),
        Injection::Unchanged
    );
    assert_eq!(registry.settings("demo").await.unwrap().generation, generation);
}

#[tokio::test]
async fn rederive_failure_keeps_new_settings() {
    let registry = Arc::new(BackendRegistry::new());
    registry
        .register("demo", factory(Arc::new(AtomicUsize::new(0)), Rederive::Fail))
        .await;
    let injector = ConfigInjector::new(registry.clone());
    registry.backend("demo").await.unwrap();

    let err = injector
        .ensure_configured("demo", &proxy("http://p3:3"))
        .await
        .unwrap_err();

    assert!(matches!(err, ConfigInjectionError::Rederive { .. }));
    assert_eq!(
        registry.settings("demo").await.unwrap().proxy.as_deref(),
        Some("http://p3:3")
    );
}

#[tokio::test]
async fn stalled_rederive_times_out() {
    let registry = Arc::new(BackendRegistry::new());
    registry
        .register("demo", factory(Arc::new(AtomicUsize::new(0)), Rederive::Stall))
        .await;
    registry.backend("demo").await.unwrap();
    let injector =
        ConfigInjector::new(registry.clone()).rederive_timeout(Duration::from_millis(50));

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        injector.ensure_configured("demo", &proxy("http://p4:4")),
    )
    .await
    .expect("rederive must be bounded by the timeout")
    .unwrap_err();

    match err {
        ConfigInjectionError::Rederive { source, .. } => {
            assert_eq!(source.kind, crate::error::BackendErrorKind::Timeout);
        }
        other => panic!("expected rederive timeout, got {other:?}"),
    }
    assert!(
        registry.is_instantiated("demo").await,
        "the platform stays usable after the timeout"
    );
    registry.backend("demo").await.unwrap();
}

#[tokio::test]
async fn stalled_rederive_holds_up_only_its_own_platform() {
    let registry = Arc::new(BackendRegistry::new());
    registry
        .register("slow", factory(Arc::new(AtomicUsize::new(0)), Rederive::Stall))
        .await;
    registry
        .register("other", factory(Arc::new(AtomicUsize::new(0)), Rederive::Derive))
        .await;
    registry.backend("slow").await.unwrap();
    let injector = ConfigInjector::new(registry.clone()).rederive_timeout(Duration::from_secs(3600));

    let stalled = {
        let injector = injector.clone();
        tokio::spawn(async move { injector.ensure_configured("slow", &proxy("http://p5:5")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), async {
        assert!(registry.contains("slow").await);
        registry.backend("other").await.unwrap();
        injector
            .ensure_configured("other", &proxy("http://p6:6"))
            .await
            .unwrap();
        registry.settings("slow").await.unwrap();
    })
    .await
    .expect("other platforms must not wait for a stalled rederive");

    assert!(
        tokio::time::timeout(Duration::from_millis(100), registry.backend("slow"))
            .await
            .is_err(),
        "the stalled platform's backend is not handed out mid-rederive"
    );
    stalled.abort();
}

#[tokio::test]
async fn unknown_platform_is_reported() {
    let registry = Arc::new(BackendRegistry::new());
    let injector = ConfigInjector::new(registry.clone());

    assert!(matches!(
        injector
            .ensure_configured("nope", &PlatformOverrides::default())
            .await,
        Err(ConfigInjectionError::Write { .. })
    ));
    assert!(matches!(
        registry.backend("nope").await,
        Err(Error::UnknownPlatform(_))
    ));
}

#[tokio::test]
async fn replacing_factory_drops_instance() {
    let registry = BackendRegistry::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    registry.register("demo", factory(first.clone(), Rederive::Derive)).await;
    registry.backend("demo").await.unwrap();

    registry.register("demo", factory(second.clone(), Rederive::Derive)).await;
    assert!(!registry.is_instantiated("demo").await);
    registry.backend("demo").await.unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(registry.platforms().await, vec!["demo".to_string()]);
}

#[test]
fn overrides_follow_snapshot_proxy_and_credentials() {
    let mut config = crate::config::Config::default();
    config.network.proxy.address = "http://127.0.0.1:7890".into();
    config
        .network
        .credentials
        .insert("demo".into(), "sid=abc".into());

    let disabled = PlatformOverrides::from_snapshot("demo", &config.snapshot().unwrap());
    assert_eq!(disabled.proxy, None, "disabled proxy is not injected");
    assert_eq!(disabled.credential.as_deref(), Some("sid=abc"));

    config.network.proxy.enabled = true;
    let enabled = PlatformOverrides::from_snapshot("other", &config.snapshot().unwrap());
    assert_eq!(enabled.proxy.as_deref(), Some("http://127.0.0.1:7890"));
    assert_eq!(enabled.credential, None);
}
