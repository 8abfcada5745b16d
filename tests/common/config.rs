//! Test configuration and orchestrator construction

use media_dl::{Config, Orchestrator, StartRequest};
use std::time::Duration;

use super::fixtures::{DemoProbe, DemoScript, demo_factory};

/// Default config with fast retries and a short shutdown timeout
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config.retry.jitter = false;
    config.orchestrator.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Orchestrator with a demo backend registered under `"demo"`
pub async fn demo_orchestrator(script: DemoScript) -> (Orchestrator, DemoProbe) {
    demo_orchestrator_with(test_config(), script).await
}

/// Like [`demo_orchestrator`] with a custom config
pub async fn demo_orchestrator_with(config: Config, script: DemoScript) -> (Orchestrator, DemoProbe) {
    let orchestrator = Orchestrator::new(config)
        .await
        .expect("test config is valid");
    let (factory, probe) = demo_factory(script);
    orchestrator.register_backend("demo", factory).await;
    (orchestrator, probe)
}

/// Start request for the demo platform using the orchestrator's global config
pub fn demo_request(orchestrator: &Orchestrator, id: &str, input: &str) -> StartRequest {
    let snapshot = orchestrator
        .get_config()
        .snapshot()
        .expect("test config is valid");
    StartRequest::new(id, "demo", "list", input, snapshot)
}
