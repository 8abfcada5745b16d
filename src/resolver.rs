//! URL and identity resolution
//!
//! Turns raw user input (a bare URL or a pasted share text) into a canonical URL
//! and, when the backend can look it up, the identity behind it. Resolution runs
//! in its own tokio task and always completes with a [`Resolution`]: failures are
//! reported through [`Resolution::error`] and never propagate.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::backend::ContentBackend;
use crate::retry::with_timeout;
use crate::types::Identity;

/// Outcome of resolving one input
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Canonical URL, or the best-effort fallback on failure
    pub resolved_url: String,
    /// Resolved identity (None when lookup failed or found nothing)
    pub identity: Option<Identity>,
    /// Why resolution was incomplete
    pub error: Option<String>,
}

impl Resolution {
    fn url_only(url: String, error: impl Into<String>) -> Self {
        Self {
            resolved_url: url,
            identity: None,
            error: Some(error.into()),
        }
    }
}

#[allow(clippy::expect_used)]
fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Stops at whitespace and the quotes/brackets share texts wrap links in
        Regex::new(r#"https?://[^\s"'<>()\[\]{}，。！？、“”]+"#).expect("URL pattern is valid")
    })
}

/// Extract the first valid http(s) URL from arbitrary text
///
/// Trailing punctuation is trimmed and the candidate must parse as a URL with a host.
pub fn extract_valid_url(input: &str) -> Option<String> {
    url_pattern().find_iter(input).find_map(|m| {
        let candidate = m
            .as_str()
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?'));
        match url::Url::parse(candidate) {
            Ok(parsed) if parsed.host_str().is_some_and(|h| !h.is_empty()) => {
                Some(candidate.to_string())
            }
            _ => None,
        }
    })
}

/// Completion handle of a spawned resolution
pub struct ResolveHandle {
    rx: oneshot::Receiver<Resolution>,
    fallback_url: String,
}

impl ResolveHandle {
    /// Wait for the resolution
    ///
    /// A resolver task that died without reporting yields a URL-only resolution.
    pub async fn wait(self) -> Resolution {
        match self.rx.await {
            Ok(resolution) => resolution,
            Err(_) => Resolution::url_only(self.fallback_url, "resolver terminated unexpectedly"),
        }
    }
}

/// Resolves raw input against one platform's backend
pub struct UrlResolver {
    backend: Option<Arc<dyn ContentBackend>>,
    request_timeout: Duration,
}

impl UrlResolver {
    /// Resolver that looks identities up through `backend`
    pub fn new(backend: Arc<dyn ContentBackend>, request_timeout: Duration) -> Self {
        Self {
            backend: Some(backend),
            request_timeout,
        }
    }

    /// Resolver for a platform whose backend is unavailable (URL extraction only)
    pub fn url_only() -> Self {
        Self {
            backend: None,
            request_timeout: Duration::ZERO,
        }
    }

    /// Run [`resolve`](Self::resolve) in its own task
    ///
    /// The handle yields exactly one [`Resolution`], also when `cancel` fires.
    pub fn spawn(self, raw_input: impl Into<String>, cancel: CancellationToken) -> ResolveHandle {
        let raw_input = raw_input.into();
        let fallback = fallback_url(&raw_input);
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let resolution = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    Resolution::url_only(fallback_url(&raw_input), "cancelled")
                }
                resolution = self.resolve(&raw_input) => resolution,
            };
            // Receiver gone means the executor stopped waiting
            let _ = tx.send(resolution);
        });

        ResolveHandle {
            rx,
            fallback_url: fallback,
        }
    }

    /// Resolve `raw_input` to a canonical URL and identity
    pub async fn resolve(&self, raw_input: &str) -> Resolution {
        let url = fallback_url(raw_input);

        let Some(backend) = &self.backend else {
            return Resolution::url_only(url, "no content backend available");
        };

        match with_timeout(self.request_timeout, backend.resolve_identity(&url)).await {
            Ok(identity) if identity.is_empty() => Resolution {
                resolved_url: url,
                identity: None,
                error: None,
            },
            Ok(identity) => Resolution {
                resolved_url: url,
                identity: Some(identity),
                error: None,
            },
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Identity resolution failed");
                Resolution::url_only(url, e.to_string())
            }
        }
    }
}

fn fallback_url(raw_input: &str) -> String {
    extract_valid_url(raw_input).unwrap_or_else(|| raw_input.trim().to_string())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Batch, DestinationConfig, EnumerateRequest, ItemEnumerator};
    use crate::error::BackendError;
    use async_trait::async_trait;

    enum Lookup {
        Found,
        Missing,
        Hang,
        Panic,
    }

    struct LookupBackend(Lookup);

    #[async_trait]
    impl ContentBackend for LookupBackend {
        fn platform(&self) -> &str {
            "demo"
        }

        fn supported_modes(&self) -> Vec<String> {
            vec!["post".into()]
        }

        async fn resolve_identity(&self, url: &str) -> Result<Identity, BackendError> {
            match self.0 {
                Lookup::Found => Ok(Identity::new("Alice", format!("id:{url}"))),
                Lookup::Missing => Err(BackendError::not_found("no such user")),
                Lookup::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Identity::default())
                }
                Lookup::Panic => panic!("backend bug"),
            }
        }

        async fn enumerate(
            &self,
            _request: EnumerateRequest,
        ) -> Result<Box<dyn ItemEnumerator>, BackendError> {
            Err(BackendError::permanent("unused"))
        }

        async fn materialize(
            &self,
            _batch: &Batch,
            _destination: &DestinationConfig,
        ) -> Result<u64, BackendError> {
            Ok(0)
        }
    }

    fn resolver(lookup: Lookup, timeout: Duration) -> UrlResolver {
        UrlResolver::new(Arc::new(LookupBackend(lookup)), timeout)
    }

    #[test]
    fn extracts_url_from_share_text() {
        let text = "7.94 复制打开抖音，看看【Alice的作品】 https://v.douyin.com/iAbCdEf/ 02/13 Mwm:/";
        assert_eq!(
            extract_valid_url(text).as_deref(),
            Some("https://v.douyin.com/iAbCdEf/")
        );
    }

    #[test]
    fn trailing_punctuation_is_trimmed() {
        assert_eq!(
            extract_valid_url("see https://site/x.").as_deref(),
            Some("https://site/x")
        );
        assert_eq!(extract_valid_url("no link here"), None);
        assert_eq!(extract_valid_url("http://"), None);
    }

    #[tokio::test]
    async fn successful_lookup_returns_identity() {
        let resolution = resolver(Lookup::Found, Duration::from_secs(1))
            .spawn("  https://site/x ", CancellationToken::new())
            .wait()
            .await;

        assert_eq!(resolution.resolved_url, "https://site/x");
        assert_eq!(
            resolution.identity,
            Some(Identity::new("Alice", "id:https://site/x"))
        );
        assert!(resolution.error.is_none());
    }

    #[tokio::test]
    async fn lookup_failure_keeps_extracted_url() {
        let resolution = resolver(Lookup::Missing, Duration::from_secs(1))
            .resolve("share: https://site/u/1 now")
            .await;

        assert_eq!(resolution.resolved_url, "https://site/u/1");
        assert!(resolution.identity.is_none(), "identity stays empty on failure");
        assert_eq!(resolution.error.as_deref(), Some("no such user"));
    }

    #[tokio::test]
    async fn unparseable_input_falls_back_to_raw_text() {
        let resolution = UrlResolver::url_only().resolve(" not a url ").await;
        assert_eq!(resolution.resolved_url, "not a url");
        assert!(resolution.error.is_some());
    }

    #[tokio::test]
    async fn slow_lookup_times_out() {
        let resolution = resolver(Lookup::Hang, Duration::from_millis(20))
            .spawn("https://site/x", CancellationToken::new())
            .wait()
            .await;

        assert!(
            resolution.error.unwrap().contains("timed out"),
            "per-request timeout must bound identity lookup"
        );
    }

    #[tokio::test]
    async fn cancelled_resolution_still_completes() {
        let cancel = CancellationToken::new();
        let handle = resolver(Lookup::Hang, Duration::from_secs(60)).spawn("https://site/x", cancel.clone());
        cancel.cancel();

        let resolution = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("cancelled resolver must still report");
        assert_eq!(resolution.error.as_deref(), Some("cancelled"));
        assert_eq!(resolution.resolved_url, "https://site/x");
    }

    #[tokio::test]
    async fn panicking_backend_yields_error_resolution() {
        let resolution = resolver(Lookup::Panic, Duration::from_secs(1))
            .spawn("https://site/x", CancellationToken::new())
            .wait()
            .await;

        assert_eq!(resolution.resolved_url, "https://site/x");
        assert!(resolution.error.is_some());
    }
}
