//! Content backend contract
//!
//! A content backend is the per-platform collaborator that turns a canonical URL
//! into an identity, enumerates that identity's items page by page, and writes
//! batches of items to disk. The executor owns retry, timeout and cancellation
//! policy; backends only report failures as [`BackendError`] with a retryable flag.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::BackendError;
use crate::platform::PlatformConfigHandle;
use crate::types::Identity;

pub use crate::config::{CursorRange, DestinationConfig};

/// Apparent type of a URL, as classified by its backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UrlKind {
    /// Points at one item (a single video, post, ...)
    SingleItem,
    /// Points at a paginated listing (an account's posts, ...)
    Listing,
    /// Points at content served by a dedicated mode (mix, live, ...)
    Special(String),
    /// Type could not be determined
    Unknown,
}

/// One enumerated content item
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Platform-side item id
    pub id: String,
    /// Description or title
    pub title: String,
    /// Publication time in Unix milliseconds, if known
    pub published_at: Option<i64>,
    /// Media URLs to materialize
    pub media_urls: Vec<String>,
}

impl Item {
    /// Create an item with only an id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// One page of enumerated items
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    /// Items on this page
    pub items: Vec<Item>,
}

impl Batch {
    /// Wrap a page of items
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the page carried no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keep at most `len` items
    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }
}

/// Parameters for starting an enumeration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumerateRequest {
    /// Retrieval mode (after correction)
    pub mode: String,
    /// Canonical URL
    pub url: String,
    /// Resolved identity, if any
    pub identity: Option<Identity>,
    /// Publication-time window
    pub range: CursorRange,
    /// Items requested per page
    pub page_size: u32,
}

/// A finite, non-restartable sequence of batches
///
/// The enumerator owns its cursor. A failed [`next_batch`](Self::next_batch) must
/// leave the cursor in place so the same page can be requested again.
#[async_trait]
pub trait ItemEnumerator: Send {
    /// Fetch the next page, or `None` once the sequence is exhausted
    async fn next_batch(&mut self) -> Result<Option<Batch>, BackendError>;

    /// Total number of items, when the platform reports one
    fn total_hint(&self) -> Option<u64> {
        None
    }
}

/// Per-platform content backend
#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// Platform name this backend serves
    fn platform(&self) -> &str;

    /// Retrieval modes this backend accepts
    fn supported_modes(&self) -> Vec<String>;

    /// Whether `mode` is one of [`supported_modes`](Self::supported_modes)
    fn supports_mode(&self, mode: &str) -> bool {
        self.supported_modes().iter().any(|m| m == mode)
    }

    /// Mode used for single-item URLs
    fn single_item_mode(&self) -> &str {
        "one"
    }

    /// Mode used for paginated listings
    fn listing_mode(&self) -> &str {
        "post"
    }

    /// Classify a canonical URL
    fn classify_url(&self, _url: &str) -> UrlKind {
        UrlKind::Unknown
    }

    /// Resolve the subject a URL points at
    async fn resolve_identity(&self, url: &str) -> Result<Identity, BackendError>;

    /// Start a fresh enumeration
    async fn enumerate(
        &self,
        request: EnumerateRequest,
    ) -> Result<Box<dyn ItemEnumerator>, BackendError>;

    /// Write a batch to the destination, returning how many items were actually written
    async fn materialize(
        &self,
        batch: &Batch,
        destination: &DestinationConfig,
    ) -> Result<u64, BackendError>;

    /// Recompute values derived from platform settings (tokens fetched through a proxy, ...)
    ///
    /// Called after the settings of an already-constructed backend change.
    async fn rederive(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Builds the shared backend instance for a platform
///
/// Implemented for any `Fn(PlatformConfigHandle) -> Result<Arc<dyn ContentBackend>, BackendError>`.
pub trait BackendFactory: Send + Sync {
    /// Construct a backend bound to the platform's settings
    fn build(&self, config: PlatformConfigHandle) -> Result<Arc<dyn ContentBackend>, BackendError>;
}

impl<F> BackendFactory for F
where
    F: Fn(PlatformConfigHandle) -> Result<Arc<dyn ContentBackend>, BackendError> + Send + Sync,
{
    fn build(&self, config: PlatformConfigHandle) -> Result<Arc<dyn ContentBackend>, BackendError> {
        self(config)
    }
}
