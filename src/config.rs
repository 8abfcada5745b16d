//! Configuration types for media-dl
//!
//! [`Config`] holds the global, mutable settings of an application. Tasks never
//! read it directly: [`Config::snapshot`] validates the settings once and returns
//! an immutable [`ConfigSnapshot`] that is captured when a task starts, so later
//! edits to the global settings cannot change the behavior of a running task.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Download behavior configuration (destination, naming, pagination)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Destination directory (default: "downloads")
    #[serde(default = "default_destination")]
    pub destination: PathBuf,

    /// File naming template (default: "{create}_{desc}")
    #[serde(default = "default_naming_template")]
    pub naming_template: String,

    /// Maximum file name length in characters (default: 80)
    #[serde(default = "default_max_file_name_length")]
    pub max_file_name_length: usize,

    /// Maximum concurrent connections a backend may open per task (default: 5)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of items per task (default: 0 = unbounded)
    #[serde(default)]
    pub max_items: u64,

    /// Items requested per page (default: 20)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Wait between pages (default: 0 = no wait)
    #[serde(default, with = "millis_serde")]
    pub page_wait: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            naming_template: default_naming_template(),
            max_file_name_length: default_max_file_name_length(),
            max_connections: default_max_connections(),
            max_items: 0,
            page_size: default_page_size(),
            page_wait: Duration::ZERO,
        }
    }
}

/// Outbound proxy settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Whether the proxy is used
    #[serde(default)]
    pub enabled: bool,

    /// Proxy URL (e.g. "http://127.0.0.1:7890")
    #[serde(default)]
    pub address: String,
}

impl ProxyConfig {
    /// The proxy address if the proxy is enabled and configured
    pub fn effective(&self) -> Option<&str> {
        if self.enabled && !self.address.trim().is_empty() {
            Some(self.address.trim())
        } else {
            None
        }
    }
}

/// Network settings (timeouts, proxy, credentials)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Outbound proxy
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Per-platform credential strings (e.g. cookies), keyed by platform name
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            proxy: ProxyConfig::default(),
            credentials: HashMap::new(),
        }
    }
}

/// Retry configuration for transient backend failures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Publication-date filter applied to enumeration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRangeFilter {
    /// Whether the filter is applied
    #[serde(default)]
    pub enabled: bool,

    /// First day included (inclusive, from 00:00:00 UTC)
    #[serde(default)]
    pub start: Option<NaiveDate>,

    /// Last day included (inclusive, until 23:59:59 UTC)
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

/// Millisecond-timestamp window passed to backend enumeration (0 = open bound)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRange {
    /// Lower bound in Unix milliseconds (0 = unbounded)
    pub min: i64,
    /// Upper bound in Unix milliseconds (0 = unbounded)
    pub max: i64,
}

impl CursorRange {
    /// A range with no bounds
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Whether neither bound is set
    pub fn is_unbounded(&self) -> bool {
        self.min == 0 && self.max == 0
    }
}

impl TimeRangeFilter {
    /// Convert the filter into a cursor range (unbounded when disabled or incomplete)
    pub fn cursor_range(&self) -> CursorRange {
        match (self.enabled, self.start, self.end) {
            (true, Some(start), Some(end)) => {
                let min = Utc
                    .from_utc_datetime(&start.and_time(NaiveTime::MIN))
                    .timestamp_millis();
                let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
                    .unwrap_or(NaiveTime::MIN);
                let max = Utc
                    .from_utc_datetime(&end.and_time(end_of_day))
                    .timestamp_millis();
                CursorRange { min, max }
            }
            _ => CursorRange::unbounded(),
        }
    }
}

/// Orchestrator settings (admission, event buffering, safeguards)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum concurrently running tasks (default: 5)
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Broadcast channel capacity for outward events (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Consecutive empty batches tolerated before a task fails (default: 5)
    #[serde(default = "default_max_empty_batches")]
    pub max_empty_batches: u32,

    /// How long shutdown waits for executors to exit (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            event_buffer: default_event_buffer(),
            max_empty_batches: default_max_empty_batches(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Static description of a platform known to the application
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Display name
    pub name: String,
    /// Retrieval modes offered for this platform
    pub modes: Vec<String>,
}

/// Main configuration
///
/// Sections:
/// - [`download`](DownloadConfig): destination, naming, pagination
/// - [`network`](NetworkConfig): timeouts, proxy, credentials
/// - [`retry`](RetryConfig): backoff for retryable backend errors
/// - [`filter`](TimeRangeFilter): publication-date window
/// - [`orchestrator`](OrchestratorConfig): admission and event buffering
/// - `platforms`: known platforms and their modes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Time-range filter
    #[serde(default)]
    pub filter: TimeRangeFilter,

    /// Orchestrator settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Known platforms, keyed by platform id
    #[serde(default = "default_platforms")]
    pub platforms: HashMap<String, PlatformConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            network: NetworkConfig::default(),
            retry: RetryConfig::default(),
            filter: TimeRangeFilter::default(),
            orchestrator: OrchestratorConfig::default(),
            platforms: default_platforms(),
        }
    }
}

impl Config {
    /// Parse a configuration from JSON, filling missing fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_json_str(&content)
    }

    /// Validate the settings and capture an immutable snapshot for a task
    pub fn snapshot(&self) -> Result<Arc<ConfigSnapshot>> {
        self.validate()?;
        Ok(Arc::new(self.capture()))
    }

    /// Check every setting
    ///
    /// Settings a task runs with are checked by [`ConfigSnapshot::validate`];
    /// this adds the orchestrator-wide ones.
    pub fn validate(&self) -> Result<()> {
        self.capture().validate()?;
        if self.orchestrator.event_buffer == 0 {
            return Err(Error::config(
                "orchestrator.event_buffer",
                "must be at least 1",
            ));
        }
        for (id, platform) in &self.platforms {
            if platform.modes.is_empty() {
                return Err(Error::config(
                    format!("platforms.{id}.modes"),
                    "a platform must offer at least one mode",
                ));
            }
        }
        Ok(())
    }

    /// Modes the platform table offers for `platform`, if it lists the platform
    pub fn modes_for(&self, platform: &str) -> Option<&[String]> {
        self.platforms.get(platform).map(|p| p.modes.as_slice())
    }

    fn capture(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            destination: self.download.destination.clone(),
            naming_template: self.download.naming_template.clone(),
            max_file_name_length: self.download.max_file_name_length,
            max_connections: self.download.max_connections,
            max_retries: self.retry.max_attempts,
            request_timeout: self.network.request_timeout,
            max_concurrent_tasks: self.orchestrator.max_concurrent_tasks,
            max_items: self.download.max_items,
            page_size: self.download.page_size,
            page_wait: self.download.page_wait,
            credentials: self.network.credentials.clone(),
            proxy: self.network.proxy.clone(),
            time_filter: self.filter.clone(),
            retry: self.retry.clone(),
            max_empty_batches: self.orchestrator.max_empty_batches,
        }
    }
}

/// Immutable copy of every setting a task needs, captured at start time
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigSnapshot {
    /// Destination directory
    pub destination: PathBuf,
    /// File naming template
    pub naming_template: String,
    /// Maximum file name length
    pub max_file_name_length: usize,
    /// Maximum concurrent connections per task
    pub max_connections: usize,
    /// Maximum retries for retryable backend errors
    pub max_retries: u32,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Maximum concurrently running tasks at capture time
    pub max_concurrent_tasks: usize,
    /// Maximum items per task (0 = unbounded)
    pub max_items: u64,
    /// Items requested per page
    pub page_size: u32,
    /// Wait between pages
    pub page_wait: Duration,
    /// Per-platform credential strings
    pub credentials: HashMap<String, String>,
    /// Outbound proxy
    pub proxy: ProxyConfig,
    /// Publication-date filter
    pub time_filter: TimeRangeFilter,
    /// Backoff settings
    pub retry: RetryConfig,
    /// Consecutive empty batches tolerated before failing
    pub max_empty_batches: u32,
}

impl ConfigSnapshot {
    /// Check every setting a task depends on
    ///
    /// [`Config::snapshot`] runs this before capture; the orchestrator runs it
    /// again on every snapshot it is handed, so hand-built snapshots are held
    /// to the same rules. Error keys name the [`Config`] setting.
    pub fn validate(&self) -> Result<()> {
        if self.destination.as_os_str().is_empty() {
            return Err(Error::config(
                "download.destination",
                "destination path must not be empty",
            ));
        }
        if self.naming_template.trim().is_empty() {
            return Err(Error::config(
                "download.naming_template",
                "naming template must not be empty",
            ));
        }
        if self.max_file_name_length < MIN_FILE_NAME_LENGTH {
            return Err(Error::config(
                "download.max_file_name_length",
                format!("must be at least {MIN_FILE_NAME_LENGTH}"),
            ));
        }
        if self.max_connections == 0 {
            return Err(Error::config(
                "download.max_connections",
                "must be at least 1",
            ));
        }
        if self.page_size == 0 {
            return Err(Error::config("download.page_size", "must be at least 1"));
        }
        if self.max_retries > MAX_RETRY_ATTEMPTS {
            return Err(Error::config(
                "retry.max_attempts",
                format!("must not exceed {MAX_RETRY_ATTEMPTS}"),
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "must be a finite number of at least 1.0",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config(
                "network.request_timeout",
                "must be greater than zero",
            ));
        }
        if self.proxy.enabled {
            let address = self.proxy.address.trim();
            if address.is_empty() {
                return Err(Error::config(
                    "network.proxy.address",
                    "proxy is enabled but no address is set",
                ));
            }
            url::Url::parse(address).map_err(|e| {
                Error::config(
                    "network.proxy.address",
                    format!("invalid proxy address '{address}': {e}"),
                )
            })?;
        }
        if self.time_filter.enabled {
            match (self.time_filter.start, self.time_filter.end) {
                (Some(start), Some(end)) if start > end => {
                    return Err(Error::config(
                        "filter",
                        format!("start date {start} is after end date {end}"),
                    ));
                }
                (Some(_), Some(_)) => {}
                _ => {
                    return Err(Error::config(
                        "filter",
                        "time filter is enabled but start or end date is missing",
                    ));
                }
            }
        }
        if self.max_concurrent_tasks == 0 {
            return Err(Error::config(
                "orchestrator.max_concurrent_tasks",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Credential string for a platform, if one is configured
    pub fn credential_for(&self, platform: &str) -> Option<&str> {
        self.credentials
            .get(platform)
            .map(String::as_str)
            .filter(|c| !c.trim().is_empty())
    }

    /// Cursor window derived from the time-range filter
    pub fn cursor_range(&self) -> CursorRange {
        self.time_filter.cursor_range()
    }

    /// Destination settings handed to backend materialization
    pub fn destination(&self) -> DestinationConfig {
        DestinationConfig {
            path: self.destination.clone(),
            naming_template: self.naming_template.clone(),
            max_file_name_length: self.max_file_name_length,
            max_connections: self.max_connections,
        }
    }

    /// Retry policy for backend calls (attempts bounded by `max_retries`)
    pub fn retry_policy(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            ..self.retry.clone()
        }
    }
}

/// Where and how a backend writes materialized items
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationConfig {
    /// Destination directory
    pub path: PathBuf,
    /// File naming template
    pub naming_template: String,
    /// Maximum file name length
    pub max_file_name_length: usize,
    /// Maximum concurrent connections
    pub max_connections: usize,
}

const MIN_FILE_NAME_LENGTH: usize = 16;
const MAX_RETRY_ATTEMPTS: u32 = 20;

// Default value functions
fn default_destination() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_naming_template() -> String {
    "{create}_{desc}".to_string()
}

fn default_max_file_name_length() -> usize {
    80
}

fn default_max_connections() -> usize {
    5
}

fn default_page_size() -> u32 {
    20
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_tasks() -> usize {
    5
}

fn default_event_buffer() -> usize {
    1000
}

fn default_max_empty_batches() -> u32 {
    5
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_platforms() -> HashMap<String, PlatformConfig> {
    let table: [(&str, &str, &[&str]); 4] = [
        (
            "douyin",
            "Douyin",
            &["one", "post", "like", "collection", "music", "mix", "live"],
        ),
        (
            "tiktok",
            "TikTok",
            &["one", "post", "like", "collect", "mix", "search", "live"],
        ),
        ("weibo", "Weibo", &["one", "post"]),
        ("twitter", "Twitter/X", &["one", "post", "like", "bookmark"]),
    ];
    table
        .into_iter()
        .map(|(id, name, modes)| {
            (
                id.to_string(),
                PlatformConfig {
                    name: name.to_string(),
                    modes: modes.iter().map(|m| m.to_string()).collect(),
                },
            )
        })
        .collect()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
