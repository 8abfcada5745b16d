//! Core types for media-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ConfigSnapshot;

/// Unique identifier for a download task
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new TaskId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random TaskId
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<&str> for TaskId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task status
///
/// Transitions are constrained by [`Status::can_transition_to`]:
///
/// ```text
/// Pending --start--> Resolving --resolved--> Downloading
/// Downloading --pause--> Paused --resume--> Downloading
/// Downloading --done--> Completed
/// Downloading --error--> Failed
/// {Pending, Resolving, Downloading, Paused} --cancel--> Cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Created, waiting for an execution slot
    Pending,
    /// Resolving the raw input to a canonical URL and identity
    Resolving,
    /// Enumerating and materializing content
    Downloading,
    /// Paused by user at a batch boundary
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled by user
    Cancelled,
}

impl Status {
    /// All statuses, in lifecycle order
    pub const ALL: [Status; 7] = [
        Status::Pending,
        Status::Resolving,
        Status::Downloading,
        Status::Paused,
        Status::Completed,
        Status::Failed,
        Status::Cancelled,
    ];

    /// Whether no further transition is possible from this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }

    /// Whether a transition from `self` to `next` is permitted by the task state machine
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Resolving, Downloading)
                | (Downloading, Paused)
                | (Paused, Downloading)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Pending | Resolving | Downloading | Paused, Cancelled)
        )
    }

    /// Lowercase name used in serialized form and history records
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Resolving => "resolving",
            Status::Downloading => "downloading",
            Status::Paused => "paused",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }
}

/// Resolved subject of a task (e.g. an account)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name
    pub nickname: String,
    /// Platform-side identifier
    pub external_id: String,
}

impl Identity {
    /// Create a new identity
    pub fn new(nickname: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            external_id: external_id.into(),
        }
    }

    /// An identity with neither a nickname nor an external id carries no information
    pub fn is_empty(&self) -> bool {
        self.nickname.is_empty() && self.external_id.is_empty()
    }
}

/// Task progress
///
/// `total == None` means the total is unknown (indeterminate mode).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Items processed so far
    pub current: u64,
    /// Total items expected, if known
    pub total: Option<u64>,
}

impl Progress {
    /// Create a progress value
    pub fn new(current: u64, total: Option<u64>) -> Self {
        Self { current, total }
    }

    /// Whether the total is unknown
    pub fn is_indeterminate(&self) -> bool {
        self.total.is_none()
    }

    /// Progress as a percentage (None while indeterminate)
    pub fn percent(&self) -> Option<f32> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some((self.current.min(total) as f32 / total as f32) * 100.0),
            None => None,
        }
    }
}

/// Parameters for creating a task in the registry
#[derive(Clone, Debug)]
pub struct TaskSpec {
    /// Caller-supplied id (None = registry generates one)
    pub id: Option<TaskId>,
    /// Platform (backend) name
    pub platform: String,
    /// Retrieval mode
    pub mode: String,
    /// Raw user input (URL or share text)
    pub original_input: String,
    /// Settings captured at start time
    pub config_snapshot: Arc<ConfigSnapshot>,
}

/// A download task
#[derive(Clone, Debug, Serialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Platform (backend) name
    pub platform: String,

    /// Retrieval mode requested by the caller
    pub mode: String,

    /// Raw user input
    pub original_input: String,

    /// Canonical URL (empty until resolved)
    pub resolved_url: String,

    /// Resolved identity (None until resolved)
    pub identity: Option<Identity>,

    /// Current status
    pub status: Status,

    /// Current progress
    pub progress: Progress,

    /// Items the backend reported as newly written
    pub updated_items: u64,

    /// Settings captured at start time
    #[serde(skip)]
    pub config_snapshot: Arc<ConfigSnapshot>,

    /// Error message (set only on Failed)
    pub error: Option<String>,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// When the task first entered Downloading
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

/// Task counts by status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Total number of tasks in the registry
    pub total: usize,
    /// Waiting for an execution slot
    pub pending: usize,
    /// Resolving input
    pub resolving: usize,
    /// Actively downloading
    pub downloading: usize,
    /// Paused
    pub paused: usize,
    /// Completed
    pub completed: usize,
    /// Failed
    pub failed: usize,
    /// Cancelled
    pub cancelled: usize,
}

impl TaskStats {
    /// Count for a single status
    pub fn count(&self, status: Status) -> usize {
        match status {
            Status::Pending => self.pending,
            Status::Resolving => self.resolving,
            Status::Downloading => self.downloading,
            Status::Paused => self.paused,
            Status::Completed => self.completed,
            Status::Failed => self.failed,
            Status::Cancelled => self.cancelled,
        }
    }

    pub(crate) fn record(&mut self, status: Status) {
        self.total += 1;
        let slot = match status {
            Status::Pending => &mut self.pending,
            Status::Resolving => &mut self.resolving,
            Status::Downloading => &mut self.downloading,
            Status::Paused => &mut self.paused,
            Status::Completed => &mut self.completed,
            Status::Failed => &mut self.failed,
            Status::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task added to the registry
    TaskAdded {
        /// Task ID
        id: TaskId,
    },

    /// Task progress update
    TaskProgress {
        /// Task ID
        id: TaskId,
        /// Items processed so far
        current: u64,
        /// Total items expected (None = indeterminate)
        total: Option<u64>,
    },

    /// Task status changed
    TaskStatusChanged {
        /// Task ID
        id: TaskId,
        /// New status
        status: Status,
    },

    /// Informational message for a task
    TaskMessage {
        /// Task ID
        id: TaskId,
        /// Message text
        text: String,
    },

    /// Task identity resolved
    TaskIdentityResolved {
        /// Task ID
        id: TaskId,
        /// Display name
        nickname: String,
        /// Platform-side identifier
        external_id: String,
    },

    /// Canonical URL extracted from the raw input
    TaskUrlResolved {
        /// Task ID
        id: TaskId,
        /// Canonical URL
        url: String,
    },

    /// Task reached a terminal status (emitted exactly once per task)
    TaskFinished {
        /// Task ID
        id: TaskId,
    },

    /// Task failed
    TaskError {
        /// Task ID
        id: TaskId,
        /// Error message
        message: String,
    },

    /// Task removed from the registry
    TaskRemoved {
        /// Task ID
        id: TaskId,
    },

    /// Graceful shutdown initiated
    Shutdown,
}

impl Event {
    /// The task this event refers to, if any
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskAdded { id }
            | Event::TaskProgress { id, .. }
            | Event::TaskStatusChanged { id, .. }
            | Event::TaskMessage { id, .. }
            | Event::TaskIdentityResolved { id, .. }
            | Event::TaskUrlResolved { id, .. }
            | Event::TaskFinished { id }
            | Event::TaskError { id, .. }
            | Event::TaskRemoved { id } => Some(id),
            Event::Shutdown => None,
        }
    }
}
