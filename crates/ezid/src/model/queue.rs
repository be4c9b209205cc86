use crate::ValidationError;
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};

/// An external service receiving propagated identifier state. Each has its
/// own queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Binder,
    Datacite,
    Crossref,
    #[serde(rename = "search")]
    SearchIndexer,
}

impl Destination {
    pub const ALL: [Self; 4] = [Self::Binder, Self::Datacite, Self::Crossref, Self::SearchIndexer];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binder => "binder",
            Self::Datacite => "datacite",
            Self::Crossref => "crossref",
            Self::SearchIndexer => "search",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Destination {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binder" => Ok(Self::Binder),
            "datacite" => Ok(Self::Datacite),
            "crossref" => Ok(Self::Crossref),
            "search" | "searchindexer" => Ok(Self::SearchIndexer),
            _ => Err(ValidationError::UnknownCode {
                kind: "destination",
                code: s.to_owned(),
            }),
        }
    }
}

/// What a queue row asks the destination to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "C")]
    Create,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "D")]
    Delete,
}

impl Operation {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Create => "C",
            Self::Update => "U",
            Self::Delete => "D",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, ValidationError> {
        match code {
            "C" => Ok(Self::Create),
            "U" => Ok(Self::Update),
            "D" => Ok(Self::Delete),
            _ => Err(ValidationError::UnknownCode {
                kind: "operation",
                code: code.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// Processing state of a queue row.
///
/// Rows move `Unsubmitted -> Submitted -> {Success, Warning, Failure, Ignored}`.
/// A retryable `Failure` may be submitted again; nothing ever leaves `Success`
/// or `Ignored`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueStatus {
    #[serde(rename = "U")]
    Unsubmitted,
    #[serde(rename = "S")]
    Submitted,
    #[serde(rename = "W")]
    Warning,
    #[serde(rename = "F")]
    Failure,
    #[serde(rename = "I")]
    Ignored,
    #[serde(rename = "O")]
    Success,
}

impl QueueStatus {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Unsubmitted => "U",
            Self::Submitted => "S",
            Self::Warning => "W",
            Self::Failure => "F",
            Self::Ignored => "I",
            Self::Success => "O",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, ValidationError> {
        match code {
            "U" => Ok(Self::Unsubmitted),
            "S" => Ok(Self::Submitted),
            "W" => Ok(Self::Warning),
            "F" => Ok(Self::Failure),
            "I" => Ok(Self::Ignored),
            "O" => Ok(Self::Success),
            _ => Err(ValidationError::UnknownCode {
                kind: "queue status",
                code: code.to_owned(),
            }),
        }
    }

    /// Rows the cleanup sweeper may delete.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Ignored)
    }

    /// Rows a worker still has to look at, now or after a retry interval.
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Unsubmitted | Self::Submitted | Self::Failure)
    }

    pub const fn can_transition(self, to: Self) -> bool {
        match (self, to) {
            (Self::Unsubmitted | Self::Failure, Self::Submitted) => true,
            (Self::Submitted, _) => !matches!(to, Self::Unsubmitted),
            _ => false,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unsubmitted => "unsubmitted",
            Self::Submitted => "submitted",
            Self::Warning => "warning",
            Self::Failure => "failure",
            Self::Ignored => "ignored",
            Self::Success => "success",
        })
    }
}

/// One unit of propagation work for one destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub destination: Destination,
    /// Monotonic within the destination; never reused.
    pub seq: u64,
    pub ref_id: u64,
    /// Copied from the snapshot; the per-identifier ordering key.
    pub identifier: String,
    pub operation: Operation,
    pub status: QueueStatus,
    pub enqueue_time: u64,
    pub submit_time: Option<u64>,
    pub message: String,
    /// Set while a destination processes the row asynchronously.
    pub batch_id: Option<String>,
    pub error: String,
    pub error_is_permanent: bool,
}

impl QueueEntry {
    pub fn new(
        destination: Destination,
        seq: u64,
        ref_id: u64,
        identifier: impl Into<String>,
        operation: Operation,
        now: u64,
    ) -> Self {
        Self {
            destination,
            seq,
            ref_id,
            identifier: identifier.into(),
            operation,
            status: QueueStatus::Unsubmitted,
            enqueue_time: now,
            submit_time: None,
            message: String::new(),
            batch_id: None,
            error: String::new(),
            error_is_permanent: false,
        }
    }

    /// Applies a worker's result. Callers check the transition first.
    pub fn apply(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        self.submit_time = Some(update.submit_time);
        self.message.clone_from(&update.message);
        self.error.clone_from(&update.error);
        self.error_is_permanent = update.error_is_permanent;
        self.batch_id.clone_from(&update.batch_id);
    }

    /// Marks the row as handed to a worker.
    pub fn mark_submitted(&mut self, now: u64) {
        self.status = QueueStatus::Submitted;
        self.submit_time = Some(now);
    }
}

/// What a worker writes back to a queue row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: QueueStatus,
    pub submit_time: u64,
    pub message: String,
    pub error: String,
    pub error_is_permanent: bool,
    pub batch_id: Option<String>,
}

impl StatusUpdate {
    fn with_status(status: QueueStatus, now: u64) -> Self {
        Self {
            status,
            submit_time: now,
            message: String::new(),
            error: String::new(),
            error_is_permanent: false,
            batch_id: None,
        }
    }

    pub fn success(now: u64) -> Self {
        Self::with_status(QueueStatus::Success, now)
    }

    pub fn ignored(now: u64, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::with_status(QueueStatus::Ignored, now)
        }
    }

    pub fn warning(now: u64, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::with_status(QueueStatus::Warning, now)
        }
    }

    pub fn failure(now: u64, error: impl Into<String>, permanent: bool) -> Self {
        Self {
            error: error.into(),
            error_is_permanent: permanent,
            ..Self::with_status(QueueStatus::Failure, now)
        }
    }

    /// The destination accepted the work and will report back under
    /// `batch_id`; the row stays submitted until polled.
    pub fn awaiting(now: u64, batch_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            batch_id: Some(batch_id.into()),
            ..Self::with_status(QueueStatus::Submitted, now)
        }
    }
}
