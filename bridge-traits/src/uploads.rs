//! Upload Queue Boundary
//!
//! Types and traits shared between the ingestion pipeline and the two external
//! collaborators that sit downstream of it: the persisted job store and the
//! network uploader.
//!
//! ## Job lifecycle
//!
//! ```text
//! Waiting → Preparing → Prepared → Uploading → Uploaded → Finishing → Finished
//!              ↓                        ↓                       ↓          ↓
//!     PreparingError/Fail     UploadingError/Fail     FinishingError/Fail  Moderated
//!         FormatError
//! ```
//!
//! The pipeline never drives these transitions itself; it only observes them
//! through [`UploadJobStore::subscribe`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;

use crate::error::{BridgeError, Result};

// ============================================================================
// Job State
// ============================================================================

/// Lifecycle state of a persisted upload job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Waiting,
    Preparing,
    PreparingError,
    PreparingFail,
    FormatError,
    Prepared,
    Uploading,
    UploadingError,
    UploadingFail,
    Uploaded,
    Finishing,
    FinishingError,
    FinishingFail,
    Finished,
    Moderated,
}

/// Coarse grouping of job states, as shown in the upload queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobCategory {
    InProgress,
    Error,
    Completed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Preparing => "preparing",
            Self::PreparingError => "preparing_error",
            Self::PreparingFail => "preparing_fail",
            Self::FormatError => "format_error",
            Self::Prepared => "prepared",
            Self::Uploading => "uploading",
            Self::UploadingError => "uploading_error",
            Self::UploadingFail => "uploading_fail",
            Self::Uploaded => "uploaded",
            Self::Finishing => "finishing",
            Self::FinishingError => "finishing_error",
            Self::FinishingFail => "finishing_fail",
            Self::Finished => "finished",
            Self::Moderated => "moderated",
        }
    }

    pub fn category(&self) -> JobCategory {
        match self {
            Self::Finished | Self::Moderated => JobCategory::Completed,
            Self::PreparingError
            | Self::PreparingFail
            | Self::FormatError
            | Self::UploadingError
            | Self::UploadingFail
            | Self::FinishingError
            | Self::FinishingFail => JobCategory::Error,
            _ => JobCategory::InProgress,
        }
    }

    /// The content reached the server; re-selecting it is a re-upload.
    pub fn is_completed(&self) -> bool {
        self.category() == JobCategory::Completed
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let state = match s {
            "waiting" => Self::Waiting,
            "preparing" => Self::Preparing,
            "preparing_error" => Self::PreparingError,
            "preparing_fail" => Self::PreparingFail,
            "format_error" => Self::FormatError,
            "prepared" => Self::Prepared,
            "uploading" => Self::Uploading,
            "uploading_error" => Self::UploadingError,
            "uploading_fail" => Self::UploadingFail,
            "uploaded" => Self::Uploaded,
            "finishing" => Self::Finishing,
            "finishing_error" => Self::FinishingError,
            "finishing_fail" => Self::FinishingFail,
            "finished" => Self::Finished,
            "moderated" => Self::Moderated,
            _ => return Err(BridgeError::Store(format!("Unknown job state: {}", s))),
        };
        Ok(state)
    }
}

// ============================================================================
// Job Records and Change Notifications
// ============================================================================

/// Snapshot of one persisted job, as carried by change notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable identifier assigned by the store
    pub job_id: String,
    /// Identifier of the source item the job was created from
    pub source_identifier: String,
    /// Content digest; empty while the store has not computed it
    pub content_digest: String,
    pub state: JobState,
}

/// Kind of change reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobChangeKind {
    Insert,
    Update,
    Delete,
    /// Reordering within the store. Jobs are not ordered entities, so
    /// consumers treat this as a contract violation.
    Move,
}

impl fmt::Display for JobChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Move => "move",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobChange {
    pub kind: JobChangeKind,
    pub record: JobRecord,
}

impl JobChange {
    pub fn new(kind: JobChangeKind, record: JobRecord) -> Self {
        Self { kind, record }
    }
}

// ============================================================================
// Drafts
// ============================================================================

/// Descriptive metadata applied to every image of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageParameters {
    pub title: Option<String>,
    pub author: Option<String>,
    pub privacy_level: u8,
    pub tag_ids: Vec<i64>,
    pub comment: Option<String>,
}

/// Maximum dimensions applied when downsizing on upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeLimits {
    pub photo_max_size: u16,
    pub video_max_size: u16,
}

/// Per-batch processing options honoured by the uploader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSettings {
    pub strip_gps: bool,
    /// `None` uploads the original dimensions
    pub resize: Option<ResizeLimits>,
    pub compress: bool,
    pub photo_quality: u8,
    pub delete_after_upload: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            strip_gps: false,
            resize: None,
            compress: false,
            photo_quality: 98,
            delete_after_upload: false,
        }
    }
}

/// A job to be created by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDraft {
    /// Staged file name of the source item
    pub source_identifier: String,
    pub content_digest: String,
    pub destination_album: i64,
    /// File name presented to the server
    pub file_name: String,
    pub image: Option<ImageParameters>,
    pub settings: Option<UploadSettings>,
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Persisted upload job store
///
/// The store is the source of truth for queued jobs. Consumers take an initial
/// snapshot with [`jobs`](Self::jobs) and then follow the ordered change
/// stream. A subscriber that lags behind should re-read the snapshot.
#[async_trait]
pub trait UploadJobStore: Send + Sync {
    /// All jobs currently persisted
    async fn jobs(&self) -> Result<Vec<JobRecord>>;

    /// Ordered stream of insert/update/delete notifications
    fn subscribe(&self) -> broadcast::Receiver<JobChange>;

    /// Persist `drafts` as a single atomic batch.
    ///
    /// Either every draft becomes a job or none does.
    async fn submit_batch(&self, drafts: Vec<UploadDraft>) -> Result<Vec<JobRecord>>;
}

/// Control surface of the network uploader
pub trait UploadSignal: Send + Sync {
    /// Stop picking new jobs until [`resume`](Self::resume) is called
    fn pause(&self);

    fn resume(&self);

    /// There is new work, look at the queue
    fn wake(&self);
}
