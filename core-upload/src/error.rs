use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No bytes available for {identifier} in any offered encoding")]
    Extraction { identifier: String },

    #[error("Failed to stage {identifier}: {message}")]
    Storage { identifier: String, message: String },

    #[error("Thumbnail error: {0}")]
    Thumbnail(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Illegal {kind} change for job {job_id}")]
    IllegalChange { job_id: String, kind: String },

    #[error("Generation {requested} is stale (current {current})")]
    StaleGeneration { requested: u64, current: u64 },

    #[error("Position {position} already has a queued job")]
    PositionQueued { position: usize },

    #[error("Unknown position {0}")]
    UnknownPosition(usize),

    #[error("Nothing selected")]
    EmptySelection,

    #[error("{outstanding} items are still being prepared")]
    PreparationPending { outstanding: usize },

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Preparation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<BridgeError> for UploadError {
    fn from(err: BridgeError) -> Self {
        UploadError::Store(err.to_string())
    }
}

impl From<core_runtime::Error> for UploadError {
    fn from(err: core_runtime::Error) -> Self {
        UploadError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
