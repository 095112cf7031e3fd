//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the upload ingestion core and the
//! platform-specific world around it. Each trait represents a capability that
//! the core requires but that is implemented differently per platform
//! (desktop, iOS, Android).
//!
//! ## Traits
//!
//! ### Media & I/O
//! - [`MediaSource`](media::MediaSource) - Clipboard, photo library or drop folder contents
//! - [`FrameExtractor`](media::FrameExtractor) - Still frame of a staged movie
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for the staging area
//!
//! ### Upload Queue
//! - [`UploadJobStore`](uploads::UploadJobStore) - Persisted jobs and their change stream
//! - [`UploadSignal`](uploads::UploadSignal) - Pause/resume/wake the network uploader
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ File system, drop-folder media source |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError`
//! and include context (file paths, item indices) in the message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared as
//! `Arc<dyn Trait>` across preparation tasks.

pub mod error;
pub mod media;
pub mod storage;
pub mod time;
pub mod uploads;

pub use error::BridgeError;

// Re-export commonly used types
pub use media::{FrameExtractor, MediaEntry, MediaSource};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
pub use uploads::{
    ImageParameters, JobCategory, JobChange, JobChangeKind, JobRecord, JobState, ResizeLimits,
    UploadDraft, UploadJobStore, UploadSettings, UploadSignal,
};
