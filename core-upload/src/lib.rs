//! # Upload Ingestion Pipeline
//!
//! Turns media offered by a volatile external source into deduplicated,
//! staged upload jobs.
//!
//! ## Overview
//!
//! One ingestion pass:
//! - Enumerates the media source into a working set of [`SourceItem`]s
//! - Prepares every item off the serial context: extract, digest, stage,
//!   thumbnail
//! - Mirrors the persisted upload queue so items already queued are shown
//!   as such and cannot be selected twice
//! - Hands the user's selection to the job store as one atomic batch and
//!   wakes the uploader
//!
//! ## Components
//!
//! - **Naming** (`naming`): encoding priority tables and the staged name grammar
//! - **Source Items** (`item`): per-item state machine and join keys
//! - **Staging** (`staging`): write-then-rename storage of extracted bytes
//! - **Preparation** (`preparation`, `scheduler`): cancellable per-item tasks
//!   with de-duplicated, optionally bounded scheduling
//! - **Queue Index** (`queue_index`): position-indexed and full mirrors of
//!   the job store
//! - **Selection** (`selection`): drafts for the next batch and the bulk
//!   select state
//! - **Controller** (`controller`): the serial context tying it together
//! - **In-memory store** (`memory_store`, `signal`): reference job store and
//!   uploader signal

pub mod controller;
pub mod error;
pub mod hasher;
pub mod item;
pub mod memory_store;
pub mod naming;
pub mod preparation;
pub mod queue_index;
pub mod scheduler;
pub mod selection;
pub mod signal;
pub mod staging;
pub mod thumbnail;

pub use controller::{IngestionContext, IngestionController, PassState};
pub use error::{Result, UploadError};
pub use hasher::{ContentHasher, Sha256Hasher};
pub use item::{ItemState, JoinKey, SourceItem};
pub use memory_store::InMemoryJobStore;
pub use naming::{Encoding, MediaKind, StagedName};
pub use preparation::{PreparationContext, PreparationOutcome, PreparationStatus, PreparationTask};
pub use queue_index::{IndexedJob, QueueIndex, Reconciled};
pub use scheduler::{Completion, PreparationScheduler};
pub use selection::{DraftRequest, SelectState, SelectionSet};
pub use signal::RecordingSignal;
pub use staging::StagingStore;
pub use thumbnail::{Thumbnail, ThumbnailRenderer};
