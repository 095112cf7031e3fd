//! # Preparation Tasks
//!
//! Turns one `New` source item into a staged, hashed, thumbnailed item.
//!
//! ## Steps
//!
//! 1. Walk the encodings of the item's kind in priority order and fetch the
//!    first one the source actually delivers.
//! 2. Digest the bytes.
//! 3. Append the encoding's extension to the identifier.
//! 4. Stage the bytes under that identifier.
//! 5. Render a thumbnail (a movie's first frame for movies). Failures fall
//!    back to the placeholder.
//!
//! The task works on its own copy of the item and hands the result back in
//! a [`PreparationOutcome`]; only the controller applies it to the working
//! set. Cancellation is checked before each step. A task cancelled after
//! staging removes what it wrote, and a cancelled task never reports a state
//! change, so the working-set item stays `New`.

use crate::hasher::ContentHasher;
use crate::item::{ItemState, SourceItem};
use crate::naming::{self, MediaKind};
use crate::staging::StagingStore;
use crate::thumbnail::{Thumbnail, ThumbnailRenderer};
use crate::{Result, UploadError};
use bridge_traits::{FrameExtractor, MediaSource};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Collaborators shared by every preparation task of a controller
pub struct PreparationContext {
    pub media: Arc<dyn MediaSource>,
    pub hasher: Arc<dyn ContentHasher>,
    pub staging: Arc<StagingStore>,
    pub thumbnails: ThumbnailRenderer,
    /// Needed for movie thumbnails; without it movies keep the placeholder
    pub frames: Option<Arc<dyn FrameExtractor>>,
}

impl PreparationContext {
    pub fn new(
        media: Arc<dyn MediaSource>,
        hasher: Arc<dyn ContentHasher>,
        staging: Arc<StagingStore>,
        thumbnails: ThumbnailRenderer,
    ) -> Self {
        Self {
            media,
            hasher,
            staging,
            thumbnails,
            frames: None,
        }
    }

    pub fn with_frame_extractor(mut self, frames: Arc<dyn FrameExtractor>) -> Self {
        self.frames = Some(frames);
        self
    }
}

/// How a task ended
#[derive(Debug)]
pub enum PreparationStatus {
    /// The item was not `New`; nothing was done
    Skipped,
    Cancelled,
    Finished(SourceItem),
    /// The item moved to `Failed`
    Failed { item: SourceItem, error: UploadError },
}

/// Result of one task, tagged with the pass it belongs to
#[derive(Debug)]
pub struct PreparationOutcome {
    pub position: usize,
    pub generation: u64,
    pub status: PreparationStatus,
}

pub struct PreparationTask {
    position: usize,
    generation: u64,
    item: SourceItem,
    context: Arc<PreparationContext>,
}

impl PreparationTask {
    pub fn new(
        position: usize,
        generation: u64,
        item: SourceItem,
        context: Arc<PreparationContext>,
    ) -> Self {
        Self {
            position,
            generation,
            item,
            context,
        }
    }

    #[instrument(skip(self, cancel), fields(position = self.position, generation = self.generation))]
    pub async fn run(self, cancel: CancellationToken) -> PreparationOutcome {
        let position = self.position;
        let generation = self.generation;
        let status = self.prepare(&cancel).await;
        PreparationOutcome {
            position,
            generation,
            status,
        }
    }

    async fn prepare(self, cancel: &CancellationToken) -> PreparationStatus {
        let Self { item, context, .. } = self;
        let mut item = item;

        if item.state() != ItemState::New {
            debug!(state = %item.state(), "Item already prepared, skipping");
            return PreparationStatus::Skipped;
        }
        if cancel.is_cancelled() {
            return PreparationStatus::Cancelled;
        }

        let Some((encoding, data)) = extract(&context, &item, cancel).await else {
            if cancel.is_cancelled() {
                return PreparationStatus::Cancelled;
            }
            let error = UploadError::Extraction {
                identifier: item.identifier().to_string(),
            };
            return fail(item, error);
        };
        if cancel.is_cancelled() {
            return PreparationStatus::Cancelled;
        }

        let digest = context.hasher.digest(&data);
        if let Err(error) = item.append_extension(encoding.extension) {
            return fail(item, error);
        }
        if cancel.is_cancelled() {
            return PreparationStatus::Cancelled;
        }

        let path = match context.staging.stage(item.identifier(), data.clone()).await {
            Ok(path) => path,
            Err(error) => return fail(item, error),
        };
        if let Err(error) = item.mark_staged(digest) {
            discard(&context, &item).await;
            return fail(item, error);
        }
        debug!(
            identifier = %item.identifier(),
            digest = %item.digest(),
            algorithm = context.hasher.algorithm(),
            "Item staged"
        );
        if cancel.is_cancelled() {
            discard(&context, &item).await;
            return PreparationStatus::Cancelled;
        }

        let thumbnail = render_thumbnail(&context, item.kind(), data, &path).await;
        if cancel.is_cancelled() {
            discard(&context, &item).await;
            return PreparationStatus::Cancelled;
        }

        match item.mark_ready(thumbnail) {
            Ok(()) => PreparationStatus::Finished(item),
            Err(error) => PreparationStatus::Failed { item, error },
        }
    }
}

/// Fetch the first candidate encoding the source delivers.
async fn extract(
    context: &PreparationContext,
    item: &SourceItem,
    cancel: &CancellationToken,
) -> Option<(naming::Encoding, Bytes)> {
    for encoding in naming::candidates(item.kind(), item.encodings()) {
        if cancel.is_cancelled() {
            return None;
        }
        match context
            .media
            .fetch(item.source_index, encoding.type_identifier)
            .await
        {
            Ok(Some(data)) => return Some((encoding, data)),
            Ok(None) => {
                debug!(encoding = encoding.type_identifier, "Encoding unavailable");
            }
            Err(e) => {
                debug!(encoding = encoding.type_identifier, error = %e, "Fetch failed");
            }
        }
    }
    None
}

async fn render_thumbnail(
    context: &PreparationContext,
    kind: MediaKind,
    data: Bytes,
    staged: &Path,
) -> Thumbnail {
    let result: Result<Thumbnail> = match kind {
        MediaKind::Image => context.thumbnails.render(data).await,
        MediaKind::Movie => match &context.frames {
            Some(frames) => match frames.first_frame(staged).await {
                Ok(frame) => context.thumbnails.render(frame).await,
                Err(e) => Err(UploadError::Thumbnail(e.to_string())),
            },
            None => Ok(Thumbnail::Placeholder),
        },
    };

    result.unwrap_or_else(|e| {
        warn!(error = %e, "Thumbnail unavailable, using placeholder");
        Thumbnail::Placeholder
    })
}

async fn discard(context: &PreparationContext, item: &SourceItem) {
    if let Err(e) = context.staging.discard(item.identifier()).await {
        warn!(identifier = %item.identifier(), error = %e, "Failed to discard staged file");
    }
}

fn fail(mut item: SourceItem, error: UploadError) -> PreparationStatus {
    warn!(identifier = %item.identifier(), error = %error, "Preparation failed");
    match item.mark_failed() {
        Ok(()) => PreparationStatus::Failed { item, error },
        Err(transition) => PreparationStatus::Failed {
            item,
            error: transition,
        },
    }
}
