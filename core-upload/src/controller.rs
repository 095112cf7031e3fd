//! # Ingestion Controller
//!
//! Owns the working set of one media source and drives it from enumeration
//! to a confirmed upload batch.
//!
//! ## State Machine
//!
//! ```text
//!        source_changed()              last completion applied
//! Idle ──────────────────> Enumerating ───> Preparing ──────────────────> Idle
//!  ^                            │                │
//!  │   empty enumeration        │                │ leave()
//!  └────────────────────────────┘                └──────────────────────> Idle
//! ```
//!
//! ## Serial Context
//!
//! Preparation runs on tokio worker tasks. Their results and the job
//! store's change notifications arrive on channels that only the
//! controller drains, through [`process_next`](IngestionController::process_next),
//! [`run_until_idle`](IngestionController::run_until_idle) and
//! [`drain_job_changes`](IngestionController::drain_job_changes). Every
//! mutation of the working set, the selection and the queue index happens
//! there, behind `&mut self`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let context = IngestionContext::new(media, store, signal);
//! let mut controller = IngestionController::new(context, &config, album_id).await?;
//!
//! controller.source_changed().await?;
//! controller.run_until_idle().await?;
//! controller.select_all()?;
//! controller.confirm(None, None).await?;
//! ```

use crate::hasher::{ContentHasher, Sha256Hasher};
use crate::item::{ItemState, SourceItem};
use crate::naming::{self, MediaKind};
use crate::preparation::{PreparationContext, PreparationOutcome, PreparationStatus, PreparationTask};
use crate::queue_index::QueueIndex;
use crate::scheduler::{Completion, PreparationScheduler};
use crate::selection::{SelectState, SelectionSet};
use crate::staging::StagingStore;
use crate::thumbnail::ThumbnailRenderer;
use crate::{Result, UploadError};
use bridge_traits::{
    Clock, FrameExtractor, ImageParameters, JobChange, JobChangeKind, JobState, MediaSource,
    SystemClock,
    UploadDraft, UploadJobStore, UploadSettings, UploadSignal,
};
use core_runtime::config::IngestionConfig;
use core_runtime::events::{CoreEvent, EventBus, IngestionEvent, QueueEvent, SelectionEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

type PreparationCompletion = Completion<usize, PreparationOutcome>;

/// Where the controller is in its pass lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassState {
    Idle,
    Enumerating,
    Preparing,
}

// ============================================================================
// Context
// ============================================================================

/// Collaborators handed to the controller at construction
pub struct IngestionContext {
    media: Arc<dyn MediaSource>,
    store: Arc<dyn UploadJobStore>,
    signal: Arc<dyn UploadSignal>,
    hasher: Arc<dyn ContentHasher>,
    frames: Option<Arc<dyn FrameExtractor>>,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
}

impl IngestionContext {
    pub fn new(
        media: Arc<dyn MediaSource>,
        store: Arc<dyn UploadJobStore>,
        signal: Arc<dyn UploadSignal>,
    ) -> Self {
        Self {
            media,
            store,
            signal,
            hasher: Arc::new(Sha256Hasher),
            frames: None,
            clock: Arc::new(SystemClock),
            events: None,
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_frame_extractor(mut self, frames: Arc<dyn FrameExtractor>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish on an existing bus instead of one sized from the config
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }
}

// ============================================================================
// Controller
// ============================================================================

pub struct IngestionController {
    preparation: Arc<PreparationContext>,
    store: Arc<dyn UploadJobStore>,
    signal: Arc<dyn UploadSignal>,
    clock: Arc<dyn Clock>,
    events: EventBus,

    items: Vec<SourceItem>,
    index: QueueIndex,
    selection: SelectionSet,
    /// Jobs that already cost a selection during this pass
    revoked_for: HashSet<String>,
    state: PassState,

    scheduler: PreparationScheduler<usize, PreparationOutcome>,
    completions: mpsc::UnboundedReceiver<PreparationCompletion>,
    changes: broadcast::Receiver<JobChange>,
    changes_closed: bool,
}

impl IngestionController {
    /// Wire the controller up and load the current queue snapshot.
    ///
    /// A relative staging directory is resolved against the host's data
    /// directory. Leftover partial files in it are purged.
    pub async fn new(
        context: IngestionContext,
        config: &IngestionConfig,
        destination_album: i64,
    ) -> Result<Self> {
        config.validate()?;

        let staging_dir = if config.staging_dir.is_absolute() {
            config.staging_dir.clone()
        } else {
            config
                .file_system
                .get_data_directory()
                .await?
                .join(&config.staging_dir)
        };
        let staging = Arc::new(StagingStore::new(config.file_system.clone(), staging_dir));
        let purged = staging.purge_partials().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to purge partial staging files");
            0
        });

        let mut preparation = PreparationContext::new(
            context.media,
            context.hasher,
            staging.clone(),
            ThumbnailRenderer::new(config.thumbnail_edge_pixels()),
        );
        if let Some(frames) = context.frames {
            preparation = preparation.with_frame_extractor(frames);
        }

        // Subscribe before reading the snapshot so nothing falls in between;
        // replayed changes are idempotent upserts
        let changes = context.store.subscribe();
        let mut index = QueueIndex::new();
        index.load(context.store.jobs().await?);

        let (scheduler, completions) =
            PreparationScheduler::new(config.max_concurrent_preparations);
        let events = context
            .events
            .unwrap_or_else(|| EventBus::new(config.event_buffer_size));

        info!(
            staging_dir = ?staging.root(),
            purged,
            known_jobs = index.jobs().count(),
            "Ingestion controller ready"
        );

        Ok(Self {
            preparation: Arc::new(preparation),
            store: context.store,
            signal: context.signal,
            clock: context.clock,
            events,
            items: Vec::new(),
            index,
            selection: SelectionSet::new(destination_album),
            revoked_for: HashSet::new(),
            state: PassState::Idle,
            scheduler,
            completions,
            changes,
            changes_closed: false,
        })
    }

    // ------------------------------------------------------------------
    // Passes
    // ------------------------------------------------------------------

    /// Re-enumerate the media source and start a fresh preparation pass.
    ///
    /// Returns the size of the new working set. An empty enumeration leaves
    /// the current working set untouched and returns 0.
    #[instrument(skip(self))]
    pub async fn source_changed(&mut self) -> Result<usize> {
        let previous = self.state;
        self.state = PassState::Enumerating;
        let entries = match self.preparation.media.enumerate().await {
            Ok(entries) => entries,
            Err(e) => {
                self.state = previous;
                return Err(e.into());
            }
        };
        if entries.is_empty() {
            debug!("Source offers nothing, keeping current working set");
            self.state = previous;
            return Ok(0);
        }

        let outstanding = self.scheduler.cancel_all();
        if outstanding > 0 {
            debug!(outstanding, "Cancelled preparation of previous pass");
            self.emit(CoreEvent::Ingestion(IngestionEvent::PassCancelled {
                generation: self.index.generation(),
                outstanding,
            }));
        }
        self.clear_selection();
        self.revoked_for.clear();

        self.signal.pause();

        let now = self.clock.now();
        let tag = self.preparation.media.source_tag().to_string();
        self.items = entries
            .into_iter()
            .enumerate()
            .map(|(position, entry)| {
                let kind = MediaKind::classify(&entry.encodings);
                let identifier = naming::identifier_for(&tag, now, kind, position);
                SourceItem::new(position, identifier, entry.encodings)
            })
            .collect();

        let generation = self.index.rebuild(self.items.len());
        for position in 0..self.items.len() {
            self.schedule(position, generation);
        }
        self.state = PassState::Preparing;

        info!(
            generation,
            item_count = self.items.len(),
            "Preparation pass started"
        );
        self.emit(CoreEvent::Ingestion(IngestionEvent::PassStarted {
            generation,
            item_count: self.items.len(),
        }));
        Ok(self.items.len())
    }

    fn schedule(&mut self, position: usize, generation: u64) {
        let item = self.items[position].clone();
        let context = self.preparation.clone();
        self.scheduler.schedule(position, move |cancel| {
            PreparationTask::new(position, generation, item, context).run(cancel)
        });
    }

    /// Cancel outstanding preparation, drop the selection and let the
    /// uploader run again.
    ///
    /// Items whose preparation was cancelled stay `New`. Returns the number
    /// of cancelled tasks.
    #[instrument(skip(self))]
    pub fn leave(&mut self) -> usize {
        let outstanding = self.scheduler.cancel_all();
        self.clear_selection();
        self.state = PassState::Idle;
        self.signal.resume();

        info!(outstanding, "Left ingestion");
        self.emit(CoreEvent::Ingestion(IngestionEvent::PassCancelled {
            generation: self.index.generation(),
            outstanding,
        }));
        outstanding
    }

    // ------------------------------------------------------------------
    // Serial context
    // ------------------------------------------------------------------

    /// Wait for the next preparation result or job change and apply it.
    pub async fn process_next(&mut self) -> Result<()> {
        let watch_changes = !self.changes_closed;
        tokio::select! {
            Some(completion) = self.completions.recv() => self.on_completion(completion),
            change = self.changes.recv(), if watch_changes => match change {
                Ok(change) => self.apply_change(&change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => self.resync(skipped).await,
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Job store change stream closed");
                    self.changes_closed = true;
                    Ok(())
                }
            },
            else => Ok(()),
        }
    }

    /// Apply results until no preparation is outstanding, then catch up on
    /// pending job changes.
    pub async fn run_until_idle(&mut self) -> Result<()> {
        while !self.scheduler.is_idle() {
            self.process_next().await?;
        }
        self.drain_job_changes().await
    }

    /// Apply every job change that has already arrived.
    pub async fn drain_job_changes(&mut self) -> Result<()> {
        while !self.changes_closed {
            match self.changes.try_recv() {
                Ok(change) => self.apply_change(&change)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(skipped)) => self.resync(skipped).await?,
                Err(TryRecvError::Closed) => {
                    warn!("Job store change stream closed");
                    self.changes_closed = true;
                }
            }
        }
        Ok(())
    }

    fn on_completion(&mut self, completion: PreparationCompletion) -> Result<()> {
        if !self.scheduler.finish(&completion) {
            debug!(position = completion.key, "Ignoring superseded preparation result");
            return Ok(());
        }

        let storage_failure = match completion.output {
            Some(outcome) => self.apply_outcome(outcome)?,
            None => None,
        };

        if self.scheduler.is_idle() && self.state == PassState::Preparing {
            self.on_idle(storage_failure);
        }
        Ok(())
    }

    /// Returns the message of a storage failure, which only surfaces as a
    /// pass failure if it ends the pass.
    fn apply_outcome(&mut self, outcome: PreparationOutcome) -> Result<Option<String>> {
        let PreparationOutcome {
            position,
            generation,
            status,
        } = outcome;
        if generation != self.index.generation() {
            debug!(position, generation, "Ignoring result of an earlier pass");
            return Ok(None);
        }
        let slot = self
            .items
            .get_mut(position)
            .ok_or(UploadError::UnknownPosition(position))?;

        match status {
            PreparationStatus::Skipped | PreparationStatus::Cancelled => Ok(None),
            PreparationStatus::Finished(item) => {
                *slot = item;
                let identifier = slot.identifier().to_string();
                self.selection.refresh_identifier(position, &identifier);

                let bound = self.index.bind(generation, position, &self.items[position])?;
                if let Some(job) = &bound {
                    self.revoke_duplicate(&job.job_id, &[position]);
                }

                debug!(position, identifier = %identifier, queued = bound.is_some(), "Item prepared");
                self.emit(CoreEvent::Ingestion(IngestionEvent::ItemPrepared {
                    position,
                    identifier,
                    queued_state: bound.map(|job| job.state.to_string()),
                }));
                Ok(None)
            }
            PreparationStatus::Failed { item, error } => {
                *slot = item;
                self.revoke(position);

                warn!(position, error = %error, "Item preparation failed");
                let message = error.to_string();
                self.emit(CoreEvent::Ingestion(IngestionEvent::ItemFailed {
                    position,
                    message: message.clone(),
                }));
                Ok(matches!(error, UploadError::Storage { .. }).then_some(message))
            }
        }
    }

    fn on_idle(&mut self, storage_failure: Option<String>) {
        let keep: Vec<bool> = self
            .items
            .iter()
            .map(|item| item.state() != ItemState::Failed)
            .collect();
        let pruned = keep.iter().filter(|kept| !**kept).count();
        if pruned > 0 {
            let items = std::mem::take(&mut self.items);
            self.items = items
                .into_iter()
                .zip(&keep)
                .filter_map(|(item, kept)| kept.then_some(item))
                .collect();
            self.index.compact(&keep);
            self.selection.remap(&keep);
        }

        self.state = PassState::Idle;
        self.signal.resume();

        let generation = self.index.generation();
        match storage_failure {
            Some(message) => {
                warn!(generation, pruned, message = %message, "Preparation pass failed");
                self.emit(CoreEvent::Ingestion(IngestionEvent::PassFailed {
                    generation,
                    message,
                }));
            }
            None => {
                info!(generation, ready = self.items.len(), pruned, "Preparation pass idle");
                self.emit(CoreEvent::Ingestion(IngestionEvent::PassIdle {
                    generation,
                    ready: self.items.len(),
                    pruned,
                }));
            }
        }
    }

    fn apply_change(&mut self, change: &JobChange) -> Result<()> {
        let reconciled = match self.index.apply(change, &self.items) {
            Ok(reconciled) => reconciled,
            Err(UploadError::IllegalChange { job_id, kind }) => {
                self.emit(CoreEvent::Queue(QueueEvent::IllegalChange { job_id, kind }));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if change.kind == JobChangeKind::Insert {
            self.revoke_duplicate(&change.record.job_id, &reconciled.matched);
        }
        for position in reconciled.indexed {
            debug!(position, job_id = %change.record.job_id, kind = %change.kind, "Job indexed");
            self.emit(CoreEvent::Queue(QueueEvent::JobIndexed {
                position,
                job_id: change.record.job_id.clone(),
                state: change.record.state.to_string(),
            }));
        }
        Ok(())
    }

    /// Rebuild both mirrors after missing `skipped` notifications.
    async fn resync(&mut self, skipped: u64) -> Result<()> {
        warn!(skipped, "Job change stream lagged, reloading snapshot");
        self.index.load(self.store.jobs().await?);

        let generation = self.index.generation();
        for position in 0..self.items.len() {
            if !self.items[position].state().has_digest() {
                continue;
            }
            let bound = self.index.bind(generation, position, &self.items[position])?;
            if let Some(job) = bound {
                self.revoke_duplicate(&job.job_id, &[position]);
            }
        }
        Ok(())
    }

    /// Revoke the first selected position among `candidates`, unless `job_id`
    /// already cost a selection this pass. Of several selected duplicates one
    /// is dropped and the rest stay, whichever way the job and the
    /// preparation results interleave.
    fn revoke_duplicate(&mut self, job_id: &str, candidates: &[usize]) {
        if self.selection.reupload_allowed() || self.revoked_for.contains(job_id) {
            return;
        }
        let Some(position) = candidates
            .iter()
            .copied()
            .find(|&position| self.selection.contains(position))
        else {
            return;
        };
        self.revoke(position);
        self.revoked_for.insert(job_id.to_string());
    }

    fn clear_selection(&mut self) {
        let cleared = self.selection.clear();
        if cleared > 0 {
            self.emit(CoreEvent::Selection(SelectionEvent::Cleared { count: cleared }));
        }
    }

    fn revoke(&mut self, position: usize) {
        if self.selection.deselect(position) {
            debug!(position, "Selection revoked");
            self.emit(CoreEvent::Selection(SelectionEvent::Revoked { position }));
        }
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Select `position` for the next batch.
    ///
    /// Items still being prepared may be selected; failed ones may not.
    pub fn select(&mut self, position: usize) -> Result<()> {
        let queued = self.upload_state_of(position).is_some();
        let item = self
            .items
            .get(position)
            .ok_or(UploadError::UnknownPosition(position))?;
        if item.state() == ItemState::Failed {
            return Err(UploadError::InvalidStateTransition {
                from: item.state().to_string(),
                to: "selected".to_string(),
                reason: "preparation failed".to_string(),
            });
        }
        self.selection.select(position, item.identifier(), queued)
    }

    pub fn deselect(&mut self, position: usize) -> bool {
        self.selection.deselect(position)
    }

    /// Flip the selection of `position`; returns whether it is selected
    /// afterwards.
    pub fn toggle_selection(&mut self, position: usize) -> Result<bool> {
        if self.selection.deselect(position) {
            return Ok(false);
        }
        self.select(position)?;
        Ok(true)
    }

    /// Select every position `select` would accept. Returns how many were
    /// added.
    ///
    /// Which positions are queued is only known once preparation is idle,
    /// so a bulk selection is refused before that.
    pub fn select_all(&mut self) -> Result<usize> {
        if !self.scheduler.is_idle() {
            return Err(UploadError::PreparationPending {
                outstanding: self.scheduler.in_flight(),
            });
        }
        let mut added = 0;
        for position in 0..self.items.len() {
            if self.selection.contains(position)
                || self.items[position].state() == ItemState::Failed
            {
                continue;
            }
            match self.select(position) {
                Ok(()) => added += 1,
                Err(UploadError::PositionQueued { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    pub fn deselect_all(&mut self) -> usize {
        self.selection.clear()
    }

    /// Flip the re-upload override. Turning it off drops selections whose
    /// job already completed; returns how many were dropped.
    #[instrument(skip(self))]
    pub fn toggle_reupload(&mut self) -> usize {
        let allowed = !self.selection.reupload_allowed();
        self.selection.set_reupload_allowed(allowed);

        let mut deselected = 0;
        if !allowed {
            let completed: Vec<usize> = self
                .selection
                .positions()
                .filter(|&position| {
                    self.upload_state_of(position)
                        .is_some_and(|state| state.is_completed())
                })
                .collect();
            for position in completed {
                if self.selection.deselect(position) {
                    deselected += 1;
                }
            }
        }

        info!(allowed, deselected, "Re-upload override toggled");
        self.emit(CoreEvent::Selection(SelectionEvent::ReuploadToggled {
            allowed,
            deselected,
        }));
        deselected
    }

    // ------------------------------------------------------------------
    // Confirmation
    // ------------------------------------------------------------------

    /// Hand the selection to the job store as one batch.
    ///
    /// Outstanding preparation is applied first, so the batch only refers
    /// to staged files. On failure nothing is queued and the selection is
    /// kept. Returns the number of jobs created.
    #[instrument(skip(self, image, settings))]
    pub async fn confirm(
        &mut self,
        image: Option<ImageParameters>,
        settings: Option<UploadSettings>,
    ) -> Result<usize> {
        if self.selection.is_empty() {
            return Err(UploadError::EmptySelection);
        }
        self.run_until_idle().await?;
        if self.selection.is_empty() {
            return Err(UploadError::EmptySelection);
        }

        let drafts: Vec<UploadDraft> = self
            .selection
            .drafts()
            .filter_map(|(position, request)| {
                let item = self.items.get(position)?;
                if !item.state().has_digest() {
                    warn!(position, state = %item.state(), "Skipping unprepared selection");
                    return None;
                }
                Some(UploadDraft {
                    source_identifier: request.source_identifier.clone(),
                    content_digest: item.digest().to_string(),
                    destination_album: request.destination_album,
                    file_name: naming::upload_file_name(&request.source_identifier),
                    image: image.clone(),
                    settings: settings.clone(),
                })
            })
            .collect();
        if drafts.is_empty() {
            return Err(UploadError::EmptySelection);
        }

        let records = self.store.submit_batch(drafts).await?;
        let count = records.len();
        let cleared = self.selection.clear();

        self.signal.resume();
        self.signal.wake();

        info!(count, "Upload batch submitted");
        self.emit(CoreEvent::Queue(QueueEvent::BatchSubmitted { count }));
        self.emit(CoreEvent::Selection(SelectionEvent::Cleared { count: cleared }));

        self.drain_job_changes().await?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn items(&self) -> &[SourceItem] {
        &self.items
    }

    pub fn item(&self, position: usize) -> Option<&SourceItem> {
        self.items.get(position)
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn queue_index(&self) -> &QueueIndex {
        &self.index
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Upload state of the job for `position`.
    ///
    /// Reads the position-indexed mirror once preparation is idle and the
    /// full mirror while it is still running.
    pub fn upload_state_of(&self, position: usize) -> Option<JobState> {
        if self.scheduler.is_idle() {
            self.index.state_at(position)
        } else {
            let item = self.items.get(position)?;
            self.index.job_for(&item.join_key()).map(|job| job.state)
        }
    }

    pub fn section_state(&self) -> SelectState {
        self.selection.select_state(
            self.items.len(),
            self.index.queued_count(),
            self.scheduler.is_idle(),
        )
    }

    pub fn can_select_all(&self) -> bool {
        self.selection
            .can_select_all(self.items.len(), self.index.queued_count())
    }

    pub fn can_toggle_reupload(&self) -> bool {
        self.scheduler.is_idle() && self.index.has_completed()
    }

    fn emit(&self, event: CoreEvent) {
        self.events.emit(event).ok();
    }
}

impl Drop for IngestionController {
    fn drop(&mut self) {
        self.scheduler.cancel_all();
    }
}
