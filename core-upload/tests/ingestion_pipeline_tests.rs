//! Integration tests for the ingestion pipeline
//!
//! These tests drive an `IngestionController` end to end against:
//! - A fake clipboard-like media source
//! - The in-memory job store standing in for the persisted queue
//! - Real staging on a temporary directory

use async_trait::async_trait;
use bridge_desktop::{DirectoryMediaSource, TokioFileSystem};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{JobState, MediaEntry, MediaSource, UploadJobStore};
use bytes::Bytes;
use core_runtime::config::IngestionConfig;
use core_runtime::events::{CoreEvent, EventStream, IngestionEvent, SelectionEvent};
use core_upload::{
    ContentHasher, IngestionContext, IngestionController, InMemoryJobStore, ItemState,
    RecordingSignal, SelectState, Sha256Hasher, UploadError,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

// ============================================================================
// Fakes
// ============================================================================

/// Clipboard holding PNG-tagged items; `None` payloads cannot be fetched.
/// Fetches wait until the gate opens.
struct FakeClipboard {
    payloads: Vec<Option<&'static str>>,
    gate: watch::Sender<bool>,
}

impl FakeClipboard {
    fn new(payloads: Vec<Option<&'static str>>) -> Self {
        let (gate, _) = watch::channel(true);
        Self { payloads, gate }
    }

    fn closed(payloads: Vec<Option<&'static str>>) -> Self {
        let (gate, _) = watch::channel(false);
        Self { payloads, gate }
    }

    fn open(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl MediaSource for FakeClipboard {
    fn source_tag(&self) -> &str {
        "Clipboard"
    }

    async fn enumerate(&self) -> BridgeResult<Vec<MediaEntry>> {
        Ok(self
            .payloads
            .iter()
            .map(|_| MediaEntry::new(["public.png"]))
            .collect())
    }

    async fn fetch(&self, index: usize, _encoding: &str) -> BridgeResult<Option<Bytes>> {
        let mut gate = self.gate.subscribe();
        // The sender lives as long as self
        let _ = gate.wait_for(|open| *open).await;
        Ok(self
            .payloads
            .get(index)
            .copied()
            .flatten()
            .map(|s| Bytes::from_static(s.as_bytes())))
    }
}

struct Harness {
    controller: IngestionController,
    store: Arc<InMemoryJobStore>,
    signal: Arc<RecordingSignal>,
}

async fn harness(media: Arc<dyn MediaSource>, staging: &Path) -> Harness {
    let store = Arc::new(InMemoryJobStore::new());
    let signal = Arc::new(RecordingSignal::new());
    let config = IngestionConfig::builder()
        .staging_dir(staging)
        .max_concurrent_preparations(2)
        .thumbnail_size(8)
        .file_system(Arc::new(TokioFileSystem::new()))
        .build()
        .unwrap();
    let context = IngestionContext::new(media, store.clone(), signal.clone());
    let controller = IngestionController::new(context, &config, 42).await.unwrap();
    Harness {
        controller,
        store,
        signal,
    }
}

fn digest(data: &[u8]) -> String {
    Sha256Hasher.digest(data)
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::new();
    image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height))
        .write_to(&mut std::io::Cursor::new(&mut data), image::ImageFormat::Png)
        .unwrap();
    data
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_existing_job_revokes_one_duplicate_selection() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::new(vec![
        Some("same"),
        Some("same"),
        Some("other"),
    ]));
    let Harness {
        mut controller,
        store,
        ..
    } = harness(media, &temp.path().join("Uploads")).await;

    controller.source_changed().await.unwrap();
    controller.run_until_idle().await.unwrap();
    assert_eq!(controller.select_all().unwrap(), 3);

    store
        .insert_existing("Library-20240101-0000000000-img-0.png", &digest(b"same"), JobState::Waiting)
        .await;
    controller.drain_job_changes().await.unwrap();

    let selection = controller.selection();
    assert_eq!(selection.len(), 2);
    assert!(selection.contains(0) ^ selection.contains(1));
    assert!(selection.contains(2));
}

#[tokio::test]
async fn test_existing_job_marks_every_duplicate_before_preparation() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::new(vec![Some("same"), Some("same")]));
    let Harness {
        mut controller,
        store,
        ..
    } = harness(media, &temp.path().join("Uploads")).await;
    store
        .insert_existing("Library-20240101-0000000000-img-0.png", &digest(b"same"), JobState::Waiting)
        .await;

    controller.source_changed().await.unwrap();
    controller.run_until_idle().await.unwrap();

    assert_eq!(controller.upload_state_of(0), Some(JobState::Waiting));
    assert_eq!(controller.upload_state_of(1), Some(JobState::Waiting));
}

#[tokio::test]
async fn test_job_inserted_after_preparation_marks_every_duplicate() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::new(vec![Some("same"), Some("same")]));
    let Harness {
        mut controller,
        store,
        ..
    } = harness(media, &temp.path().join("Uploads")).await;

    controller.source_changed().await.unwrap();
    controller.run_until_idle().await.unwrap();
    store
        .insert_existing("Library-20240101-0000000000-img-0.png", &digest(b"same"), JobState::Waiting)
        .await;
    controller.drain_job_changes().await.unwrap();

    assert_eq!(controller.upload_state_of(0), Some(JobState::Waiting));
    assert_eq!(controller.upload_state_of(1), Some(JobState::Waiting));
    assert!(matches!(
        controller.select(1),
        Err(UploadError::PositionQueued { position: 1 })
    ));
}

#[tokio::test]
async fn test_job_arriving_mid_preparation_revokes_one_duplicate_selection() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::closed(vec![
        Some("same"),
        Some("same"),
        Some("other"),
    ]));
    let Harness {
        mut controller,
        store,
        ..
    } = harness(media.clone(), &temp.path().join("Uploads")).await;

    controller.source_changed().await.unwrap();
    for position in 0..3 {
        controller.select(position).unwrap();
    }
    store
        .insert_existing("Library-20240101-0000000000-img-0.png", &digest(b"same"), JobState::Waiting)
        .await;
    controller.drain_job_changes().await.unwrap();
    assert_eq!(controller.selection().len(), 3);

    media.open();
    controller.run_until_idle().await.unwrap();

    let selection = controller.selection();
    assert_eq!(selection.len(), 2);
    assert!(selection.contains(0) ^ selection.contains(1));
    assert!(selection.contains(2));
}

#[tokio::test]
async fn test_confirm_then_uploader_progress_is_mirrored() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::new(vec![Some("first"), Some("second")]));
    let Harness {
        mut controller,
        store,
        signal,
    } = harness(media, &temp.path().join("Uploads")).await;

    controller.source_changed().await.unwrap();
    controller.run_until_idle().await.unwrap();
    controller.select(1).unwrap();

    assert_eq!(controller.confirm(None, None).await.unwrap(), 1);
    assert_eq!(signal.wakes(), 1);
    assert_eq!(controller.upload_state_of(1), Some(JobState::Waiting));
    assert_eq!(controller.upload_state_of(0), None);
    assert!(!controller.can_toggle_reupload());

    let jobs = store.jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].content_digest, digest(b"second"));

    store
        .set_state(&jobs[0].job_id, JobState::Finished)
        .await
        .unwrap();
    controller.drain_job_changes().await.unwrap();

    assert_eq!(controller.upload_state_of(1), Some(JobState::Finished));
    assert!(controller.can_toggle_reupload());

    store.remove(&jobs[0].job_id).await.unwrap();
    controller.drain_job_changes().await.unwrap();
    assert_eq!(controller.upload_state_of(1), None);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_extraction_is_pruned_when_idle() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::new(vec![
        Some("a"),
        Some("b"),
        None,
        Some("d"),
    ]));
    let Harness {
        mut controller, ..
    } = harness(media, &temp.path().join("Uploads")).await;
    let mut events = controller.subscribe();

    controller.source_changed().await.unwrap();
    // Optimistic selection of the item that is about to fail
    controller.select(2).unwrap();
    controller.run_until_idle().await.unwrap();

    assert_eq!(controller.items().len(), 3);
    assert!(controller
        .items()
        .iter()
        .all(|item| item.state() == ItemState::Ready && !item.identifier().contains("-img-2")));
    assert!(controller.selection().is_empty());
    assert!(matches!(
        controller.select(3),
        Err(UploadError::UnknownPosition(3))
    ));

    let mut idle = None;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Ingestion(IngestionEvent::PassIdle { ready, pruned, .. }) = event {
            idle = Some((ready, pruned));
        }
    }
    assert_eq!(idle, Some((3, 1)));
}

#[tokio::test]
async fn test_storage_failure_fails_the_pass() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("not-a-directory");
    std::fs::write(&blocker, b"file").unwrap();

    let media = Arc::new(FakeClipboard::new(vec![Some("a")]));
    let Harness {
        mut controller, ..
    } = harness(media, &blocker.join("Uploads")).await;
    let mut pass_events = EventStream::new(controller.subscribe()).filter(|event| {
        matches!(
            event,
            CoreEvent::Ingestion(
                IngestionEvent::PassIdle { .. } | IngestionEvent::PassFailed { .. }
            )
        )
    });

    controller.source_changed().await.unwrap();
    controller.run_until_idle().await.unwrap();

    assert!(controller.items().is_empty());
    assert!(matches!(
        pass_events.try_recv(),
        Some(Ok(CoreEvent::Ingestion(IngestionEvent::PassFailed { .. })))
    ));
    assert!(pass_events.try_recv().is_none());
}

// ============================================================================
// Re-upload override
// ============================================================================

#[tokio::test]
async fn test_disabling_reupload_deselects_finished_jobs() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::new(vec![
        Some("one"),
        Some("two"),
        Some("three"),
    ]));
    let Harness {
        mut controller,
        store,
        ..
    } = harness(media, &temp.path().join("Uploads")).await;
    store
        .insert_existing("old-1.png", &digest(b"one"), JobState::Finished)
        .await;
    store
        .insert_existing("old-2.png", &digest(b"two"), JobState::Moderated)
        .await;

    controller.source_changed().await.unwrap();
    controller.run_until_idle().await.unwrap();

    assert_eq!(controller.select_all().unwrap(), 1);
    assert_eq!(controller.section_state(), SelectState::Deselect);
    assert!(controller.can_toggle_reupload());

    assert_eq!(controller.toggle_reupload(), 0);
    assert_eq!(controller.select_all().unwrap(), 2);
    assert_eq!(controller.selection().len(), 3);

    assert_eq!(controller.toggle_reupload(), 2);
    assert_eq!(controller.selection().len(), 1);
    assert!(controller.selection().contains(2));

    controller.deselect_all();
    assert_eq!(controller.toggle_reupload(), 0);
    assert_eq!(controller.toggle_reupload(), 0);
}

#[tokio::test]
async fn test_disabling_reupload_mid_preparation_uses_job_mirror() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::closed(vec![Some("one"), Some("two")]));
    let Harness {
        mut controller,
        store,
        ..
    } = harness(media.clone(), &temp.path().join("Uploads")).await;

    controller.source_changed().await.unwrap();
    let identifier = controller.item(0).unwrap().identifier().to_string();
    store
        .insert_existing(&format!("{}.png", identifier), "", JobState::Finished)
        .await;
    controller.drain_job_changes().await.unwrap();

    assert!(!controller.is_idle());
    assert_eq!(controller.queue_index().queued_count(), 0);
    assert_eq!(controller.upload_state_of(0), Some(JobState::Finished));

    assert_eq!(controller.toggle_reupload(), 0);
    controller.select(0).unwrap();
    controller.select(1).unwrap();

    assert_eq!(controller.toggle_reupload(), 1);
    assert!(!controller.selection().contains(0));
    assert!(controller.selection().contains(1));

    media.open();
    controller.run_until_idle().await.unwrap();
}

#[tokio::test]
async fn test_select_all_waits_for_preparation() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::closed(vec![Some("a"), Some("b")]));
    let Harness {
        mut controller, ..
    } = harness(media.clone(), &temp.path().join("Uploads")).await;

    controller.source_changed().await.unwrap();
    assert!(matches!(
        controller.select_all(),
        Err(UploadError::PreparationPending { outstanding: 2 })
    ));
    assert!(controller.selection().is_empty());

    media.open();
    controller.run_until_idle().await.unwrap();
    assert_eq!(controller.select_all().unwrap(), 2);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_leaving_before_completion_leaves_items_new() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::closed(vec![Some("a"), Some("b")]));
    let Harness {
        mut controller,
        signal,
        ..
    } = harness(media.clone(), &temp.path().join("Uploads")).await;

    controller.source_changed().await.unwrap();
    assert!(signal.is_paused());

    assert_eq!(controller.leave(), 2);
    media.open();

    // Late results of the cancelled tasks are ignored
    let _ = tokio::time::timeout(Duration::from_millis(200), controller.process_next()).await;

    assert!(controller
        .items()
        .iter()
        .all(|item| item.state() == ItemState::New));
    assert!(!signal.is_paused());
    assert!(controller.is_idle());
}

#[tokio::test]
async fn test_leaving_drops_selection_of_unprepared_items() {
    let temp = TempDir::new().unwrap();
    let staging = temp.path().join("Uploads");
    let media = Arc::new(FakeClipboard::closed(vec![Some("a")]));
    let Harness {
        mut controller,
        store,
        ..
    } = harness(media.clone(), &staging).await;
    let mut events = controller.subscribe();

    controller.source_changed().await.unwrap();
    let identifier = controller.item(0).unwrap().identifier().to_string();
    controller.select(0).unwrap();
    controller.leave();

    assert!(controller.selection().is_empty());
    let mut cleared = false;
    while let Ok(event) = events.try_recv() {
        cleared |= matches!(event, CoreEvent::Selection(SelectionEvent::Cleared { count: 1 }));
    }
    assert!(cleared);

    assert!(matches!(
        controller.confirm(None, None).await,
        Err(UploadError::EmptySelection)
    ));
    assert!(store.jobs().await.unwrap().is_empty());
    assert!(!staging.join(format!("{}.png", identifier)).exists());
}

#[tokio::test]
async fn test_new_pass_starts_fresh() {
    let temp = TempDir::new().unwrap();
    let media = Arc::new(FakeClipboard::new(vec![Some("a"), Some("b")]));
    let Harness {
        mut controller, ..
    } = harness(media, &temp.path().join("Uploads")).await;

    controller.source_changed().await.unwrap();
    controller.run_until_idle().await.unwrap();
    controller.select(0).unwrap();
    let generation = controller.queue_index().generation();

    controller.source_changed().await.unwrap();

    assert!(controller.selection().is_empty());
    assert!(controller.queue_index().generation() > generation);
    assert!(controller
        .items()
        .iter()
        .all(|item| item.state() == ItemState::New));

    controller.run_until_idle().await.unwrap();
    assert!(controller
        .items()
        .iter()
        .all(|item| item.state() == ItemState::Ready));
}

// ============================================================================
// Staging directory
// ============================================================================

#[tokio::test]
async fn test_partial_files_are_purged_on_startup() {
    let temp = TempDir::new().unwrap();
    let staging = temp.path().join("Uploads");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join(".Clipboard-x.png.partial"), b"half").unwrap();
    std::fs::write(staging.join("Clipboard-y.png"), b"whole").unwrap();

    let media = Arc::new(FakeClipboard::new(vec![]));
    let _harness = harness(media, &staging).await;

    assert!(!staging.join(".Clipboard-x.png.partial").exists());
    assert!(staging.join("Clipboard-y.png").exists());
}

#[tokio::test]
async fn test_drop_folder_end_to_end() {
    let temp = TempDir::new().unwrap();
    let drop = temp.path().join("drop");
    std::fs::create_dir_all(&drop).unwrap();
    std::fs::write(drop.join("a.png"), png(30, 20)).unwrap();
    std::fs::write(drop.join("b.txt"), b"ignored").unwrap();

    let media = Arc::new(DirectoryMediaSource::new(&drop).with_source_tag("Drop"));
    let Harness {
        mut controller,
        store,
        ..
    } = harness(media, &temp.path().join("Uploads")).await;

    assert_eq!(controller.source_changed().await.unwrap(), 1);
    controller.run_until_idle().await.unwrap();

    let item = controller.item(0).unwrap();
    assert!(item.identifier().starts_with("Drop-"));
    assert!(item.identifier().ends_with("-img-0.png"));
    assert!(!item.thumbnail().is_placeholder());

    controller.select(0).unwrap();
    controller.confirm(None, None).await.unwrap();

    let jobs = store.jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(temp
        .path()
        .join("Uploads")
        .join(&jobs[0].source_identifier)
        .exists());
}

#[tokio::test]
async fn test_relative_staging_dir_uses_data_directory() {
    let temp = TempDir::new().unwrap();
    let fs = TokioFileSystem::with_data_directory(temp.path().join("data"));
    let config = IngestionConfig::builder()
        .staging_dir("Uploads")
        .file_system(Arc::new(fs))
        .build()
        .unwrap();
    let context = IngestionContext::new(
        Arc::new(FakeClipboard::new(vec![Some("a")])),
        Arc::new(InMemoryJobStore::new()),
        Arc::new(RecordingSignal::new()),
    );
    let mut controller = IngestionController::new(context, &config, 1).await.unwrap();

    controller.source_changed().await.unwrap();
    controller.run_until_idle().await.unwrap();

    let identifier = controller.item(0).unwrap().identifier().to_string();
    assert!(temp.path().join("data").join("Uploads").join(identifier).exists());
}
