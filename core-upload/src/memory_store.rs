//! In-memory [`UploadJobStore`].
//!
//! Batches are committed atomically and every mutation is broadcast in the
//! order it was applied. The `set_state`, `remove` and `insert_existing`
//! hooks play the part of the uploader and of other producers that change
//! the queue behind the pipeline's back.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::{JobChange, JobChangeKind, JobRecord, JobState, UploadDraft, UploadJobStore};
use std::collections::BTreeMap;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

const DEFAULT_CHANGE_CAPACITY: usize = 256;

#[derive(Default)]
struct StoreState {
    jobs: BTreeMap<u64, JobRecord>,
    next_id: u64,
    fail_next_submit: bool,
}

pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
    changes: broadcast::Sender<JobChange>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    /// `capacity` bounds how far a subscriber may lag before it has to
    /// re-read the snapshot.
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Mutex::new(StoreState {
                next_id: 1,
                ..StoreState::default()
            }),
            changes,
        }
    }

    /// Add a job created by some other producer.
    pub async fn insert_existing(
        &self,
        source_identifier: &str,
        content_digest: &str,
        state: JobState,
    ) -> JobRecord {
        let mut guard = self.state.lock().await;
        let record = Self::allocate(&mut guard, source_identifier, content_digest, state);
        self.publish(JobChangeKind::Insert, record.clone());
        record
    }

    /// Move a job to `state`, as the uploader would.
    pub async fn set_state(&self, job_id: &str, state: JobState) -> Result<JobRecord> {
        let mut guard = self.state.lock().await;
        let record = guard
            .jobs
            .get_mut(&parse_id(job_id)?)
            .ok_or_else(|| BridgeError::Store(format!("unknown job {}", job_id)))?;
        record.state = state;
        let record = record.clone();
        self.publish(JobChangeKind::Update, record.clone());
        Ok(record)
    }

    pub async fn remove(&self, job_id: &str) -> Result<JobRecord> {
        let mut guard = self.state.lock().await;
        let record = guard
            .jobs
            .remove(&parse_id(job_id)?)
            .ok_or_else(|| BridgeError::Store(format!("unknown job {}", job_id)))?;
        self.publish(JobChangeKind::Delete, record.clone());
        Ok(record)
    }

    /// Make the next `submit_batch` fail without persisting anything.
    pub async fn fail_next_submit(&self) {
        self.state.lock().await.fail_next_submit = true;
    }

    /// Broadcast an arbitrary notification without touching the jobs, for
    /// exercising how consumers handle changes a real store never sends.
    pub fn announce(&self, change: JobChange) {
        self.changes.send(change).ok();
    }

    fn allocate(
        state: &mut StoreState,
        source_identifier: &str,
        content_digest: &str,
        job_state: JobState,
    ) -> JobRecord {
        let id = state.next_id;
        state.next_id += 1;
        let record = JobRecord {
            job_id: id.to_string(),
            source_identifier: source_identifier.to_string(),
            content_digest: content_digest.to_string(),
            state: job_state,
        };
        state.jobs.insert(id, record.clone());
        record
    }

    fn publish(&self, kind: JobChangeKind, record: JobRecord) {
        // No subscribers is fine; the snapshot stays authoritative
        self.changes.send(JobChange::new(kind, record)).ok();
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_id(job_id: &str) -> Result<u64> {
    job_id
        .parse()
        .map_err(|_| BridgeError::Store(format!("malformed job id {}", job_id)))
}

#[async_trait]
impl UploadJobStore for InMemoryJobStore {
    async fn jobs(&self) -> Result<Vec<JobRecord>> {
        Ok(self.state.lock().await.jobs.values().cloned().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<JobChange> {
        self.changes.subscribe()
    }

    async fn submit_batch(&self, drafts: Vec<UploadDraft>) -> Result<Vec<JobRecord>> {
        let mut guard = self.state.lock().await;
        if std::mem::take(&mut guard.fail_next_submit) {
            return Err(BridgeError::Store("batch rejected".to_string()));
        }
        if let Some(draft) = drafts.iter().find(|d| d.source_identifier.is_empty()) {
            return Err(BridgeError::Store(format!(
                "draft for album {} has no source identifier",
                draft.destination_album
            )));
        }

        let records: Vec<JobRecord> = drafts
            .iter()
            .map(|draft| {
                Self::allocate(
                    &mut guard,
                    &draft.source_identifier,
                    &draft.content_digest,
                    JobState::Waiting,
                )
            })
            .collect();
        for record in &records {
            self.publish(JobChangeKind::Insert, record.clone());
        }

        debug!(count = records.len(), "Committed upload batch");
        Ok(records)
    }
}
