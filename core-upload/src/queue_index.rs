//! # Queue Index
//!
//! Read-mostly mirror of the persisted upload queue, kept current from the
//! job store's change stream.
//!
//! Two views are maintained:
//! - the non-indexed mirror, every known job keyed by job id; it is the
//!   source of truth inside the pipeline and survives working-set rebuilds
//! - the position-indexed mirror, one slot per working-set position, giving
//!   O(1) lookup of the job bound to that position
//!
//! A slot may only hold a job whose digest equals the digest of the item at
//! that position. Every rebuild of the working set clears all slots and bumps
//! the generation; callers holding results from an older pass are rejected
//! with [`UploadError::StaleGeneration`].
//!
//! Changes are applied as idempotent upserts so the outcome does not depend
//! on how notifications interleave with preparation results.

use crate::item::{JoinKey, SourceItem};
use crate::{Result, UploadError};
use bridge_traits::{JobChange, JobChangeKind, JobRecord, JobState};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Job bound to a working-set position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedJob {
    pub job_id: String,
    pub state: JobState,
}

/// What applying one change did to the working set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Positions whose slot now holds the job, in position order
    pub indexed: Vec<usize>,
    /// Positions whose item resolves to the job's join key, in position order
    pub matched: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct QueueIndex {
    generation: u64,
    indexed: Vec<Option<IndexedJob>>,
    jobs: BTreeMap<String, JobRecord>,
}

impl QueueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the non-indexed mirror with a store snapshot.
    pub fn load(&mut self, records: Vec<JobRecord>) {
        self.jobs = records
            .into_iter()
            .map(|record| (record.job_id.clone(), record))
            .collect();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Invalidate every slot and size the mirror for `len` positions.
    ///
    /// Returns the new generation.
    pub fn rebuild(&mut self, len: usize) -> u64 {
        self.generation += 1;
        self.indexed = vec![None; len];
        self.generation
    }

    /// Keep the slots whose `keep` flag is set, in order, and bump the
    /// generation.
    pub fn compact(&mut self, keep: &[bool]) -> u64 {
        let slots = std::mem::take(&mut self.indexed);
        self.indexed = slots
            .into_iter()
            .zip(keep.iter().copied().chain(std::iter::repeat(false)))
            .filter_map(|(slot, keep)| keep.then_some(slot))
            .collect();
        self.generation += 1;
        self.generation
    }

    /// Bind the freshly prepared `item` at `position` to a known job, if one
    /// matches its digest.
    pub fn bind(
        &mut self,
        generation: u64,
        position: usize,
        item: &SourceItem,
    ) -> Result<Option<IndexedJob>> {
        if generation != self.generation {
            return Err(UploadError::StaleGeneration {
                requested: generation,
                current: self.generation,
            });
        }
        let slot = self
            .indexed
            .get_mut(position)
            .ok_or(UploadError::UnknownPosition(position))?;

        *slot = lookup(&self.jobs, item);
        Ok(slot.clone())
    }

    /// State of the job bound to `position`
    pub fn state_at(&self, position: usize) -> Option<JobState> {
        self.indexed.get(position)?.as_ref().map(|job| job.state)
    }

    pub fn is_queued(&self, position: usize) -> bool {
        self.state_at(position).is_some()
    }

    /// Number of positions bound to a job
    pub fn queued_count(&self) -> usize {
        self.indexed.iter().filter(|slot| slot.is_some()).count()
    }

    /// Look a key up in the non-indexed mirror
    pub fn job_for(&self, key: &JoinKey) -> Option<&JobRecord> {
        self.jobs.values().find(|record| key.matches(record))
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values()
    }

    /// Whether any bound position maps to a finished job
    pub fn has_completed(&self) -> bool {
        self.indexed
            .iter()
            .flatten()
            .any(|job| job.state.is_completed())
    }

    /// Apply one change notification.
    ///
    /// A slot always holds the first job of the mirror matching the item at
    /// that position, so the result is the same whether a job arrives
    /// before or after the item is prepared.
    pub fn apply(&mut self, change: &JobChange, items: &[SourceItem]) -> Result<Reconciled> {
        let record = &change.record;
        match change.kind {
            JobChangeKind::Insert => {
                self.jobs.insert(record.job_id.clone(), record.clone());

                let mut reconciled = Reconciled::default();
                for (position, item) in items.iter().enumerate() {
                    if !item.join_key().matches(record) {
                        continue;
                    }
                    reconciled.matched.push(position);
                    let Some(slot) = self.indexed.get_mut(position) else {
                        continue;
                    };
                    *slot = lookup(&self.jobs, item);
                    if slot.as_ref().is_some_and(|job| job.job_id == record.job_id) {
                        reconciled.indexed.push(position);
                    }
                }
                if reconciled.matched.is_empty() {
                    debug!(job_id = %record.job_id, "Inserted job matches no position");
                }
                Ok(reconciled)
            }
            JobChangeKind::Update => {
                let Some(existing) = self.jobs.get_mut(&record.job_id) else {
                    debug!(job_id = %record.job_id, "Update for unknown job ignored");
                    return Ok(Reconciled::default());
                };
                *existing = record.clone();

                let mut reconciled = Reconciled::default();
                for (position, slot) in self.indexed.iter_mut().enumerate() {
                    if let Some(job) = slot.as_mut().filter(|job| job.job_id == record.job_id) {
                        job.state = record.state;
                        reconciled.indexed.push(position);
                    }
                }
                Ok(reconciled)
            }
            JobChangeKind::Delete => {
                self.jobs.remove(&record.job_id);
                for (position, slot) in self.indexed.iter_mut().enumerate() {
                    if slot.as_ref().is_some_and(|job| job.job_id == record.job_id) {
                        // Another job for the same content may still exist
                        *slot = items.get(position).and_then(|item| lookup(&self.jobs, item));
                    }
                }
                Ok(Reconciled::default())
            }
            JobChangeKind::Move => {
                error!(job_id = %record.job_id, "Upload jobs cannot be moved");
                Err(UploadError::IllegalChange {
                    job_id: record.job_id.clone(),
                    kind: change.kind.to_string(),
                })
            }
        }
    }
}

/// First job of the mirror matching a prepared item. Items without a
/// digest are never indexed.
fn lookup(jobs: &BTreeMap<String, JobRecord>, item: &SourceItem) -> Option<IndexedJob> {
    if !item.state().has_digest() {
        return None;
    }
    let key = item.join_key();
    jobs.values()
        .find(|record| key.matches(record))
        .map(|record| IndexedJob {
            job_id: record.job_id.clone(),
            state: record.state,
        })
}
