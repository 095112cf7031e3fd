//! # Preparation Scheduler
//!
//! Runs keyed tasks on the tokio runtime and reports each completion on a
//! channel that the owner drains from its serial context.
//!
//! - A key with a task in flight is never scheduled twice.
//! - An optional semaphore bounds how many tasks run at once.
//! - [`cancel_all`](PreparationScheduler::cancel_all) cancels the shared
//!   token; tasks still waiting for a permit complete without running.
//! - In-flight bookkeeping is only released by
//!   [`finish`](PreparationScheduler::finish), so [`is_idle`](PreparationScheduler::is_idle)
//!   reflects completions the owner has actually applied.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Report of one finished task
#[derive(Debug)]
pub struct Completion<K, T> {
    pub key: K,
    ticket: u64,
    /// `None` when the task was cancelled before it started
    pub output: Option<T>,
}

pub struct PreparationScheduler<K, T> {
    in_flight: HashMap<K, u64>,
    next_ticket: u64,
    cancel: CancellationToken,
    permits: Option<Arc<Semaphore>>,
    tx: mpsc::UnboundedSender<Completion<K, T>>,
}

impl<K, T> PreparationScheduler<K, T>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
    T: Send + 'static,
{
    /// Create a scheduler and the receiver its completions arrive on.
    /// `max_concurrent` of `None` runs every task immediately.
    pub fn new(max_concurrent: Option<usize>) -> (Self, mpsc::UnboundedReceiver<Completion<K, T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            in_flight: HashMap::new(),
            next_ticket: 0,
            cancel: CancellationToken::new(),
            permits: max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            tx,
        };
        (scheduler, rx)
    }

    /// Spawn the task built by `make` under `key`.
    ///
    /// Returns `false` without spawning if `key` is already in flight.
    pub fn schedule<F, Fut>(&mut self, key: K, make: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if self.in_flight.contains_key(&key) {
            debug!(key = ?key, "Task already in flight");
            return false;
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight.insert(key.clone(), ticket);

        let cancel = self.cancel.clone();
        let permits = self.permits.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let _permit = match permits {
                Some(semaphore) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                },
                None => None,
            };

            let output = if cancel.is_cancelled() {
                None
            } else {
                Some(make(cancel).await)
            };

            // The receiver is gone only when the owner was dropped
            tx.send(Completion {
                key,
                ticket,
                output,
            })
            .ok();
        });

        true
    }

    /// Cancel every outstanding task and forget about them. Idempotent.
    ///
    /// Returns the number of tasks that were outstanding.
    pub fn cancel_all(&mut self) -> usize {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        let outstanding = self.in_flight.len();
        self.in_flight.clear();
        outstanding
    }

    /// Release the bookkeeping for `completion`.
    ///
    /// Returns `false` for completions of tasks that were cancelled or
    /// superseded; their output must be ignored.
    pub fn finish(&mut self, completion: &Completion<K, T>) -> bool {
        if self.in_flight.get(&completion.key) == Some(&completion.ticket) {
            self.in_flight.remove(&completion.key);
            true
        } else {
            false
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_no_duplicate_scheduling() {
        let (mut scheduler, mut rx) = PreparationScheduler::<usize, usize>::new(None);
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        for _ in 0..2 {
            let runs = runs.clone();
            let gate = gate.clone();
            scheduler.schedule(2, move |_| async move {
                gate.notified().await;
                runs.fetch_add(1, Ordering::SeqCst)
            });
        }
        assert_eq!(scheduler.in_flight(), 1);
        assert!(!scheduler.is_idle());

        gate.notify_one();
        let completion = rx.recv().await.unwrap();
        assert!(scheduler.finish(&completion));
        assert!(scheduler.is_idle());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let (mut scheduler, mut rx) = PreparationScheduler::<usize, ()>::new(Some(1));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for key in 0..4 {
            let active = active.clone();
            let peak = peak.clone();
            scheduler.schedule(key, move |_| async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }

        while !scheduler.is_idle() {
            let completion = rx.recv().await.unwrap();
            assert!(completion.output.is_some());
            scheduler.finish(&completion);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_before_start() {
        let (mut scheduler, mut rx) = PreparationScheduler::<usize, ()>::new(Some(1));
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        {
            let gate = gate.clone();
            scheduler.schedule(0, move |cancel| async move {
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = cancel.cancelled() => {}
                }
            });
        }
        for key in 1..3 {
            let runs = runs.clone();
            scheduler.schedule(key, move |_| async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(scheduler.cancel_all(), 3);
        assert_eq!(scheduler.cancel_all(), 0);
        assert!(scheduler.is_idle());

        for _ in 0..3 {
            let completion = rx.recv().await.unwrap();
            assert!(!scheduler.finish(&completion), "stale completion");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rescheduled_key_ignores_stale_completion() {
        let (mut scheduler, mut rx) = PreparationScheduler::<usize, &'static str>::new(None);

        scheduler.schedule(0, |_| async { "old" });
        scheduler.cancel_all();
        scheduler.schedule(0, |_| async { "new" });

        let mut accepted = Vec::new();
        for _ in 0..2 {
            let completion = rx.recv().await.unwrap();
            if scheduler.finish(&completion) {
                accepted.push(completion.output);
            }
        }
        assert_eq!(accepted, vec![Some("new")]);
        assert!(scheduler.is_idle());
    }
}
