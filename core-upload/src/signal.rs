//! [`UploadSignal`] that records what it was asked to do.

use bridge_traits::UploadSignal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Counts pause, resume and wake calls and tracks whether the uploader
/// would currently be paused.
#[derive(Debug, Default)]
pub struct RecordingSignal {
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    wakes: AtomicUsize,
    paused: AtomicBool,
}

impl RecordingSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn wakes(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl UploadSignal for RecordingSignal {
    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    fn wake(&self) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_calls() {
        let signal = RecordingSignal::new();
        signal.pause();
        assert!(signal.is_paused());
        signal.resume();
        signal.wake();

        assert!(!signal.is_paused());
        assert_eq!(
            (signal.pauses(), signal.resumes(), signal.wakes()),
            (1, 1, 1)
        );
    }
}
