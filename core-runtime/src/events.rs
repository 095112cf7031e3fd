//! # Event Bus System
//!
//! Provides an event-driven architecture for the upload pipeline using `tokio::sync::broadcast`.
//! Hosts subscribe to learn when a preparation pass starts, when items become
//! selectable, and when batches reach the upload queue.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for each pipeline stage
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │  Ingestion   ├──────────────>│           │
//! └──────────────┘               │           │
//!                                │ EventBus  │
//! ┌──────────────┐     emit      │ (broadcast│     subscribe    ┌────────────┐
//! │  Selection   ├──────────────>│  channel) ├─────────────────>│    Host    │
//! └──────────────┘               │           │                  └────────────┘
//!                                │           │
//! ┌──────────────┐     emit      │           │
//! │ Queue index  ├──────────────>│           │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, IngestionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Ingestion(IngestionEvent::PassStarted {
//!         generation: 1,
//!         item_count: 3,
//!     }))
//!     .ok();
//!
//! assert!(matches!(stream.recv().await, Ok(CoreEvent::Ingestion(_))));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting with no subscribers returns an error which producers ignore with
//! `.ok()`; events are notifications, never the source of truth.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Preparation pass lifecycle
    Ingestion(IngestionEvent),
    /// Selection changes the user did not directly ask for
    Selection(SelectionEvent),
    /// Upload queue interactions
    Queue(QueueEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Ingestion(e) => e.description(),
            CoreEvent::Selection(e) => e.description(),
            CoreEvent::Queue(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Ingestion(IngestionEvent::PassFailed { .. }) => EventSeverity::Error,
            CoreEvent::Queue(QueueEvent::IllegalChange { .. }) => EventSeverity::Error,
            CoreEvent::Ingestion(IngestionEvent::ItemFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Selection(SelectionEvent::Revoked { .. }) => EventSeverity::Warning,
            CoreEvent::Ingestion(IngestionEvent::PassIdle { .. }) => EventSeverity::Info,
            CoreEvent::Queue(QueueEvent::BatchSubmitted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Ingestion Events
// ============================================================================

/// Events describing one preparation pass over the media source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum IngestionEvent {
    /// A new working set was enumerated and preparation was scheduled.
    PassStarted {
        /// Generation of the queue index built for this pass.
        generation: u64,
        /// Number of items in the working set.
        item_count: usize,
    },
    /// An item was staged and is ready for display and selection.
    ItemPrepared {
        position: usize,
        /// Staged file name including extension.
        identifier: String,
        /// Upload state of the matching job, if one is already queued.
        queued_state: Option<String>,
    },
    /// Preparation of an item failed; it will be pruned when the pass idles.
    ItemFailed {
        position: usize,
        message: String,
    },
    /// Every scheduled task finished and failed items were pruned.
    PassIdle {
        generation: u64,
        /// Items remaining in the working set.
        ready: usize,
        /// Items removed because preparation failed.
        pruned: usize,
    },
    /// Staging failures ended the pass without any item failing alone.
    PassFailed {
        generation: u64,
        message: String,
    },
    /// Outstanding preparation was cancelled.
    PassCancelled {
        generation: u64,
        /// Tasks that had not finished when cancelled.
        outstanding: usize,
    },
}

impl IngestionEvent {
    fn description(&self) -> &str {
        match self {
            IngestionEvent::PassStarted { .. } => "Preparation pass started",
            IngestionEvent::ItemPrepared { .. } => "Item prepared",
            IngestionEvent::ItemFailed { .. } => "Item preparation failed",
            IngestionEvent::PassIdle { .. } => "Preparation pass idle",
            IngestionEvent::PassFailed { .. } => "Preparation pass failed",
            IngestionEvent::PassCancelled { .. } => "Preparation pass cancelled",
        }
    }
}

// ============================================================================
// Selection Events
// ============================================================================

/// Events for selection changes driven by the pipeline rather than the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SelectionEvent {
    /// A selected item was queued elsewhere and lost its selection.
    Revoked { position: usize },
    /// The selection was emptied (new pass or confirmed batch).
    Cleared { count: usize },
    /// Re-upload permission changed.
    ReuploadToggled {
        allowed: bool,
        /// Selections dropped because their job already completed.
        deselected: usize,
    },
}

impl SelectionEvent {
    fn description(&self) -> &str {
        match self {
            SelectionEvent::Revoked { .. } => "Selection revoked",
            SelectionEvent::Cleared { .. } => "Selection cleared",
            SelectionEvent::ReuploadToggled { .. } => "Re-upload permission toggled",
        }
    }
}

// ============================================================================
// Queue Events
// ============================================================================

/// Events for interactions with the persisted upload queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// Confirmed selection was handed to the job store.
    BatchSubmitted { count: usize },
    /// A job change bound a queue entry to a working-set position.
    JobIndexed {
        position: usize,
        job_id: String,
        state: String,
    },
    /// The job store reported a change kind that is never expected.
    IllegalChange { job_id: String, kind: String },
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::BatchSubmitted { .. } => "Batch submitted to upload queue",
            QueueEvent::JobIndexed { .. } => "Upload job indexed",
            QueueEvent::IllegalChange { .. } => "Illegal upload queue change",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let queue_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Queue(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events that match `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pass_started(generation: u64) -> CoreEvent {
        CoreEvent::Ingestion(IngestionEvent::PassStarted {
            generation,
            item_count: 3,
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(pass_started(1)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Queue(QueueEvent::BatchSubmitted { count: 2 });
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream =
            EventStream::new(bus.subscribe()).filter(|event| matches!(event, CoreEvent::Queue(_)));

        bus.emit(pass_started(1)).ok();
        let queue_event = CoreEvent::Queue(QueueEvent::JobIndexed {
            position: 0,
            job_id: "7".to_string(),
            state: "waiting".to_string(),
        });
        bus.emit(queue_event.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), queue_event);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for generation in 0..5 {
            bus.emit(pass_started(generation)).ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Ingestion(IngestionEvent::PassFailed {
            generation: 1,
            message: "disk full".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let revoked = CoreEvent::Selection(SelectionEvent::Revoked { position: 4 });
        assert_eq!(revoked.severity(), EventSeverity::Warning);

        let idle = CoreEvent::Ingestion(IngestionEvent::PassIdle {
            generation: 1,
            ready: 2,
            pruned: 1,
        });
        assert_eq!(idle.severity(), EventSeverity::Info);

        assert_eq!(pass_started(1).severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_description() {
        let event = CoreEvent::Selection(SelectionEvent::ReuploadToggled {
            allowed: false,
            deselected: 2,
        });
        assert_eq!(event.description(), "Re-upload permission toggled");
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let handle1 = tokio::spawn(async move {
            for position in 0..10 {
                bus1.emit(CoreEvent::Selection(SelectionEvent::Revoked { position }))
                    .ok();
            }
        });
        let handle2 = tokio::spawn(async move {
            for position in 0..10 {
                bus2.emit(CoreEvent::Ingestion(IngestionEvent::ItemFailed {
                    position,
                    message: "no encoding".to_string(),
                }))
                .ok();
            }
        });

        handle1.await.ok();
        handle2.await.ok();

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Ingestion(IngestionEvent::ItemPrepared {
            position: 1,
            identifier: "Clipboard-20240316-1230450123-img-1.png".to_string(),
            queued_state: Some("finished".to_string()),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ItemPrepared"));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        let event = CoreEvent::Selection(SelectionEvent::Cleared { count: 3 });
        bus.emit(event.clone()).ok();

        let received = stream.try_recv().unwrap().unwrap();
        assert_eq!(received, event);
    }
}
