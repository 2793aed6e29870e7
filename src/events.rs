//! Event Bus (spec §4.5, component C5).
//!
//! Topic-based pub/sub with bounded buffering and drop-oldest-on-overflow
//! semantics, so a slow subscriber can never stall the publishing side
//! (spec §4.5, §9 "prefer channel-/queue-backed subscribers with bounded
//! buffers over callback chains"). Built on `tokio::sync::broadcast`,
//! whose ring-buffer-with-lag-detection is exactly the "drop the oldest
//! buffered event, never block the publisher" contract spec §4.5 asks
//! for: `send` never blocks or fails on a full buffer, and a subscriber
//! that falls behind observes `Lagged(n)` for the events it missed rather
//! than stalling delivery to anyone else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

/// Topics published on the bus (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    JobCreated,
    JobStarted,
    JobProgress,
    JobCompleted,
    JobFailed,
    JobRetrying,
    JobCanceled,
    ScanProgress,
    ScanDuplicate,
    ScanCompleted,
    ScanFailed,
    CacheHit,
    CacheMiss,
}

/// One event on the bus. `payload` is already-serialized JSON so the bus
/// itself stays generic over whatever the publisher produced (spec §6
/// "the engine does not mandate a wire format").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub job_id: Option<String>,
    pub scan_id: Option<String>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(topic: Topic, payload: serde_json::Value) -> Self {
        Self {
            topic,
            timestamp: chrono::Utc::now(),
            job_id: None,
            scan_id: None,
            payload,
        }
    }

    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn with_scan_id(mut self, id: impl Into<String>) -> Self {
        self.scan_id = Some(id.into());
        self
    }
}

/// A filter predicate a subscriber registers with (spec §4.5 "Subscribers
/// register with a filter predicate").
pub type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

pub fn all_topics() -> Filter {
    Arc::new(|_| true)
}

pub fn only(topics: Vec<Topic>) -> Filter {
    Arc::new(move |e: &Event| topics.contains(&e.topic))
}

const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// The bus itself: holds no event data beyond active subscriptions (spec
/// §3 "Event Bus holds no data beyond active subscriptions") — the ring
/// buffer lives inside the `broadcast` channel, not in any state this
/// struct owns directly.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    subscriber_count: Arc<std::sync::atomic::AtomicUsize>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription handle returned by [`EventBus::subscribe`]. Wraps the
/// raw broadcast receiver with the registered filter predicate, so a
/// subscriber only ever observes events it asked for.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: Filter,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Waits for the next event matching this subscription's filter.
    /// Returns `None` once the bus itself has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll, for tests and CLI snapshots.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if (self.filter)(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                }
                Err(_) => return None,
            }
        }
    }

    /// How many events have been dropped for this subscriber due to
    /// overflow (spec §4.5 "records a drop count").
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscriber_count: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }

    /// Register a new subscriber with a filter predicate (spec §4.5).
    /// Delivery never blocks the publisher: on overflow the subscriber's
    /// next `recv` surfaces a drop count for whatever it missed rather
    /// than the publish side ever waiting on it.
    pub async fn subscribe(&self, filter: Filter) -> Subscription {
        self.subscriber_count.fetch_add(1, Ordering::Relaxed);
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Deprecated in favor of per-bus capacity, kept for call-site symmetry
    /// with the old mpsc-backed API: `capacity` is accepted but the actual
    /// ring buffer size is fixed at bus construction (`with_capacity`).
    pub async fn subscribe_with_capacity(&self, filter: Filter, _capacity: usize) -> Subscription {
        self.subscribe(filter).await
    }

    /// Publish to every subscriber. Never blocks: `broadcast::Sender::send`
    /// only fails when there are no receivers at all, which is not an
    /// error condition here (spec §4.5 "best-effort").
    pub async fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }
}
