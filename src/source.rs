//! Raw event feeds from the external watch mechanism.
//!
//! A [`WatchSource`] hands out one [`EventFeed`] per resource kind. Feeds
//! deliver [`RawEvent`]s that carry no selector knowledge; scoping happens
//! downstream in the transition filter. The bundled [`InMemorySource`] is a
//! broadcast implementation suitable for embedding and for tests: pushes
//! never block the producer, and slow subscribers lose events rather than
//! stall the stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::resource::{Deployment, Node, Pod, WatchedResource};

/// Default per-subscription buffer capacity.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// A lifecycle event as emitted by the watch mechanism.
///
/// `Modified` carries both payloads so downstream consumers can reclassify
/// the event against a selector without keeping their own shadow state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent<T> {
    /// The resource came into existence.
    Added {
        /// The new resource.
        object: T,
    },
    /// The resource changed; both versions are carried.
    Modified {
        /// The resource before the change.
        old: T,
        /// The resource after the change.
        new: T,
    },
    /// The resource ceased to exist.
    Deleted {
        /// The last seen version of the resource.
        object: T,
    },
}

/// Errors raised when attaching to a feed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The source declined the subscription.
    #[error("Feed refused the subscription: {reason}")]
    Refused {
        /// Why the source declined.
        reason: String,
    },
}

/// One kind's stream of raw events.
///
/// Each call to [`subscribe`](EventFeed::subscribe) attaches an independent
/// consumer with its own buffer; subscribers do not steal events from each
/// other.
pub trait EventFeed<T: WatchedResource>: Send + Sync {
    /// Attaches a consumer and returns its receiving end.
    ///
    /// # Errors
    /// Returns [`FeedError::Refused`] when the source will not accept more
    /// subscribers.
    fn subscribe(&self) -> Result<Receiver<RawEvent<T>>, FeedError>;
}

/// The external watch mechanism: one feed per resource kind.
pub trait WatchSource: Send + Sync {
    /// The node event feed.
    fn node_feed(&self) -> Arc<dyn EventFeed<Node>>;

    /// The pod event feed.
    fn pod_feed(&self) -> Arc<dyn EventFeed<Pod>>;

    /// The deployment event feed.
    fn deployment_feed(&self) -> Arc<dyn EventFeed<Deployment>>;
}

/// A broadcast feed backed by bounded per-subscriber channels.
///
/// Pushes use non-blocking `try_send`: a subscriber that falls behind has
/// events dropped (and counted) instead of applying backpressure to the
/// producer.
#[derive(Debug)]
pub struct InMemoryFeed<T: WatchedResource> {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<RawEvent<T>>>>,
    refusing: AtomicBool,
    dropped_events: AtomicU64,
}

impl<T: WatchedResource> InMemoryFeed<T> {
    /// Creates a feed whose subscribers buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            refusing: AtomicBool::new(false),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Broadcasts one event to every live subscriber.
    ///
    /// Disconnected subscribers are pruned; full ones lose the event and the
    /// drop counter advances.
    pub fn push(&self, event: RawEvent<T>) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            error!(kind = %T::KIND, "subscriber lock poisoned, discarding event");
            return;
        };
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Broadcasts an `Added` event.
    pub fn push_added(&self, object: T) {
        self.push(RawEvent::Added { object });
    }

    /// Broadcasts a `Modified` event.
    pub fn push_modified(&self, old: T, new: T) {
        self.push(RawEvent::Modified { old, new });
    }

    /// Broadcasts a `Deleted` event.
    pub fn push_deleted(&self, object: T) {
        self.push(RawEvent::Deleted { object });
    }

    /// Makes subsequent `subscribe` calls fail, or lifts the refusal.
    ///
    /// Existing subscribers keep receiving. This simulates a source outage
    /// without tearing the feed down.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::Release);
    }

    /// Events lost to full subscriber buffers since creation.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Number of live subscribers.
    ///
    /// Disconnected subscribers are only pruned on push, so this may lag
    /// until the next event.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }
}

impl<T: WatchedResource> EventFeed<T> for InMemoryFeed<T> {
    fn subscribe(&self) -> Result<Receiver<RawEvent<T>>, FeedError> {
        if self.refusing.load(Ordering::Acquire) {
            return Err(FeedError::Refused {
                reason: "feed is refusing new subscriptions".to_string(),
            });
        }
        let mut subscribers = self.subscribers.lock().map_err(|_| FeedError::Refused {
            reason: "subscriber lock poisoned".to_string(),
        })?;
        let (tx, rx) = bounded(self.capacity);
        subscribers.push(tx);
        Ok(rx)
    }
}

/// An in-process [`WatchSource`] with one broadcast feed per kind.
///
/// Producers push through the typed accessors; consumers subscribe through
/// the [`WatchSource`] trait. Both sides see the same feeds.
#[derive(Debug)]
pub struct InMemorySource {
    nodes: Arc<InMemoryFeed<Node>>,
    pods: Arc<InMemoryFeed<Pod>>,
    deployments: Arc<InMemoryFeed<Deployment>>,
}

impl InMemorySource {
    /// Creates a source with [`DEFAULT_FEED_CAPACITY`] buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Creates a source whose subscribers buffer up to `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Arc::new(InMemoryFeed::new(capacity)),
            pods: Arc::new(InMemoryFeed::new(capacity)),
            deployments: Arc::new(InMemoryFeed::new(capacity)),
        }
    }

    /// The node feed, for producers.
    #[must_use]
    pub fn nodes(&self) -> Arc<InMemoryFeed<Node>> {
        Arc::clone(&self.nodes)
    }

    /// The pod feed, for producers.
    #[must_use]
    pub fn pods(&self) -> Arc<InMemoryFeed<Pod>> {
        Arc::clone(&self.pods)
    }

    /// The deployment feed, for producers.
    #[must_use]
    pub fn deployments(&self) -> Arc<InMemoryFeed<Deployment>> {
        Arc::clone(&self.deployments)
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchSource for InMemorySource {
    fn node_feed(&self) -> Arc<dyn EventFeed<Node>> {
        self.nodes()
    }

    fn pod_feed(&self) -> Arc<dyn EventFeed<Pod>> {
        self.pods()
    }

    fn deployment_feed(&self) -> Arc<dyn EventFeed<Deployment>> {
        self.deployments()
    }
}
