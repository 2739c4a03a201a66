//! Event Bus implementation.
//!
//! One bus exists per controller context. Publishing is synchronous on the
//! caller's thread: subscribers for the event type run in priority order
//! before `publish` returns, and every publish lands in a bounded history.
//! Async consumers can additionally tail published records through a
//! broadcast receiver.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{Event, EventPayload, EventRecord, EventType};
use crate::clock::{Clock, MonotonicClock};

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Type alias for event handler functions
pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for broadcast.
    pub channel_capacity: usize,
    /// Maximum number of events to retain in history.
    pub max_history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            max_history_size: 500,
        }
    }
}

/// Error types for event bus operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventBusError {
    /// A subscriber returned an error
    #[error("Subscriber {id} failed handling {event_type}: {reason}")]
    HandlerFailed {
        id: SubscriptionId,
        event_type: EventType,
        reason: String,
    },
    /// A subscriber panicked
    #[error("Subscriber {id} panicked handling {event_type}")]
    HandlerPanicked {
        id: SubscriptionId,
        event_type: EventType,
    },
}

struct Subscriber {
    id: SubscriptionId,
    priority: i32,
    handler: EventHandler,
}

/// Central event bus for lane event distribution
pub struct EventBus {
    /// Broadcast channel sender
    sender: broadcast::Sender<EventRecord>,
    /// Subscribers per event type, highest priority first
    subscribers: RwLock<HashMap<EventType, Vec<Subscriber>>>,
    /// Bounded publish history
    history: Mutex<VecDeque<EventRecord>>,
    clock: Arc<dyn Clock>,
    /// Configuration
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a new event bus that timestamps records with `clock`
    pub fn with_clock(config: EventBusConfig, clock: Arc<dyn Clock>) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            subscribers: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(config.max_history_size)),
            clock,
            config,
        }
    }

    /// Subscribe to one event type
    ///
    /// Higher priorities run first; equal priorities run in subscription
    /// order. The handler runs on the publishing thread and may publish
    /// further events.
    pub fn subscribe<F>(
        &self,
        event_type: impl Into<EventType>,
        priority: i32,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = SubscriptionId::new();
        let mut subscribers = self.subscribers.write();
        let list = subscribers.entry(event_type.clone()).or_default();
        let position = list
            .iter()
            .position(|existing| existing.priority < priority)
            .unwrap_or(list.len());
        list.insert(
            position,
            Subscriber {
                id,
                priority,
                handler: Arc::new(handler),
            },
        );
        tracing::debug!("Subscription {} added for {}", id, event_type);
        id
    }

    /// Unsubscribe from an event type
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, event_type: impl Into<EventType>, id: SubscriptionId) -> bool {
        let event_type = event_type.into();
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|subscriber| subscriber.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&event_type);
        }
        if removed {
            tracing::debug!("Subscription {} removed from {}", id, event_type);
        }
        removed
    }

    /// Publish an event to every subscriber of its type
    ///
    /// Returns the number of subscribers that completed without error.
    /// A failing or panicking subscriber is logged and skipped.
    pub fn publish(&self, event_type: impl Into<EventType>, payload: EventPayload) -> usize {
        let event_type = event_type.into();
        let timestamp = payload
            .eventtime()
            .unwrap_or_else(|| self.clock.monotonic());
        let record = EventRecord {
            event_type: event_type.clone(),
            timestamp,
            payload,
        };
        self.add_to_history(&record);

        let handlers: Vec<(SubscriptionId, EventHandler)> = {
            let subscribers = self.subscribers.read();
            subscribers
                .get(&event_type)
                .map(|list| {
                    list.iter()
                        .map(|subscriber| (subscriber.id, subscriber.handler.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let event = Event {
            event_type: record.event_type.clone(),
            payload: record.payload.clone(),
        };

        // No receivers is fine
        let _ = self.sender.send(record);

        let mut handled = 0;
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => handled += 1,
                Ok(Err(err)) => {
                    let err = EventBusError::HandlerFailed {
                        id,
                        event_type: event.event_type.clone(),
                        reason: format!("{:#}", err),
                    };
                    tracing::error!("{}", err);
                }
                Err(_) => {
                    let err = EventBusError::HandlerPanicked {
                        id,
                        event_type: event.event_type.clone(),
                    };
                    tracing::error!("{}", err);
                }
            }
        }
        handled
    }

    /// Get a receiver for published records
    ///
    /// This is useful for async contexts where you want to receive events
    /// in a tokio task.
    pub fn receiver(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Number of subscribers for one event type
    pub fn subscriber_count(&self, event_type: impl Into<EventType>) -> usize {
        self.subscribers
            .read()
            .get(&event_type.into())
            .map_or(0, Vec::len)
    }

    /// Number of subscribers across every event type
    pub fn total_subscribers(&self) -> usize {
        self.subscribers.read().values().map(Vec::len).sum()
    }

    /// Copy of the history in publish order, optionally for one event type
    pub fn history(&self, event_type: Option<&EventType>) -> Vec<EventRecord> {
        let history = self.history.lock();
        match event_type {
            Some(event_type) => history
                .iter()
                .filter(|record| &record.event_type == event_type)
                .cloned()
                .collect(),
            None => history.iter().cloned().collect(),
        }
    }

    /// Clear event history
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Get the current configuration
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    fn add_to_history(&self, record: &EventRecord) {
        let mut history = self.history.lock();
        history.push_back(record.clone());
        while history.len() > self.config.max_history_size {
            history.pop_front();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.total_subscribers())
            .field("config", &self.config)
            .finish()
    }
}
