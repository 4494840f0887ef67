//! Fan-out of serialized events to live subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

pub type SubscriberId = u64;

/// Why a single delivery failed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber disconnected")]
    Disconnected,
    #[error("subscriber buffer full")]
    Lagging,
}

/// A live connection that receives broadcast payloads.
///
/// `deliver` must not block; it either hands the message off or fails.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, message: &Arc<str>) -> Result<(), DeliveryError>;
}

/// Subscriber backed by a bounded channel, drained by the transport layer.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, message: &Arc<str>) -> Result<(), DeliveryError> {
        match self.tx.try_send(Arc::clone(message)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Lagging),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Disconnected),
        }
    }
}

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanOutReport {
    pub delivered: usize,
    pub removed: usize,
}

/// Current subscriber set
pub struct Broadcaster {
    subscribers: Mutex<HashMap<SubscriberId, Box<dyn Subscriber>>>,
    next_id: AtomicU64,
    subscriber_buffer: usize,
}

impl Broadcaster {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            subscriber_buffer,
        }
    }

    /// Register a channel subscriber and return the receiving end.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Arc<str>>) {
        let (subscriber, rx) = ChannelSubscriber::new(self.subscriber_buffer);
        (self.add_subscriber(Box::new(subscriber)), rx)
    }

    pub fn add_subscriber(&self, subscriber: Box<dyn Subscriber>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.insert(id, subscriber);
            subscribers.len()
        };
        metrics::gauge!("broadcast_subscribers", count as f64);
        log::info!("Subscriber {} connected ({} active)", id, count);
        id
    }

    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = subscribers.remove(&id).is_some();
        metrics::gauge!("broadcast_subscribers", subscribers.len() as f64);
        removed
    }

    /// Drop every subscriber, closing their channels.
    ///
    /// # Returns
    ///
    /// * The number of subscribers removed
    pub fn clear(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = subscribers.len();
        subscribers.clear();
        metrics::gauge!("broadcast_subscribers", 0.0);
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Deliver `message` to every subscriber.
    ///
    /// Failed subscribers are collected during the pass and removed once it
    /// completes; a failure never stops delivery to the rest.
    pub fn fan_out(&self, message: &Arc<str>) -> FanOutReport {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report = FanOutReport::default();
        let mut dead = Vec::new();

        for (id, subscriber) in subscribers.iter() {
            match subscriber.deliver(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::debug!("Dropping subscriber {}: {}", id, e);
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            subscribers.remove(&id);
            report.removed += 1;
        }
        if report.removed > 0 {
            metrics::gauge!("broadcast_subscribers", subscribers.len() as f64);
            log::info!("Removed {} subscribers ({} active)", report.removed, subscribers.len());
        }
        report
    }
}
