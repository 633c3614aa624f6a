//! Broadcast of items to independent subscriber queues.
//!
//! Every subscriber gets its own crossbeam channel. Delivery to one
//! subscriber never waits on another: unbounded queues always accept, and
//! bounded queues drop the item for that subscriber only when full.

use crate::stream::event::Event;
use crossbeam_channel::{Receiver, Sender, TrySendError};

struct Subscriber<T> {
    name: String,
    sender: Sender<T>,
    lossy: bool,
}

/// Delivers a clone of each published item to every subscriber, in
/// registration order.
pub struct FanOut<T: Clone> {
    subscribers: Vec<Subscriber<T>>,
    dropped: u64,
}

/// Fan-out for stream machine events.
pub type EventFanOut = FanOut<Event>;

impl<T: Clone> FanOut<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            dropped: 0,
        }
    }

    /// Register a subscriber with an unbounded queue.
    pub fn subscribe(&mut self, name: &str) -> Receiver<T> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.subscribers.push(Subscriber {
            name: name.to_string(),
            sender,
            lossy: false,
        });
        receiver
    }

    /// Register a subscriber with a bounded queue of `capacity` items.
    ///
    /// When the queue is full, new items are dropped for this subscriber.
    pub fn subscribe_bounded(&mut self, name: &str, capacity: usize) -> Receiver<T> {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        self.subscribers.push(Subscriber {
            name: name.to_string(),
            sender,
            lossy: true,
        });
        receiver
    }

    /// Deliver `item` to every subscriber.
    ///
    /// Subscribers whose receiver has been dropped are removed.
    pub fn publish(&mut self, item: T) {
        let mut dropped = 0;
        self.subscribers.retain(|subscriber| {
            let result = if subscriber.lossy {
                subscriber.sender.try_send(item.clone())
            } else {
                subscriber
                    .sender
                    .send(item.clone())
                    .map_err(|e| TrySendError::Disconnected(e.0))
            };
            match result {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::info!("Subscriber '{}' went away, removing it", subscriber.name);
                    false
                }
            }
        });
        self.dropped += dropped;
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Items dropped on full bounded queues since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

impl<T: Clone> Default for FanOut<T> {
    fn default() -> Self {
        Self::new()
    }
}
