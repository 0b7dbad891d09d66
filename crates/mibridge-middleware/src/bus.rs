//! In-process loopback message bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others. It stands in for the broker when the bridge runs without a
//! real transport (the CLI and the integration tests).

use mibridge_types::BusMessage;
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 256;

/// Shared loopback bus. Clone it cheaply – all clones share the same
/// underlying broadcast channel.
#[derive(Clone, Debug)]
pub struct LoopbackBus {
    sender: broadcast::Sender<BusMessage>,
}

impl LoopbackBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a message to every current subscriber.
    ///
    /// Returns the number of subscribers handed the message, or `0` when
    /// nobody is listening, which is a normal condition on a broker too.
    pub fn publish(&self, message: BusMessage) -> usize {
        self.sender.send(message).unwrap_or(0)
    }

    /// Subscribe to every message on the bus.
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Subscribe to messages on exactly `topic`.
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> TopicSubscriber {
        TopicSubscriber {
            topic: topic.into(),
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A subscriber that only delivers messages published on one topic.
pub struct TopicSubscriber {
    topic: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl TopicSubscriber {
    /// Wait for the next message on this subscriber's topic.
    ///
    /// Returns `None` when the bus is closed and no further messages will
    /// arrive.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.topic == self.topic => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "TopicSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next already-buffered message on this topic, if any.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) if message.topic == self.topic => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "TopicSubscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
