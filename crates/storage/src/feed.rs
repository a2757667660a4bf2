//! Change-event fan-out from the authoritative store to subscribers.

use partsync_core::ChangeEvent;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

pub const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The subscriber fell behind and `n` events were dropped. Missed events are not
    /// replayed; the subscriber must refetch.
    #[error("feed lagged by {0} events")]
    Lagged(u64),

    #[error("feed closed")]
    Closed,

    #[error("undecodable feed frame: {0}")]
    Decode(String),
}

/// Sending half. Events travel as msgpack frames.
#[derive(Debug, Clone)]
pub struct FeedPublisher {
    tx: broadcast::Sender<Vec<u8>>,
}

impl FeedPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: &ChangeEvent) {
        match event.to_msgpack() {
            Ok(frame) => self.publish_frame(frame),
            Err(e) => warn!(id = %event.record_id(), error = %e, "dropping unencodable change event"),
        }
    }

    /// Send an already-encoded frame. No subscribers is not an error.
    pub fn publish_frame(&self, frame: Vec<u8>) {
        let _ = self.tx.send(frame);
    }

    pub fn subscribe(&self) -> ChangeFeed {
        ChangeFeed {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FeedPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// A subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeFeed {
    rx: broadcast::Receiver<Vec<u8>>,
}

impl ChangeFeed {
    pub async fn recv(&mut self) -> Result<ChangeEvent, FeedError> {
        match self.rx.recv().await {
            Ok(frame) => {
                ChangeEvent::from_msgpack(&frame).map_err(|e| FeedError::Decode(e.to_string()))
            }
            Err(broadcast::error::RecvError::Lagged(n)) => Err(FeedError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(FeedError::Closed),
        }
    }
}
