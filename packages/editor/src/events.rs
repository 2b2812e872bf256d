//! # Editor Events
//!
//! Broadcast to renderers, history UIs and sync layers after every
//! transaction. Publishing never waits for subscribers and never fails when
//! there are none.

use crate::errors::TransactionError;
use crate::transaction::TransactionRecord;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum EditorEvent {
    TransactionCommitted(Arc<TransactionRecord>),
    TransactionFailed {
        transaction_id: String,
        errors: Vec<TransactionError>,
    },
}

impl EditorEvent {
    pub fn transaction_id(&self) -> &str {
        match self {
            EditorEvent::TransactionCommitted(record) => &record.id,
            EditorEvent::TransactionFailed { transaction_id, .. } => transaction_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EditorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: EditorEvent) {
        let id = event.transaction_id().to_string();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::trace!(transaction_id = %id, receivers, "[EventBus] published")
            }
            Err(_) => tracing::trace!(transaction_id = %id, "[EventBus] no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.sender.subscribe()
    }

    /// Events as a stream. Subscribers that fall behind skip what they missed.
    pub fn stream(&self) -> impl Stream<Item = EditorEvent> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(
            |event: Result<EditorEvent, BroadcastStreamRecvError>| match event {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "[EventBus] subscriber lagged");
                    None
                }
            },
        )
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
