//! Kafka-to-AMQP sink bridging
//!
//! This module provides:
//! - The sink endpoint state machine driving an AMQP sender link
//! - A Kafka consumer worker on a dedicated thread feeding the endpoint
//! - Per-partition offset tracking for at-least-once delivery
//! - Pluggable Kafka-record-to-AMQP-message converters
//! - The shared handoff types bridging the two execution domains

mod address;
mod context;
mod converter;
mod sink;
mod tracker;
mod worker;

pub use address::{ConsumerFilters, SinkAddress};
pub use context::EndpointContext;
pub use converter::{
    converter_for, ConvertError, DefaultConverter, JsonConverter, MessageConverter,
    CONVERTER_DEFAULT, CONVERTER_JSON,
};
pub use sink::{EndpointHandle, EndpointState, SinkEndpoint};
pub use tracker::OffsetTracker;
pub use worker::{ConsumerWorker, KafkaWorkerLauncher, WorkerHandle, WorkerLauncher};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::amqp::{DeliveryOutcome, DeliveryTag};

/// Staged records above this count pause the Kafka consumer until the
/// reactor drains the backlog.
pub const QUEUE_THRESHOLD: usize = 1024;

/// A record read from Kafka, immutable once staged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaRecord {
    /// Source topic
    pub topic: String,

    /// Source partition
    pub partition: i32,

    /// Source offset
    pub offset: i64,

    /// Record key, if any
    pub key: Option<Vec<u8>>,

    /// Record payload
    pub value: Vec<u8>,
}

/// Control message posted by the consumer worker to the endpoint reactor
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A record has been staged under the given tag and awaits dispatch
    Send(DeliveryTag),

    /// Partitions have been assigned; the link may be opened
    Assigned,

    /// The Kafka consumer hit an unrecoverable error
    Error {
        /// AMQP error condition symbol to report on the link
        condition: String,
        /// Human-readable description
        description: String,
    },
}

/// Event posted by the AMQP transport into the endpoint reactor
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The peer settled a previously unsettled transfer
    Settled {
        /// Tag of the settled transfer
        tag: DeliveryTag,
        /// Outcome reported by the peer
        outcome: DeliveryOutcome,
    },

    /// Credit is available again on the link
    SendQueueDrain,

    /// The remote receiver detached the link
    RemoteDetach,

    /// The remote peer closed the connection
    RemoteClose,
}

/// Any event consumed by the endpoint reactor, in post order
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// Posted by the consumer worker
    Worker(Notification),

    /// Posted by the AMQP transport
    Link(LinkEvent),

    /// Local close requested by the endpoint owner
    Close,
}

/// Shared staging map holding records between poll and dispatch.
///
/// The worker inserts under freshly minted tags; the reactor removes on
/// dispatch and clears on tear-down. One map exists per endpoint, named by
/// the context's handoff name.
#[derive(Debug, Clone, Default)]
pub struct StagingMap {
    inner: Arc<Mutex<HashMap<DeliveryTag, KafkaRecord>>>,
}

impl StagingMap {
    /// Create an empty staging map
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a record under its tag
    pub fn insert(&self, tag: DeliveryTag, record: KafkaRecord) {
        self.inner.lock().unwrap().insert(tag, record);
    }

    /// Remove and return the record staged under the tag, if present
    pub fn remove(&self, tag: &DeliveryTag) -> Option<KafkaRecord> {
        self.inner.lock().unwrap().remove(tag)
    }

    /// Number of records currently staged
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Whether no records are staged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all staged records
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

/// Worker-side handle for posting notifications into the endpoint reactor.
///
/// Sends never block; if the reactor is gone the notification is dropped,
/// which only happens during tear-down.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::UnboundedSender<EndpointEvent>,
}

impl NotificationSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EndpointEvent>) -> Self {
        NotificationSender { tx }
    }

    /// Post a notification to the reactor
    pub fn send(&self, notification: Notification) {
        let _ = self.tx.send(EndpointEvent::Worker(notification));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(partition: i32, offset: i64) -> KafkaRecord {
        KafkaRecord {
            topic: "events".to_string(),
            partition,
            offset,
            key: None,
            value: b"payload".to_vec(),
        }
    }

    #[test]
    fn test_staging_map_insert_remove() {
        let staging = StagingMap::new();
        let tag = DeliveryTag::new(1);

        staging.insert(tag, record(0, 10));
        assert_eq!(staging.len(), 1);

        let removed = staging.remove(&tag).expect("staged record");
        assert_eq!(removed.offset, 10);
        assert!(staging.is_empty());

        // second removal observes nothing
        assert!(staging.remove(&tag).is_none());
    }

    #[test]
    fn test_staging_map_clear() {
        let staging = StagingMap::new();
        for i in 0..5 {
            staging.insert(DeliveryTag::new(i), record(0, i as i64));
        }
        assert_eq!(staging.len(), 5);

        staging.clear();
        assert!(staging.is_empty());
    }

    #[test]
    fn test_staging_map_shared_between_clones() {
        let staging = StagingMap::new();
        let clone = staging.clone();

        staging.insert(DeliveryTag::new(7), record(1, 3));
        assert_eq!(clone.len(), 1);
        assert!(clone.remove(&DeliveryTag::new(7)).is_some());
    }

    #[test]
    fn test_notification_sender_drops_after_receiver_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifications = NotificationSender::new(tx);
        drop(rx);

        // no panic, notification silently discarded
        notifications.send(Notification::Assigned);
    }
}
