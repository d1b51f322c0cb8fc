//! Shared state between the sink endpoint and its consumer worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::amqp::DeliveryQos;

use super::address::ConsumerFilters;
use super::tracker::OffsetTracker;

/// Handoff state shared by the endpoint reactor and the Kafka worker.
///
/// The identity fields (topic, qos, filters, handoff name, tracker) are set
/// while the endpoint opens and never change afterwards. `send_queue_full`
/// is the only mutable field: the reactor writes it as link credit comes and
/// goes, the worker reads it each poll cycle to pause or resume partitions.
#[derive(Debug)]
pub struct EndpointContext {
    /// Normalized Kafka topic
    topic: String,

    /// Delivery quality negotiated on the link
    qos: DeliveryQos,

    /// Partition filter from the attach, if any
    partition: Option<i32>,

    /// Offset filter from the attach, if any
    offset: Option<i64>,

    /// Unique name of the handoff channel and staging map
    handoff_name: String,

    /// Link credit exhausted; worker pauses polling while set
    send_queue_full: AtomicBool,

    /// Offset tracker shared with the reactor
    tracker: Arc<OffsetTracker>,
}

impl EndpointContext {
    /// Create the context for a validated attach
    pub fn new(
        topic: impl Into<String>,
        qos: DeliveryQos,
        filters: ConsumerFilters,
        handoff_name: impl Into<String>,
        tracker: Arc<OffsetTracker>,
    ) -> Self {
        EndpointContext {
            topic: topic.into(),
            qos,
            partition: filters.partition,
            offset: filters.offset,
            handoff_name: handoff_name.into(),
            send_queue_full: AtomicBool::new(false),
            tracker,
        }
    }

    /// Normalized Kafka topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Delivery quality of the link
    pub fn qos(&self) -> DeliveryQos {
        self.qos
    }

    /// Partition filter, if one was attached
    pub fn partition(&self) -> Option<i32> {
        self.partition
    }

    /// Offset filter, if one was attached
    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// Unique handoff channel name
    pub fn handoff_name(&self) -> &str {
        &self.handoff_name
    }

    /// Shared offset tracker
    pub fn tracker(&self) -> &Arc<OffsetTracker> {
        &self.tracker
    }

    /// Reactor-side: publish the link credit state
    pub fn set_send_queue_full(&self, full: bool) {
        self.send_queue_full.store(full, Ordering::Relaxed);
    }

    /// Worker-side: whether the link is out of credit
    pub fn send_queue_full(&self) -> bool {
        self.send_queue_full.load(Ordering::Relaxed)
    }
}
