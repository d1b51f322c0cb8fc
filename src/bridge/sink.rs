//! Sink endpoint: AMQP sender-link state machine
//!
//! One endpoint serves one attaching receiver. `attach` validates the link
//! address and filters, rejecting the link with the matching error
//! condition on violation; on success it starts the Kafka consumer worker
//! and `run` turns into the endpoint's reactor: a single task consuming
//! worker notifications and transport link events in post order. All
//! operations on the AMQP sender happen on that task.
//!
//! Lifecycle: INIT → VALIDATING → OPENING → RUNNING → CLOSING → CLOSED,
//! with a REJECTED → CLOSED fork for attach-time violations and fatal
//! worker errors.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::amqp::{
    AmqpSender, DeliveryQos, DeliveryTag, ErrorCondition, AMQP_ERROR_KAFKA_CONSUMER,
    AMQP_ERROR_NO_GROUP_ID,
};
use crate::config::BridgeConfig;
use crate::error::Result;

use super::address::{ConsumerFilters, SinkAddress};
use super::context::EndpointContext;
use super::converter::{converter_for, MessageConverter};
use super::tracker::OffsetTracker;
use super::worker::{WorkerHandle, WorkerLauncher};
use super::{EndpointEvent, LinkEvent, Notification, NotificationSender, StagingMap};

/// Lifecycle state of a sink endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Init,
    Validating,
    Opening,
    Running,
    Closing,
    Closed,
    Rejected,
}

/// Handle through which the AMQP transport (and the endpoint owner) post
/// events into the reactor
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    tx: mpsc::UnboundedSender<EndpointEvent>,
}

impl EndpointHandle {
    /// Post a link event (settlement, credit drain, remote detach/close)
    pub fn link_event(&self, event: LinkEvent) {
        let _ = self.tx.send(EndpointEvent::Link(event));
    }

    /// Request a local close of the endpoint
    pub fn close(&self) {
        let _ = self.tx.send(EndpointEvent::Close);
    }
}

/// Sink endpoint bridging one Kafka consumer to one AMQP sender link
pub struct SinkEndpoint<S: AmqpSender> {
    sender: S,
    launcher: Arc<dyn WorkerLauncher>,
    converter: Arc<dyn MessageConverter>,
    state: EndpointState,

    /// Records staged by the worker, awaiting dispatch
    staging: StagingMap,

    /// Tags that could not be sent for lack of credit, in arrival order
    pending: VecDeque<DeliveryTag>,

    /// Populated once the attach has been validated
    context: Option<Arc<EndpointContext>>,

    /// Raw link address, used as the outgoing message address
    source_address: Option<String>,

    worker: Option<WorkerHandle>,
    close_listener: Option<Box<dyn FnOnce() + Send>>,

    events_tx: mpsc::UnboundedSender<EndpointEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<EndpointEvent>>,
}

impl<S: AmqpSender> SinkEndpoint<S> {
    /// Create an endpoint for a freshly attached sender link
    pub fn new(config: Arc<BridgeConfig>, sender: S, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let converter = converter_for(&config.amqp.message_converter);

        SinkEndpoint {
            sender,
            launcher,
            converter,
            state: EndpointState::Init,
            staging: StagingMap::new(),
            pending: VecDeque::new(),
            context: None,
            source_address: None,
            worker: None,
            close_listener: None,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Register a listener invoked exactly once when the endpoint closes
    pub fn on_close<F: FnOnce() + Send + 'static>(&mut self, listener: F) {
        self.close_listener = Some(Box::new(listener));
    }

    /// Handle for posting link events and a local close
    pub fn handle(&self) -> EndpointHandle {
        EndpointHandle {
            tx: self.events_tx.clone(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Validate the attach and start the consumer worker.
    ///
    /// Address or filter violations reject the link (opened with a null
    /// source, condition set, closed) and leave the endpoint closed; they
    /// are not errors for the caller. A worker launch failure both rejects
    /// the link and surfaces as an error.
    pub fn attach(&mut self) -> Result<()> {
        self.state = EndpointState::Validating;

        let Some(source) = self.sender.remote_source() else {
            self.reject(ErrorCondition::new(
                AMQP_ERROR_NO_GROUP_ID,
                "No source specified on attach",
            ));
            return Ok(());
        };

        let address = match SinkAddress::parse(&source.address) {
            Ok(address) => address,
            Err(condition) => {
                self.reject(condition);
                return Ok(());
            }
        };

        let filters = match ConsumerFilters::from_source_filter(source.filter.as_ref()) {
            Ok(filters) => filters,
            Err(condition) => {
                self.reject(condition);
                return Ok(());
            }
        };

        debug!(
            topic = %address.kafka_topic,
            group_id = %address.group_id,
            partition = ?filters.partition,
            offset = ?filters.offset,
            "validated sink link address"
        );

        let handoff_name = format!("bridge.sink.{}", Uuid::new_v4());
        let tracker = Arc::new(OffsetTracker::new());
        let context = Arc::new(EndpointContext::new(
            address.kafka_topic.clone(),
            self.sender.qos(),
            filters,
            handoff_name,
            tracker,
        ));

        self.source_address = Some(source.address.clone());
        self.context = Some(Arc::clone(&context));
        self.state = EndpointState::Opening;

        let notifications = NotificationSender::new(self.events_tx.clone());
        match self
            .launcher
            .launch(&address.group_id, context, self.staging.clone(), notifications)
        {
            Ok(handle) => {
                info!(
                    topic = %address.kafka_topic,
                    group_id = %address.group_id,
                    "sink endpoint opening"
                );
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to launch Kafka consumer worker");
                self.reject(ErrorCondition::new(AMQP_ERROR_KAFKA_CONSUMER, e.to_string()));
                Err(e)
            }
        }
    }

    /// Reactor loop: consume events until the endpoint closes.
    ///
    /// Returns immediately if the attach was rejected.
    pub async fn run(mut self) {
        let Some(mut events_rx) = self.events_rx.take() else {
            return;
        };

        if matches!(self.state, EndpointState::Closed) {
            return;
        }

        while let Some(event) = events_rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        // all handles dropped, or the loop decided to stop
        self.close_endpoint();
    }

    /// Process one event; returns false when the endpoint is done
    fn handle_event(&mut self, event: EndpointEvent) -> bool {
        match event {
            EndpointEvent::Worker(Notification::Send(tag)) => {
                match self.state {
                    EndpointState::Running => self.dispatch(tag),
                    // records racing the first assignment wait their turn
                    EndpointState::Opening => self.pending.push_back(tag),
                    _ => {}
                }
                true
            }
            EndpointEvent::Worker(Notification::Assigned) => {
                if matches!(self.state, EndpointState::Opening) {
                    let source = self.sender.remote_source();
                    self.sender.open(source);
                    self.state = EndpointState::Running;
                    info!("sink endpoint running");
                    self.repost_pending();
                }
                // reassignments after the first are transparent
                true
            }
            EndpointEvent::Worker(Notification::Error {
                condition,
                description,
            }) => {
                warn!(
                    condition = %condition,
                    description = %description,
                    "consumer worker reported a fatal error"
                );
                self.reject(ErrorCondition::new(condition, description));
                false
            }
            EndpointEvent::Link(LinkEvent::Settled { tag, outcome }) => {
                if let Some(context) = &self.context {
                    context.tracker().delivered(tag);
                    debug!(%tag, ?outcome, "delivery settled by peer");
                }
                true
            }
            EndpointEvent::Link(LinkEvent::SendQueueDrain) => {
                self.process_send_queue_drain();
                true
            }
            EndpointEvent::Link(LinkEvent::RemoteDetach | LinkEvent::RemoteClose) => {
                info!("remote AMQP receiver detached");
                self.close_endpoint();
                false
            }
            EndpointEvent::Close => {
                self.close_endpoint();
                false
            }
        }
    }

    /// Dispatch the staged record under `tag` to the peer
    fn dispatch(&mut self, tag: DeliveryTag) {
        let Some(context) = self.context.clone() else {
            return;
        };

        if self.sender.queue_full() {
            // no credit; keep the tag for the next drain
            self.pending.push_back(tag);
            context.set_send_queue_full(true);
            return;
        }

        let Some(record) = self.staging.remove(&tag) else {
            // duplicate notification for an already dispatched tag
            return;
        };

        let address = self.source_address.as_deref().unwrap_or_default();
        let message = match self.converter.to_amqp(address, &record) {
            Ok(message) => message,
            Err(e) => {
                // the offset is deliberately not tracked: a malformed record
                // must not block commit progress
                warn!(
                    error = %e,
                    partition = record.partition,
                    offset = record.offset,
                    "dropping record that failed conversion"
                );
                return;
            }
        };

        match context.qos() {
            DeliveryQos::AtMostOnce => self.sender.send_settled(&tag, message),
            DeliveryQos::AtLeastOnce => {
                context.tracker().track(tag, &record);
                debug!(
                    %tag,
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "tracked delivery"
                );
                self.sender.send_unsettled(&tag, message);
            }
        }

        context.set_send_queue_full(self.sender.queue_full());
    }

    /// Credit is available again: replay queued tags in arrival order
    fn process_send_queue_drain(&mut self) {
        debug!("remote receiver link credits available");

        if self.pending.is_empty() {
            // nothing to recover, just refresh the flag for the worker
            if let Some(context) = &self.context {
                context.set_send_queue_full(self.sender.queue_full());
            }
            return;
        }

        while let Some(tag) = self.pending.front().copied() {
            if self.sender.queue_full() {
                return;
            }
            self.pending.pop_front();
            debug!(%tag, "recovering unsent delivery");
            let _ = self
                .events_tx
                .send(EndpointEvent::Worker(Notification::Send(tag)));
        }
    }

    /// Re-post every queued tag (entering RUNNING after a held-back burst)
    fn repost_pending(&mut self) {
        while let Some(tag) = self.pending.pop_front() {
            let _ = self
                .events_tx
                .send(EndpointEvent::Worker(Notification::Send(tag)));
        }
    }

    /// Reject the link with the given condition and tear down
    fn reject(&mut self, condition: ErrorCondition) {
        warn!(condition = %condition, "local detach");

        if !matches!(self.state, EndpointState::Running) {
            // the attach is acknowledged with a null source before closing
            self.sender.open(None);
        }
        self.sender.set_condition(condition);
        self.state = EndpointState::Rejected;

        self.close_endpoint();
    }

    /// Tear down collaborators and close the link. Idempotent.
    fn close_endpoint(&mut self) {
        if matches!(self.state, EndpointState::Closed) {
            return;
        }
        if !matches!(self.state, EndpointState::Rejected) {
            self.state = EndpointState::Closing;
        }

        if let Some(worker) = &mut self.worker {
            worker.shutdown();
        }
        self.staging.clear();
        if let Some(context) = &self.context {
            // late settlement callbacks become no-ops from here on
            context.tracker().clear();
        }
        self.pending.clear();
        self.sender.close();

        self.state = EndpointState::Closed;
        if let Some(listener) = self.close_listener.take() {
            listener();
        }

        info!("sink endpoint closed");
    }
}
