//! Kafka consumer worker feeding a sink endpoint
//!
//! The worker owns an rdkafka `BaseConsumer` on a dedicated OS thread. Each
//! loop iteration it reconciles the pause state against downstream
//! backpressure, polls with a bounded timeout, stages fetched records under
//! freshly minted delivery tags, and (for at-least-once links) commits the
//! offsets the tracker reports as safe. It never touches the AMQP sender;
//! everything it has to say to the reactor goes through the notification
//! channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::amqp::{DeliveryQos, DeliveryTag, AMQP_ERROR_KAFKA_CONSUMER};
use crate::config::{BridgeConfig, KafkaConfig};
use crate::error::Result;

use super::context::EndpointContext;
use super::{KafkaRecord, Notification, NotificationSender, StagingMap, QUEUE_THRESHOLD};

/// Seam through which the sink endpoint starts its consumer worker.
///
/// Production uses [`KafkaWorkerLauncher`]; tests substitute a launcher
/// that records the handoff ends instead of touching Kafka.
pub trait WorkerLauncher: Send + Sync {
    /// Start the worker for the given consumer group and handoff ends
    fn launch(
        &self,
        group_id: &str,
        context: Arc<EndpointContext>,
        staging: StagingMap,
        notifications: NotificationSender,
    ) -> Result<WorkerHandle>;
}

/// Launches a [`ConsumerWorker`] on a dedicated thread
pub struct KafkaWorkerLauncher {
    config: Arc<BridgeConfig>,
}

impl KafkaWorkerLauncher {
    /// Create a launcher backed by the given bridge configuration
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        KafkaWorkerLauncher { config }
    }
}

impl WorkerLauncher for KafkaWorkerLauncher {
    fn launch(
        &self,
        group_id: &str,
        context: Arc<EndpointContext>,
        staging: StagingMap,
        notifications: NotificationSender,
    ) -> Result<WorkerHandle> {
        ConsumerWorker::new(&self.config.kafka, group_id, context, staging, notifications)?.spawn()
    }
}

/// Control handle for a running worker
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(shutdown: Arc<AtomicBool>, thread: Option<thread::JoinHandle<()>>) -> Self {
        WorkerHandle { shutdown, thread }
    }

    /// Signal the worker to stop after its current poll. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.shutdown.swap(true, Ordering::Relaxed) {
            debug!("consumer worker shutdown requested");
        }
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Wait for the worker thread to exit.
    ///
    /// The reactor never calls this (it must not block); it is for hosts
    /// that want a fully quiesced endpoint before dropping it.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Mints delivery tags unique for the lifetime of the endpoint
#[derive(Debug, Default)]
struct TagSequence(u64);

impl TagSequence {
    fn next(&mut self) -> DeliveryTag {
        let tag = DeliveryTag::new(self.0);
        self.0 += 1;
        tag
    }
}

/// rdkafka consumer context wiring rebalance events into the bridge.
///
/// Rebalance callbacks run on the worker thread inside `poll`, so shared
/// state is restricted to the notification channel and an atomic flag the
/// poll loop (which owns the consumer) acts upon.
struct BridgeConsumerContext {
    notifications: NotificationSender,
    /// Set on partition revocation; the loop answers with a sync commit
    commit_requested: Arc<AtomicBool>,
}

impl ClientContext for BridgeConsumerContext {}

impl ConsumerContext for BridgeConsumerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            info!(
                partitions_revoked = tpl.count(),
                "partitions being revoked, requesting offset commit"
            );
            self.commit_requested.store(true, Ordering::Relaxed);
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                info!(partitions_assigned = tpl.count(), "partitions assigned");
                self.notifications.send(Notification::Assigned);
            }
            Rebalance::Revoke(_) => debug!("partition revocation completed"),
            Rebalance::Error(msg) => warn!(error = %msg, "rebalance error"),
        }
    }
}

/// Kafka consumer bound to one sink endpoint
pub struct ConsumerWorker {
    consumer: BaseConsumer<BridgeConsumerContext>,
    context: Arc<EndpointContext>,
    staging: StagingMap,
    notifications: NotificationSender,
    shutdown: Arc<AtomicBool>,
    commit_requested: Arc<AtomicBool>,
    poll_timeout: Duration,
    paused: bool,
    tags: TagSequence,
}

impl ConsumerWorker {
    /// Create the worker and its Kafka consumer (not yet polling)
    pub fn new(
        kafka_config: &KafkaConfig,
        group_id: &str,
        context: Arc<EndpointContext>,
        staging: StagingMap,
        notifications: NotificationSender,
    ) -> Result<Self> {
        let commit_requested = Arc::new(AtomicBool::new(false));

        let consumer_context = BridgeConsumerContext {
            notifications: notifications.clone(),
            commit_requested: Arc::clone(&commit_requested),
        };

        let consumer: BaseConsumer<BridgeConsumerContext> = kafka_config
            .consumer_config(group_id)
            .create_with_context(consumer_context)
            .map_err(|e| anyhow!("Failed to create Kafka consumer: {}", e))?;

        Ok(Self {
            consumer,
            context,
            staging,
            notifications,
            shutdown: Arc::new(AtomicBool::new(false)),
            commit_requested,
            poll_timeout: kafka_config.poll_timeout(),
            paused: false,
            tags: TagSequence::default(),
        })
    }

    /// Start the poll loop on a dedicated thread
    pub fn spawn(self) -> Result<WorkerHandle> {
        let shutdown = Arc::clone(&self.shutdown);
        let thread = thread::Builder::new()
            .name("bridge-consumer".to_string())
            .spawn(move || self.run())?;

        Ok(WorkerHandle::new(shutdown, Some(thread)))
    }

    fn run(mut self) {
        info!(
            topic = %self.context.topic(),
            handoff = %self.context.handoff_name(),
            "starting Kafka consumer worker"
        );

        if let Err(e) = self.init_assignment() {
            error!(error = %e, "failed to set up Kafka consumption");
            self.notifications.send(Notification::Error {
                condition: AMQP_ERROR_KAFKA_CONSUMER.to_string(),
                description: e.to_string(),
            });
            return;
        }

        while !self.shutdown.load(Ordering::Relaxed) {
            self.reconcile_pause();

            if self.commit_requested.swap(false, Ordering::Relaxed) {
                self.commit_safe_offsets(CommitMode::Sync);
            }

            // the borrowed message must not outlive the poll expression, so
            // it is turned into an owned record before staging
            let fetched = match self.consumer.poll(self.poll_timeout) {
                None => None,
                Some(Ok(message)) => Some(Self::record_from(&message)),
                Some(Err(err)) => {
                    if is_fatal(&err) {
                        error!(error = %err, "unrecoverable Kafka error, closing endpoint");
                        self.notifications.send(Notification::Error {
                            condition: AMQP_ERROR_KAFKA_CONSUMER.to_string(),
                            description: err.to_string(),
                        });
                        break;
                    }
                    warn!(error = %err, "transient Kafka error");
                    None
                }
            };

            if let Some(record) = fetched {
                self.stage(record);
            }

            if self.context.qos() == DeliveryQos::AtLeastOnce {
                self.commit_safe_offsets(CommitMode::Async);
            }
        }

        // last chance to persist the group position
        if self.context.qos() == DeliveryQos::AtLeastOnce {
            self.commit_safe_offsets(CommitMode::Sync);
        }

        info!("Kafka consumer worker stopped");
    }

    /// Subscribe or manually assign, depending on the attach filters
    fn init_assignment(&self) -> Result<()> {
        match self.context.partition() {
            Some(partition) => {
                let mut assignment = TopicPartitionList::new();
                match self.context.offset() {
                    Some(offset) => {
                        assignment.add_partition_offset(
                            self.context.topic(),
                            partition,
                            Offset::Offset(offset),
                        )?;
                    }
                    None => {
                        // start from the committed offset or the reset policy
                        assignment.add_partition(self.context.topic(), partition);
                    }
                }
                self.consumer.assign(&assignment)?;

                info!(
                    partition,
                    offset = ?self.context.offset(),
                    "manually assigned partition"
                );

                // manual assignment fires no rebalance callback
                self.notifications.send(Notification::Assigned);
            }
            None => {
                self.consumer.subscribe(&[self.context.topic()])?;
                info!(topic = %self.context.topic(), "subscribed to topic");
            }
        }

        Ok(())
    }

    /// Pause or resume all assigned partitions to match downstream pressure
    fn reconcile_pause(&mut self) {
        let want_paused = should_pause(self.context.send_queue_full(), self.staging.len());
        if want_paused == self.paused {
            return;
        }

        let assignment = match self.consumer.assignment() {
            Ok(assignment) => assignment,
            Err(e) => {
                warn!(error = %e, "could not fetch assignment to toggle consumption");
                return;
            }
        };

        let result = if want_paused {
            self.consumer.pause(&assignment)
        } else {
            self.consumer.resume(&assignment)
        };

        match result {
            Ok(()) => {
                self.paused = want_paused;
                debug!(
                    paused = want_paused,
                    staged = self.staging.len(),
                    "partition consumption toggled"
                );
            }
            Err(e) => warn!(error = %e, "failed to toggle partition consumption"),
        }
    }

    fn record_from(message: &BorrowedMessage<'_>) -> KafkaRecord {
        KafkaRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| k.to_vec()),
            value: message.payload().map(|p| p.to_vec()).unwrap_or_default(),
        }
    }

    /// Stage a fetched record and notify the reactor
    fn stage(&mut self, record: KafkaRecord) {
        let tag = self.tags.next();

        debug!(
            %tag,
            partition = record.partition,
            offset = record.offset,
            "staged record for dispatch"
        );

        self.staging.insert(tag, record);
        self.notifications.send(Notification::Send(tag));
    }

    /// Commit whatever the tracker reports as safe; empty reports are free
    fn commit_safe_offsets(&self, mode: CommitMode) {
        let commits = self.context.tracker().commits();
        if commits.is_empty() {
            return;
        }

        let mut offsets = TopicPartitionList::new();
        for (partition, offset) in &commits {
            if let Err(e) =
                offsets.add_partition_offset(self.context.topic(), *partition, Offset::Offset(*offset))
            {
                warn!(error = %e, partition, "could not build commit list");
                return;
            }
        }

        match self.consumer.commit(&offsets, mode) {
            Ok(()) => debug!(partitions = commits.len(), "committed offsets"),
            Err(e) => warn!(error = %e, "offset commit failed"),
        }
    }
}

/// Whether the worker should pause partition consumption
fn should_pause(send_queue_full: bool, staged: usize) -> bool {
    send_queue_full || staged >= QUEUE_THRESHOLD
}

/// Errors the Kafka client will not recover from on its own
fn is_fatal(err: &KafkaError) -> bool {
    match err {
        KafkaError::MessageConsumption(code) => matches!(
            code,
            RDKafkaErrorCode::UnknownTopicOrPartition
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::GroupAuthorizationFailed
                | RDKafkaErrorCode::UnknownMemberId
                | RDKafkaErrorCode::Fatal
        ),
        _ => false,
    }
}
