//! Test utilities for StreamBridge
//!
//! This module provides mock implementations and utilities for testing:
//! a scripted AMQP sender with adjustable credit, worker launchers that
//! stand in for the Kafka consumer, and a ready-made bridge configuration.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::amqp::{AmqpMessage, AmqpSender, DeliveryQos, DeliveryTag, ErrorCondition, Source};
use crate::bridge::{EndpointContext, NotificationSender, StagingMap, WorkerHandle, WorkerLauncher};
use crate::config::{AmqpConfig, BridgeConfig, KafkaConfig};
use crate::error::{Error, Result};

/// A transfer captured by [`MockAmqpSender`]
#[derive(Debug, Clone)]
pub struct SentTransfer {
    /// Transfer tag
    pub tag: DeliveryTag,

    /// Message that was sent
    pub message: AmqpMessage,

    /// Whether the transfer was pre-settled
    pub settled: bool,
}

#[derive(Debug)]
struct MockSenderState {
    remote_source: Option<Source>,
    qos: DeliveryQos,
    credit: usize,
    sent: Vec<SentTransfer>,
    local_source: Option<Option<Source>>,
    open_count: usize,
    condition: Option<ErrorCondition>,
    close_count: usize,
}

/// Mock implementation of [`AmqpSender`] for testing.
///
/// Credit is a plain counter: each transfer consumes one unit and
/// `queue_full` reports exhaustion, mirroring how a receiver's flow frames
/// gate a real link. Clones share state so tests can keep a handle for
/// assertions while the endpoint owns another.
#[derive(Debug, Clone)]
pub struct MockAmqpSender {
    inner: Arc<Mutex<MockSenderState>>,
}

impl MockAmqpSender {
    /// Create a sender presenting the given remote source, with no credit
    pub fn new(remote_source: Option<Source>, qos: DeliveryQos) -> Self {
        MockAmqpSender {
            inner: Arc::new(Mutex::new(MockSenderState {
                remote_source,
                qos,
                credit: 0,
                sent: Vec::new(),
                local_source: None,
                open_count: 0,
                condition: None,
                close_count: 0,
            })),
        }
    }

    /// Start with the given credit
    pub fn with_credit(self, credit: usize) -> Self {
        self.inner.lock().unwrap().credit = credit;
        self
    }

    /// Grant additional credit (the test then posts a `SendQueueDrain`)
    pub fn grant_credit(&self, credit: usize) {
        self.inner.lock().unwrap().credit += credit;
    }

    /// All transfers sent so far
    pub fn sent(&self) -> Vec<SentTransfer> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// How often the link was opened
    pub fn open_count(&self) -> usize {
        self.inner.lock().unwrap().open_count
    }

    /// The local source of the last `open`, or `None` if never opened
    pub fn local_source(&self) -> Option<Option<Source>> {
        self.inner.lock().unwrap().local_source.clone()
    }

    /// The error condition set on the link, if any
    pub fn condition(&self) -> Option<ErrorCondition> {
        self.inner.lock().unwrap().condition.clone()
    }

    /// Whether the link has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().close_count > 0
    }

    /// How often the link was closed
    pub fn close_count(&self) -> usize {
        self.inner.lock().unwrap().close_count
    }
}

impl AmqpSender for MockAmqpSender {
    fn remote_source(&self) -> Option<Source> {
        self.inner.lock().unwrap().remote_source.clone()
    }

    fn qos(&self) -> DeliveryQos {
        self.inner.lock().unwrap().qos
    }

    fn queue_full(&self) -> bool {
        self.inner.lock().unwrap().credit == 0
    }

    fn open(&mut self, source: Option<Source>) {
        let mut state = self.inner.lock().unwrap();
        state.open_count += 1;
        state.local_source = Some(source);
    }

    fn set_condition(&mut self, condition: ErrorCondition) {
        self.inner.lock().unwrap().condition = Some(condition);
    }

    fn close(&mut self) {
        self.inner.lock().unwrap().close_count += 1;
    }

    fn send_settled(&mut self, tag: &DeliveryTag, message: AmqpMessage) {
        let mut state = self.inner.lock().unwrap();
        state.credit = state.credit.saturating_sub(1);
        state.sent.push(SentTransfer {
            tag: *tag,
            message,
            settled: true,
        });
    }

    fn send_unsettled(&mut self, tag: &DeliveryTag, message: AmqpMessage) {
        let mut state = self.inner.lock().unwrap();
        state.credit = state.credit.saturating_sub(1);
        state.sent.push(SentTransfer {
            tag: *tag,
            message,
            settled: false,
        });
    }
}

/// What a [`NoopWorkerLauncher`] was asked to launch
#[derive(Clone)]
pub struct LaunchRecord {
    /// Consumer group from the link address
    pub group_id: String,

    /// Shared endpoint context
    pub context: Arc<EndpointContext>,

    /// Staging map handed to the worker
    pub staging: StagingMap,

    /// Notification channel handed to the worker
    pub notifications: NotificationSender,

    /// Shutdown flag of the returned handle
    pub shutdown: Arc<AtomicBool>,
}

/// Worker launcher that records the handoff ends instead of touching Kafka.
///
/// Tests play the consumer worker themselves: stage records through the
/// recorded [`StagingMap`] and post notifications through the recorded
/// [`NotificationSender`].
#[derive(Default)]
pub struct NoopWorkerLauncher {
    record: Mutex<Option<LaunchRecord>>,
    launch_count: AtomicUsize,
}

impl NoopWorkerLauncher {
    /// Create a new launcher
    pub fn new() -> Self {
        Self::default()
    }

    /// How often `launch` was called
    pub fn launch_count(&self) -> usize {
        self.launch_count.load(Ordering::Relaxed)
    }

    /// The last launch request, if any
    pub fn record(&self) -> Option<LaunchRecord> {
        self.record.lock().unwrap().clone()
    }

    /// Whether the endpoint signalled the worker to shut down
    pub fn shutdown_requested(&self) -> bool {
        self.record()
            .map(|r| r.shutdown.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

impl WorkerLauncher for NoopWorkerLauncher {
    fn launch(
        &self,
        group_id: &str,
        context: Arc<EndpointContext>,
        staging: StagingMap,
        notifications: NotificationSender,
    ) -> Result<WorkerHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));

        *self.record.lock().unwrap() = Some(LaunchRecord {
            group_id: group_id.to_string(),
            context,
            staging,
            notifications,
            shutdown: Arc::clone(&shutdown),
        });
        self.launch_count.fetch_add(1, Ordering::Relaxed);

        Ok(WorkerHandle::new(shutdown, None))
    }
}

/// Worker launcher that always fails, for exercising the rejection path
pub struct FailingWorkerLauncher;

impl WorkerLauncher for FailingWorkerLauncher {
    fn launch(
        &self,
        _group_id: &str,
        _context: Arc<EndpointContext>,
        _staging: StagingMap,
        _notifications: NotificationSender,
    ) -> Result<WorkerHandle> {
        Err(Error::kafka("worker launch failed (test)"))
    }
}

/// A bridge configuration suitable for tests
pub fn test_bridge_config() -> Arc<BridgeConfig> {
    Arc::new(BridgeConfig {
        amqp: AmqpConfig {
            host: "127.0.0.1".to_string(),
            port: 5672,
            flow_credit: 1024,
            message_converter: "default".to_string(),
        },
        kafka: KafkaConfig {
            bootstrap_servers: "localhost:9092".to_string(),
            auto_offset_reset: "earliest".to_string(),
            enable_auto_commit: false,
            session_timeout_ms: 6000,
            poll_timeout_ms: 100,
        },
        log_level: "debug".to_string(),
        environment: "development".to_string(),
    })
}
