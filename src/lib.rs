//! StreamBridge Library
//!
//! An AMQP 1.0 sink bridge for Apache Kafka: a remote AMQP receiver
//! attaches to a link whose address encodes a Kafka topic and consumer
//! group, and the bridge consumes that topic and delivers each record as
//! an AMQP message, honouring link credit and the negotiated delivery
//! quality (at-most-once or at-least-once).
//!
//! The crate contains the endpoint state machine, the Kafka consumer
//! worker and the record converters; the AMQP transport itself is supplied
//! by the embedding host through the [`amqp::AmqpSender`] seam.

pub mod amqp;
pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod test_utils;

// Re-export commonly used types at the crate root
pub use config::{AmqpConfig, BridgeConfig, KafkaConfig};
pub use error::{Error, Result};

pub use amqp::{
    AmqpBody, AmqpMessage, AmqpSender, AmqpValue, DeliveryOutcome, DeliveryQos, DeliveryTag,
    ErrorCondition, Source,
};

pub use bridge::{
    converter_for, ConsumerFilters, ConsumerWorker, DefaultConverter, EndpointContext,
    EndpointEvent, EndpointHandle, EndpointState, JsonConverter, KafkaRecord, KafkaWorkerLauncher,
    LinkEvent, MessageConverter, Notification, OffsetTracker, SinkAddress, SinkEndpoint,
    StagingMap, WorkerHandle, WorkerLauncher, QUEUE_THRESHOLD,
};

pub use test_utils::{MockAmqpSender, NoopWorkerLauncher};
