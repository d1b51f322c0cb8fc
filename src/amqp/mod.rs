//! AMQP 1.0 surface of the bridge
//!
//! This module provides:
//! - The subset of the AMQP message model the bridge reads and writes
//! - The sender-link seam ([`AmqpSender`]) the sink endpoint drives
//! - The symbols and error conditions that form the contract with clients
//!
//! The bridge does not ship an AMQP transport; a host embedding the crate
//! binds these types to its proton connection and feeds link events into the
//! endpoint (see [`crate::bridge::SinkEndpoint`]).

mod message;
mod sender;

pub use message::{
    AmqpBody, AmqpMessage, AmqpValue, DeliveryOutcome, DeliveryQos, DeliveryTag, ErrorCondition,
    Source,
};
pub use sender::AmqpSender;

/// Filter symbol selecting a single Kafka partition on attach
pub const AMQP_PARTITION_FILTER: &str = "x-opt-bridge.partition-filter";

/// Filter symbol selecting the starting Kafka offset on attach
pub const AMQP_OFFSET_FILTER: &str = "x-opt-bridge.offset-filter";

/// Message annotation carrying the source partition of a record
pub const AMQP_PARTITION_ANNOTATION: &str = "x-opt-bridge.partition";

/// Message annotation carrying the source offset of a record
pub const AMQP_OFFSET_ANNOTATION: &str = "x-opt-bridge.offset";

/// Message annotation carrying the record key (omitted for null keys)
pub const AMQP_KEY_ANNOTATION: &str = "x-opt-bridge.key";

/// Link rejected: the address carries no `/group.id/` segment
pub const AMQP_ERROR_NO_GROUP_ID: &str = "no-group-id";

/// Link rejected: the partition filter value has the wrong type
pub const AMQP_ERROR_WRONG_PARTITION_FILTER: &str = "wrong-partition-filter";

/// Link rejected: the offset filter value has the wrong type
pub const AMQP_ERROR_WRONG_OFFSET_FILTER: &str = "wrong-offset-filter";

/// Link rejected: an offset filter was supplied without a partition filter
pub const AMQP_ERROR_NO_PARTITION_FILTER: &str = "no-partition-filter";

/// Link rejected: a filter value is out of range
pub const AMQP_ERROR_WRONG_FILTER: &str = "wrong-filter";

/// Link closed: the Kafka consumer hit an unrecoverable error
pub const AMQP_ERROR_KAFKA_CONSUMER: &str = "kafka-consumer-error";
