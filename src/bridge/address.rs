//! Link address and filter parsing
//!
//! A sink link address has the shape `TOPIC/group.id/GROUP`. The topic part
//! may itself contain `/` in a domain sense and is normalized for Kafka by
//! replacing `/` with `.`. Filters may narrow consumption to a single
//! partition, optionally starting at an exact offset.
//!
//! Violations are expressed as [`ErrorCondition`]s carrying the condition
//! symbols that form the contract with clients; they are reported on the
//! link, not raised as crate errors.

use std::collections::BTreeMap;

use crate::amqp::{
    AmqpValue, ErrorCondition, AMQP_ERROR_NO_GROUP_ID, AMQP_ERROR_NO_PARTITION_FILTER,
    AMQP_ERROR_WRONG_FILTER, AMQP_ERROR_WRONG_OFFSET_FILTER, AMQP_ERROR_WRONG_PARTITION_FILTER,
    AMQP_OFFSET_FILTER, AMQP_PARTITION_FILTER,
};

/// Literal separating topic and consumer group in the link address
pub const GROUP_ID_MATCH: &str = "/group.id/";

/// Parsed sink link address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkAddress {
    /// Kafka topic, normalized (`/` replaced with `.`)
    pub kafka_topic: String,

    /// Consumer group id
    pub group_id: String,
}

impl SinkAddress {
    /// Parse a link address of the form `TOPIC/group.id/GROUP`.
    ///
    /// The `/group.id/` literal is matched case-sensitively. Empty topic or
    /// group segments are rejected.
    pub fn parse(address: &str) -> Result<Self, ErrorCondition> {
        let group_id_index = address.find(GROUP_ID_MATCH).ok_or_else(|| {
            ErrorCondition::new(
                AMQP_ERROR_NO_GROUP_ID,
                "Mandatory group.id not specified in the address",
            )
        })?;

        let topic = &address[..group_id_index];
        let group_id = &address[group_id_index + GROUP_ID_MATCH.len()..];

        if topic.is_empty() || group_id.is_empty() {
            return Err(ErrorCondition::new(
                AMQP_ERROR_NO_GROUP_ID,
                "Empty topic or group.id in the address",
            ));
        }

        Ok(SinkAddress {
            // "/" is not a legal character in a Kafka topic name
            kafka_topic: topic.replace('/', "."),
            group_id: group_id.to_string(),
        })
    }
}

/// Validated partition/offset filters from the remote source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerFilters {
    /// Restrict consumption to this partition
    pub partition: Option<i32>,

    /// Start consumption at this exact offset (requires a partition)
    pub offset: Option<i64>,
}

impl ConsumerFilters {
    /// Validate the filter map presented on attach.
    ///
    /// Valid combinations: no filters; partition only; partition plus
    /// offset. The partition must be an AMQP int, the offset an AMQP long,
    /// both non-negative.
    pub fn from_source_filter(
        filter: Option<&BTreeMap<String, AmqpValue>>,
    ) -> Result<Self, ErrorCondition> {
        let Some(filter) = filter else {
            return Ok(ConsumerFilters::default());
        };

        let partition_value = filter.get(AMQP_PARTITION_FILTER);
        let offset_value = filter.get(AMQP_OFFSET_FILTER);

        let partition = match partition_value {
            None => None,
            Some(value) => Some(value.as_int().ok_or_else(|| {
                ErrorCondition::new(AMQP_ERROR_WRONG_PARTITION_FILTER, "Wrong partition filter")
            })?),
        };

        let offset = match offset_value {
            None => None,
            Some(value) => Some(value.as_long().ok_or_else(|| {
                ErrorCondition::new(AMQP_ERROR_WRONG_OFFSET_FILTER, "Wrong offset filter")
            })?),
        };

        if partition.is_none() && offset.is_some() {
            return Err(ErrorCondition::new(
                AMQP_ERROR_NO_PARTITION_FILTER,
                "No partition filter specified",
            ));
        }

        if partition.is_some_and(|p| p < 0) || offset.is_some_and(|o| o < 0) {
            return Err(ErrorCondition::new(AMQP_ERROR_WRONG_FILTER, "Wrong filter"));
        }

        Ok(ConsumerFilters { partition, offset })
    }
}
