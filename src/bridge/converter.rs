//! Kafka record to AMQP message conversion
//!
//! Converters are pure and stateless. The default converter maps the raw
//! record payload to an AMQP data section; the JSON converter understands a
//! JSON envelope describing AMQP properties and body. Both inject the
//! bridge's partition/offset/key message annotations.
//!
//! Converters are selected by name from the bridge configuration;
//! [`converter_for`] falls back to the default converter for unknown names.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::amqp::{
    AmqpBody, AmqpMessage, AmqpValue, AMQP_KEY_ANNOTATION, AMQP_OFFSET_ANNOTATION,
    AMQP_PARTITION_ANNOTATION,
};

use super::KafkaRecord;

/// Name of the raw-bytes converter
pub const CONVERTER_DEFAULT: &str = "default";

/// Name of the JSON envelope converter
pub const CONVERTER_JSON: &str = "json";

// JSON envelope keys
const PROPERTIES: &str = "properties";
const APPLICATION_PROPERTIES: &str = "applicationProperties";
const MESSAGE_ANNOTATIONS: &str = "messageAnnotations";
const BODY: &str = "body";
const SECTION_TYPE: &str = "type";
const SECTION: &str = "section";
const SECTION_AMQP_VALUE_TYPE: &str = "amqpValue";
const SECTION_DATA_TYPE: &str = "data";
const MESSAGE_ID: &str = "messageId";
const TO: &str = "to";
const SUBJECT: &str = "subject";
const REPLY_TO: &str = "replyTo";
const CORRELATION_ID: &str = "correlationId";

/// Conversion failure for a single record
///
/// The endpoint drops the record with a log entry and does not track its
/// offset, so a malformed record never blocks commit progress.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The record payload is not the expected JSON envelope
    #[error("invalid JSON envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    /// The envelope body section cannot be represented
    #[error("unsupported body section: {0}")]
    UnsupportedSection(String),

    /// The data section is not valid base64
    #[error("invalid base64 data section: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Conversion from a Kafka record to an outgoing AMQP message
pub trait MessageConverter: Send + Sync {
    /// Build the AMQP message for `record`, addressed to `address`
    fn to_amqp(&self, address: &str, record: &KafkaRecord) -> Result<AmqpMessage, ConvertError>;
}

/// Raw-bytes converter: the record payload becomes a data section
#[derive(Debug, Default)]
pub struct DefaultConverter;

impl MessageConverter for DefaultConverter {
    fn to_amqp(&self, address: &str, record: &KafkaRecord) -> Result<AmqpMessage, ConvertError> {
        let mut message = AmqpMessage::new(address, AmqpBody::Data(record.value.clone()));
        set_bridge_annotations(&mut message, record);
        Ok(message)
    }
}

/// JSON envelope converter.
///
/// The record payload is a JSON object that may carry `properties`
/// (messageId, to, subject, replyTo, correlationId),
/// `applicationProperties`, `messageAnnotations` and a `body` of either
/// `{type: "amqpValue", section: <string>}` or
/// `{type: "data", section: <base64>}`.
#[derive(Debug, Default)]
pub struct JsonConverter;

impl MessageConverter for JsonConverter {
    fn to_amqp(&self, address: &str, record: &KafkaRecord) -> Result<AmqpMessage, ConvertError> {
        let envelope: Value = serde_json::from_slice(&record.value)?;

        let mut message = AmqpMessage::new(address, AmqpBody::Data(Vec::new()));
        set_bridge_annotations(&mut message, record);

        if let Some(properties) = envelope.get(PROPERTIES) {
            if let Some(message_id) = properties.get(MESSAGE_ID).and_then(Value::as_str) {
                message.message_id = Some(message_id.to_string());
            }
            if let Some(to) = properties.get(TO).and_then(Value::as_str) {
                message.address = Some(to.to_string());
            }
            if let Some(subject) = properties.get(SUBJECT).and_then(Value::as_str) {
                message.subject = Some(subject.to_string());
            }
            if let Some(reply_to) = properties.get(REPLY_TO).and_then(Value::as_str) {
                message.reply_to = Some(reply_to.to_string());
            }
            if let Some(correlation_id) = properties.get(CORRELATION_ID).and_then(Value::as_str) {
                message.correlation_id = Some(correlation_id.to_string());
            }
        }

        if let Some(Value::Object(entries)) = envelope.get(APPLICATION_PROPERTIES) {
            for (key, value) in entries {
                if let Some(value) = json_to_amqp_value(value) {
                    message.application_properties.insert(key.clone(), value);
                }
            }
        }

        // envelope annotations may extend (or override) the bridge ones
        if let Some(Value::Object(entries)) = envelope.get(MESSAGE_ANNOTATIONS) {
            for (key, value) in entries {
                if let Some(value) = json_to_amqp_value(value) {
                    message.set_annotation(key.clone(), value);
                }
            }
        }

        if let Some(body) = envelope.get(BODY) {
            message.body = parse_body(body)?;
        }

        Ok(message)
    }
}

/// Resolve a converter by its configured name.
///
/// Unknown names fall back to the default converter with a warning, so a
/// misconfigured bridge still delivers.
pub fn converter_for(name: &str) -> Arc<dyn MessageConverter> {
    match name {
        CONVERTER_JSON => Arc::new(JsonConverter),
        CONVERTER_DEFAULT => Arc::new(DefaultConverter),
        other => {
            warn!(
                converter = other,
                "unknown message converter, falling back to default"
            );
            Arc::new(DefaultConverter)
        }
    }
}

fn set_bridge_annotations(message: &mut AmqpMessage, record: &KafkaRecord) {
    message.set_annotation(AMQP_PARTITION_ANNOTATION, AmqpValue::Int(record.partition));
    message.set_annotation(AMQP_OFFSET_ANNOTATION, AmqpValue::Long(record.offset));
    if let Some(key) = &record.key {
        message.set_annotation(AMQP_KEY_ANNOTATION, AmqpValue::Bytes(key.clone()));
    }
}

fn json_to_amqp_value(value: &Value) -> Option<AmqpValue> {
    match value {
        Value::Bool(b) => Some(AmqpValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(AmqpValue::Long(i))
            } else {
                n.as_f64().map(AmqpValue::Double)
            }
        }
        Value::String(s) => Some(AmqpValue::String(s.clone())),
        _ => None,
    }
}

fn parse_body(body: &Value) -> Result<AmqpBody, ConvertError> {
    let section_type = body
        .get(SECTION_TYPE)
        .and_then(Value::as_str)
        .ok_or_else(|| ConvertError::UnsupportedSection("missing section type".to_string()))?;

    match section_type {
        SECTION_AMQP_VALUE_TYPE => {
            let section = body.get(SECTION).and_then(Value::as_str).ok_or_else(|| {
                ConvertError::UnsupportedSection("amqpValue section must be a string".to_string())
            })?;
            Ok(AmqpBody::Value(section.to_string()))
        }
        SECTION_DATA_TYPE => {
            let section = body.get(SECTION).and_then(Value::as_str).ok_or_else(|| {
                ConvertError::UnsupportedSection("data section must be base64 text".to_string())
            })?;
            Ok(AmqpBody::Data(general_purpose::STANDARD.decode(section)?))
        }
        other => Err(ConvertError::UnsupportedSection(other.to_string())),
    }
}
