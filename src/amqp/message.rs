//! AMQP message model
//!
//! The value types here cover the slice of the AMQP 1.0 message and link
//! model the bridge needs: outgoing messages with annotations and a body,
//! the remote source (address plus filter map) presented on attach, link
//! error conditions, delivery tags, and the two delivery qualities.

use std::collections::BTreeMap;
use std::fmt;

/// A primitive AMQP value, as found in filter maps, message annotations and
/// application properties.
#[derive(Debug, Clone, PartialEq)]
pub enum AmqpValue {
    /// Boolean
    Bool(bool),
    /// 32-bit signed integer (AMQP int)
    Int(i32),
    /// 64-bit signed integer (AMQP long)
    Long(i64),
    /// 64-bit float (AMQP double)
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Opaque binary
    Bytes(Vec<u8>),
}

impl AmqpValue {
    /// Return the value as an i32 if it is an AMQP int
    pub fn as_int(&self) -> Option<i32> {
        match self {
            AmqpValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the value as an i64 if it is an AMQP long
    pub fn as_long(&self) -> Option<i64> {
        match self {
            AmqpValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the value as a string slice if it is an AMQP string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmqpValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Delivery quality negotiated on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryQos {
    /// Transfers are sent pre-settled; the peer never acknowledges
    AtMostOnce,
    /// Transfers stay unsettled until the peer acknowledges them
    AtLeastOnce,
}

/// Outcome reported by the peer when settling a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted,
    Released,
    Rejected,
}

/// Identifier correlating a transfer with its settlement
///
/// Tags are minted from a monotone counter by the consumer worker and are
/// unique for the lifetime of an endpoint; they key the staging map, the
/// notification channel and the offset tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Create a tag from its raw counter value
    pub fn new(value: u64) -> Self {
        DeliveryTag(value)
    }

    /// Raw counter value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Wire representation used as the AMQP transfer tag
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote source presented by the attaching receiver
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Source {
    /// Link address
    pub address: String,

    /// Optional filter map keyed by filter symbol
    pub filter: Option<BTreeMap<String, AmqpValue>>,
}

impl Source {
    /// Create a source with the given address and no filters
    pub fn new<S: Into<String>>(address: S) -> Self {
        Source {
            address: address.into(),
            filter: None,
        }
    }

    /// Attach a filter entry to the source
    pub fn with_filter<S: Into<String>>(mut self, symbol: S, value: AmqpValue) -> Self {
        self.filter
            .get_or_insert_with(BTreeMap::new)
            .insert(symbol.into(), value);
        self
    }
}

/// Error condition signalled on a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCondition {
    /// Condition symbol (part of the contract with clients)
    pub condition: String,

    /// Human-readable description
    pub description: String,
}

impl ErrorCondition {
    /// Create a new error condition
    pub fn new<C: Into<String>, D: Into<String>>(condition: C, description: D) -> Self {
        ErrorCondition {
            condition: condition.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.condition, self.description)
    }
}

/// Body section of an outgoing message
#[derive(Debug, Clone, PartialEq)]
pub enum AmqpBody {
    /// Binary data section
    Data(Vec<u8>),
    /// amqp-value section holding a string
    Value(String),
}

/// An outgoing AMQP message
#[derive(Debug, Clone, PartialEq)]
pub struct AmqpMessage {
    /// Address the message is sent to
    pub address: Option<String>,

    /// Message id property
    pub message_id: Option<String>,

    /// Subject property
    pub subject: Option<String>,

    /// Reply-to property
    pub reply_to: Option<String>,

    /// Correlation id property
    pub correlation_id: Option<String>,

    /// Application properties
    pub application_properties: BTreeMap<String, AmqpValue>,

    /// Message annotations keyed by symbol
    pub annotations: BTreeMap<String, AmqpValue>,

    /// Body section
    pub body: AmqpBody,
}

impl AmqpMessage {
    /// Create a message for the given address and body
    pub fn new<S: Into<String>>(address: S, body: AmqpBody) -> Self {
        AmqpMessage {
            address: Some(address.into()),
            message_id: None,
            subject: None,
            reply_to: None,
            correlation_id: None,
            application_properties: BTreeMap::new(),
            annotations: BTreeMap::new(),
            body,
        }
    }

    /// Set a message annotation
    pub fn set_annotation<S: Into<String>>(&mut self, symbol: S, value: AmqpValue) {
        self.annotations.insert(symbol.into(), value);
    }

    /// Look up a message annotation by symbol
    pub fn annotation(&self, symbol: &str) -> Option<&AmqpValue> {
        self.annotations.get(symbol)
    }
}
