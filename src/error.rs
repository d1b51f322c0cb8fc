//! Error handling module for StreamBridge
//!
//! This module defines the error types used throughout the bridge,
//! providing a unified error handling strategy with proper error context.
//!
//! Address and filter violations reported to an AMQP peer are *not* crate
//! errors; they travel as link error conditions (see
//! [`crate::amqp::ErrorCondition`]). The variants here cover failures the
//! embedding application has to deal with: bad configuration, Kafka client
//! failures, and internal invariant breaks.

use thiserror::Error;

/// Result type alias for StreamBridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for StreamBridge
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka related errors
    #[error("Kafka error: {0}")]
    Kafka(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors (e.g. spawning the consumer worker thread)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a Kafka error
    pub fn kafka<S: Into<String>>(msg: S) -> Self {
        Error::Kafka(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Kafka(_) | Error::Io(_))
    }
}

/// Convert from rdkafka errors to our Error type
impl From<rdkafka::error::KafkaError> for Error {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Error::Kafka(err.to_string())
    }
}

/// Convert from anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

/// Convert from envconfig::Error to our Error type
impl From<envconfig::Error> for Error {
    fn from(err: envconfig::Error) -> Self {
        Error::Config(err.to_string())
    }
}
