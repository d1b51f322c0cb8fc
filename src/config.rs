//! Configuration module for StreamBridge
//!
//! This module handles loading and validating configuration from environment
//! variables, providing strongly-typed configuration structures for the AMQP
//! side and the Kafka side of the bridge.

use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure for StreamBridge
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct BridgeConfig {
    /// AMQP-side configuration
    #[serde(flatten)]
    #[envconfig(nested)]
    pub amqp: AmqpConfig,

    /// Kafka-side configuration
    #[serde(flatten)]
    #[envconfig(nested)]
    pub kafka: KafkaConfig,

    /// Log level
    #[envconfig(from = "BRIDGE_LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Environment (development, staging, production)
    #[envconfig(from = "BRIDGE_ENVIRONMENT", default = "development")]
    pub environment: String,
}

/// AMQP-side configuration
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct AmqpConfig {
    /// Host the transport host binds to
    #[envconfig(from = "BRIDGE_AMQP_HOST", default = "0.0.0.0")]
    pub host: String,

    /// Port the transport host listens on
    #[envconfig(from = "BRIDGE_AMQP_PORT", default = "5672")]
    pub port: u16,

    /// Link credit window granted to attaching receivers
    #[envconfig(from = "BRIDGE_AMQP_FLOW_CREDIT", default = "1024")]
    pub flow_credit: u32,

    /// Message converter name (default, json)
    #[envconfig(from = "BRIDGE_AMQP_MESSAGE_CONVERTER", default = "default")]
    pub message_converter: String,
}

impl AmqpConfig {
    /// Get the listen address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Kafka-side configuration
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct KafkaConfig {
    /// Kafka broker addresses (comma-separated)
    #[envconfig(from = "KAFKA_BOOTSTRAP_SERVERS", default = "localhost:9092")]
    pub bootstrap_servers: String,

    /// Offset reset policy for new consumer groups (earliest, latest)
    #[envconfig(from = "KAFKA_AUTO_OFFSET_RESET", default = "latest")]
    pub auto_offset_reset: String,

    /// Enable auto-commit (must stay false for at-least-once delivery)
    #[envconfig(from = "KAFKA_ENABLE_AUTO_COMMIT", default = "false")]
    pub enable_auto_commit: bool,

    /// Session timeout in milliseconds
    #[envconfig(from = "KAFKA_SESSION_TIMEOUT_MS", default = "30000")]
    pub session_timeout_ms: u32,

    /// Poll timeout in milliseconds for each consumer loop iteration
    #[envconfig(from = "KAFKA_POLL_TIMEOUT_MS", default = "100")]
    pub poll_timeout_ms: u64,
}

impl KafkaConfig {
    /// Get brokers as a vector
    pub fn brokers_list(&self) -> Vec<String> {
        self.bootstrap_servers.split(',').map(|s| s.trim().to_string()).collect()
    }

    /// Get session timeout as Duration
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.session_timeout_ms))
    }

    /// Get poll timeout as Duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Build an rdkafka consumer configuration for the given consumer group
    ///
    /// The group id is not part of the bridge configuration; it arrives with
    /// each link attach as the second half of the link address.
    pub fn consumer_config(&self, group_id: &str) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();

        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", self.enable_auto_commit.to_string())
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.partition.eof", "false");

        config
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenv::dotenv().ok();

        // Parse configuration from environment
        BridgeConfig::init_from_env().map_err(Error::from)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.amqp.port == 0 {
            return Err(Error::config("AMQP port cannot be 0"));
        }

        if self.amqp.flow_credit == 0 {
            return Err(Error::config("AMQP flow credit must be at least 1"));
        }

        if self.kafka.bootstrap_servers.is_empty() {
            return Err(Error::config("Kafka bootstrap servers cannot be empty"));
        }

        if !matches!(self.kafka.auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(Error::config(format!(
                "Unknown offset reset policy: {}",
                self.kafka.auto_offset_reset
            )));
        }

        Ok(())
    }

    /// Log configuration
    pub fn log_config(&self) {
        tracing::info!(
            address = %self.amqp.address(),
            flow_credit = %self.amqp.flow_credit,
            message_converter = %self.amqp.message_converter,
            "AMQP configuration"
        );

        tracing::info!(
            bootstrap_servers = %self.kafka.bootstrap_servers,
            auto_offset_reset = %self.kafka.auto_offset_reset,
            enable_auto_commit = %self.kafka.enable_auto_commit,
            "Kafka configuration"
        );
    }
}
