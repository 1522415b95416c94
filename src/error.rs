//! Error types for the relay pipeline.
//!
//! Startup paths bubble up through `anyhow`; everything that a worker or the
//! publisher has to branch on is typed here.

use std::time::Duration;

use thiserror::Error;

/// Failures talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connection(String),

    #[error("failed to open channel: {0}")]
    Channel(String),

    #[error("failed to publish to exchange '{exchange}': {message}")]
    Publish { exchange: String, message: String },

    #[error("broker refused message published to exchange '{exchange}'")]
    PublishNacked { exchange: String },

    #[error("failed to acknowledge delivery {delivery_tag}: {message}")]
    Acknowledge { delivery_tag: u64, message: String },

    #[error("failed to reject delivery {delivery_tag}: {message}")]
    Reject { delivery_tag: u64, message: String },

    #[error("failed to start consumer on queue '{queue}': {message}")]
    Consume { queue: String, message: String },
}

/// A declaration in the exchange/queue graph could not be made.
///
/// Re-declaring an existing queue with different arguments (for example a new
/// TTL) lands here as well, since the broker refuses it.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to declare exchange '{name}': {message}")]
    Exchange { name: String, message: String },

    #[error("failed to declare queue '{name}': {message}")]
    Queue { name: String, message: String },

    #[error("failed to bind queue '{queue}' to exchange '{exchange}' with key '{routing_key}': {message}")]
    Binding {
        queue: String,
        exchange: String,
        routing_key: String,
        message: String,
    },

    #[error("invalid topology configuration: {0}")]
    Invalid(String),
}

/// Reasons a request could not be durably enqueued.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize notification request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("publisher task is no longer running")]
    Closed,
}

/// Outcome of a failed call to the push provider.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("provider rejected notification: HTTP {status_code}: {body}")]
    Rejected { status_code: u16, body: String },

    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("failed to obtain provider access token: {0}")]
    Authentication(String),

    #[error("delivery timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}
