//! Error types for transport operations.

use thiserror::Error;

/// Error that can occur in transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to the fabric could not be established
    #[error("connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),

    /// Subscribe failed
    #[error("subscribe error: {0}")]
    Subscribe(String),

    /// Unsubscribe failed
    #[error("unsubscribe error: {0}")]
    Unsubscribe(String),

    /// The subscription stream ended unexpectedly
    #[error("subscription closed")]
    Closed,
}

impl TransportError {
    /// Create a publish error.
    pub fn publish_error(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Create a subscribe error.
    pub fn subscribe_error(msg: impl Into<String>) -> Self {
        Self::Subscribe(msg.into())
    }

    /// Create an unsubscribe error.
    pub fn unsubscribe_error(msg: impl Into<String>) -> Self {
        Self::Unsubscribe(msg.into())
    }
}
