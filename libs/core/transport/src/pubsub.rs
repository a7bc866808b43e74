//! Core transport traits consumed by the queue engine.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;

/// A message delivered to a subscription.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Raw payload as handed over by the fabric.
    pub payload: Bytes,
    /// Subject to publish replies to, when the sender expects any.
    pub reply_to: Option<String>,
}

/// Fire-and-forget pub/sub fabric.
///
/// Implementations must be safe to share across tasks; all methods take
/// `&self` and may be called concurrently.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish a payload to a subject.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Publish a payload to a subject, asking receivers to reply on
    /// `reply_to`.
    async fn publish_with_reply(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    /// Subscribe to a subject.
    ///
    /// With a queue group, exactly one member of the group receives each
    /// message. Without one, every subscriber receives every message.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    /// Generate a unique inbox subject for reply routing.
    fn new_inbox(&self) -> String;
}

/// An active subscription on a [`Transport`].
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. Returns `None` once the subscription is
    /// closed.
    async fn next(&mut self) -> Option<InboundMessage>;

    /// Stop receiving messages. Idempotent.
    async fn unsubscribe(&mut self) -> Result<(), TransportError>;
}
