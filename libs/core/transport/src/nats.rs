//! NATS core transport backend.

use crate::error::TransportError;
use crate::pubsub::{InboundMessage, Subscription, Transport};
use async_nats::ConnectOptions;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Default NATS endpoint when none is configured.
pub const DEFAULT_SERVER: &str = "nats://localhost:4222";

/// Fixed delay between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// TLS material for a secured connection.
///
/// Paths are handed to the NATS client as-is; certificate loading and
/// validation happen inside the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Client private key (PEM).
    pub key_path: PathBuf,
    /// Client certificate (PEM).
    pub cert_path: PathBuf,
    /// Root CA bundle, when the servers use a private CA.
    pub ca_path: Option<PathBuf>,
}

/// Connection options for [`NatsTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsOptions {
    /// Server endpoint URIs.
    pub servers: Vec<String>,
    /// TLS material; when present the connection requires TLS.
    pub tls: Option<TlsOptions>,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            servers: vec![DEFAULT_SERVER.to_string()],
            tls: None,
        }
    }
}

impl NatsOptions {
    /// Create options for the given servers.
    pub fn new(servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            tls: None,
        }
    }

    /// Set the TLS material.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Transport backed by a NATS core connection.
///
/// The connection retries indefinitely with a fixed delay, so a fabric
/// outage stalls traffic instead of failing the process. In-flight requests
/// are bounded by the queue layer's keep-alive timers, not by the
/// connection.
pub struct NatsTransport {
    client: async_nats::Client,
}

impl NatsTransport {
    /// Connect to the configured servers.
    pub async fn connect(options: &NatsOptions) -> Result<Self, TransportError> {
        let mut connect = ConnectOptions::new()
            .retry_on_initial_connect()
            .max_reconnects(None::<usize>)
            .reconnect_delay_callback(|_attempts| RECONNECT_DELAY);

        if let Some(tls) = &options.tls {
            connect = connect
                .require_tls(true)
                .add_client_certificate(tls.cert_path.clone(), tls.key_path.clone());
            if let Some(ca) = &tls.ca_path {
                connect = connect.add_root_certificates(ca.clone());
            }
        }

        let client = connect.connect(options.servers.join(",")).await?;

        debug!(servers = ?options.servers, tls = options.tls.is_some(), "Connected to NATS");

        Ok(Self { client })
    }

    /// Wrap an already connected client.
    pub fn from_client(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| TransportError::publish_error(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::publish_error(e.to_string()))
    }

    async fn publish_with_reply(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.client
            .publish_with_reply(subject.to_string(), reply_to.to_string(), payload)
            .await
            .map_err(|e| TransportError::publish_error(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::publish_error(e.to_string()))
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let subscriber = match queue_group {
            Some(group) => self
                .client
                .queue_subscribe(subject.to_string(), group.to_string())
                .await,
            None => self.client.subscribe(subject.to_string()).await,
        }
        .map_err(|e| TransportError::subscribe_error(e.to_string()))?;

        Ok(Box::new(NatsSubscription { subscriber }))
    }

    fn new_inbox(&self) -> String {
        self.client.new_inbox()
    }
}

/// Subscription on a [`NatsTransport`].
struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<InboundMessage> {
        self.subscriber.next().await.map(|message| InboundMessage {
            payload: message.payload,
            reply_to: message.reply.map(|subject| subject.to_string()),
        })
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| TransportError::unsubscribe_error(e.to_string()))
    }
}
