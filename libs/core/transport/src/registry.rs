//! Process-wide connection sharing.
//!
//! Many queue instances typically point at the same servers. The registry
//! hands out one shared connection per distinct configuration so hundreds of
//! channel objects do not exhaust fabric resources.

use crate::error::TransportError;
use crate::nats::{NatsOptions, NatsTransport};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Stable fingerprint of a connection configuration.
///
/// The server list is sorted and deduplicated first, so reordered endpoint
/// lists map to the same connection. TLS material paths are part of the
/// fingerprint: the same servers with different certificates get separate
/// connections.
pub fn fingerprint(options: &NatsOptions) -> [u8; 32] {
    let mut servers = options.servers.clone();
    servers.sort();
    servers.dedup();

    let mut hasher = Sha256::new();
    for server in &servers {
        hasher.update(server.as_bytes());
        hasher.update([0u8]);
    }
    if let Some(tls) = &options.tls {
        hasher.update(b"tls");
        hasher.update(tls.key_path.as_os_str().as_encoded_bytes());
        hasher.update([0u8]);
        hasher.update(tls.cert_path.as_os_str().as_encoded_bytes());
        hasher.update([0u8]);
        if let Some(ca) = &tls.ca_path {
            hasher.update(ca.as_os_str().as_encoded_bytes());
        }
    }
    hasher.finalize().into()
}

/// Cache of shared NATS connections keyed by configuration fingerprint.
///
/// Construct one at startup and pass it by reference to every queue
/// instance. Connections live until the process exits; there is no eviction.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<[u8; 32], Arc<NatsTransport>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the shared connection for a configuration, connecting on first
    /// use.
    ///
    /// The registry lock is held across the connect so concurrent callers
    /// with the same fingerprint still end up on a single connection.
    pub async fn get(&self, options: &NatsOptions) -> Result<Arc<NatsTransport>, TransportError> {
        let key = fingerprint(options);
        let mut connections = self.connections.lock().await;

        if let Some(existing) = connections.get(&key) {
            return Ok(existing.clone());
        }

        debug!(servers = ?options.servers, "Opening new shared connection");
        let connection = Arc::new(NatsTransport::connect(options).await?);
        connections.insert(key, connection.clone());
        Ok(connection)
    }

    /// Number of distinct connections currently cached.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Whether the registry holds no connections yet.
    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }
}
