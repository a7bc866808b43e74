//! Queue configuration.

use crate::error::QueueError;
use std::time::Duration;
use transport::{NatsOptions, TlsOptions, DEFAULT_SERVER};

/// Default time for a worker to claim a request before the caller gives up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default worker ceiling per queue instance.
pub const DEFAULT_WORKERS: usize = 1;

/// Options for a [`Queue`](crate::Queue).
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Logical channel name shared by all requesters and workers.
    pub name: String,

    /// Maximum concurrently running handlers for this instance.
    pub workers: usize,

    /// Response timeout: how long a request may wait for a worker to claim
    /// it. The keep-alive bound is twice this, and workers emit keep-alive
    /// signals at this interval while a handler runs.
    pub timeout: Duration,

    /// Transport endpoint URIs.
    pub servers: Vec<String>,

    /// TLS material; when present the connection is secured.
    pub tls: Option<TlsOptions>,
}

impl QueueOptions {
    /// Options for a channel with all defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
            servers: vec![DEFAULT_SERVER.to_string()],
            tls: None,
        }
    }

    /// Set the worker ceiling.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the response timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the transport servers.
    pub fn with_servers(mut self, servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the TLS material.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Check the options are usable.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.name.is_empty() {
            return Err(QueueError::Config("channel name must not be empty".into()));
        }
        if self.workers < 1 {
            return Err(QueueError::Config("workers must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(QueueError::Config("timeout must be non-zero".into()));
        }
        if self.servers.is_empty() {
            return Err(QueueError::Config("servers must not be empty".into()));
        }
        Ok(())
    }

    /// Transport-level connection options derived from these settings.
    pub fn transport_options(&self) -> NatsOptions {
        let mut options = NatsOptions::new(self.servers.iter().cloned());
        if let Some(tls) = &self.tls {
            options = options.with_tls(tls.clone());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = QueueOptions::new("myChannel");
        assert_eq!(options.name, "myChannel");
        assert_eq!(options.workers, 1);
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.servers, vec![DEFAULT_SERVER.to_string()]);
        assert!(options.tls.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let options = QueueOptions::new("jobs")
            .with_workers(4)
            .with_timeout(Duration::from_secs(5))
            .with_servers(["nats://one:4222", "nats://two:4222"]);
        assert_eq!(options.workers, 4);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.servers.len(), 2);
    }

    #[test]
    fn validation_rejects_bad_options() {
        assert!(QueueOptions::new("").validate().is_err());
        assert!(QueueOptions::new("jobs").with_workers(0).validate().is_err());
        assert!(QueueOptions::new("jobs")
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(QueueOptions::new("jobs")
            .with_servers(Vec::<String>::new())
            .validate()
            .is_err());
    }

    #[test]
    fn transport_options_carry_servers_and_tls() {
        let options = QueueOptions::new("jobs").with_servers(["nats://one:4222"]);
        assert_eq!(
            options.transport_options(),
            NatsOptions::new(["nats://one:4222"])
        );
    }
}
