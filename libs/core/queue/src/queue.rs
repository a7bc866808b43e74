//! Channel facade tying requester and processor to a shared transport.

use crate::codec;
use crate::config::QueueOptions;
use crate::context::RequestContext;
use crate::envelope::Request;
use crate::error::QueueError;
use crate::processor::{Handler, ProcessHandle, ProcessOptions, Processor};
use crate::requester::{self, RequestHandle};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};
use transport::{ConnectionRegistry, Transport};

/// A logical request/reply channel.
///
/// One instance can be used for both sides: callers issue [`request`]s,
/// workers register a handler with [`process`]. Instances pointing at the
/// same servers share a single connection through the
/// [`ConnectionRegistry`].
///
/// [`request`]: Queue::request
/// [`process`]: Queue::process
pub struct Queue {
    transport: Arc<dyn Transport>,
    options: QueueOptions,
    processors: Mutex<Vec<Arc<Processor>>>,
}

impl Queue {
    /// Open a channel on a shared connection from the registry.
    pub async fn connect(
        options: QueueOptions,
        registry: &ConnectionRegistry,
    ) -> Result<Self, QueueError> {
        options.validate()?;
        let transport = registry.get(&options.transport_options()).await?;
        Ok(Self::from_parts(transport, options))
    }

    /// Open a channel on an explicit transport.
    ///
    /// Used by tests against the in-memory fabric and by embedders that
    /// manage connections themselves.
    pub fn with_transport(
        options: QueueOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, QueueError> {
        options.validate()?;
        Ok(Self::from_parts(transport, options))
    }

    fn from_parts(transport: Arc<dyn Transport>, options: QueueOptions) -> Self {
        Self {
            transport,
            options,
            processors: Mutex::new(Vec::new()),
        }
    }

    /// Channel name this queue operates on.
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Send a request with an empty context.
    pub async fn request(&self, data: Value) -> Result<RequestHandle, QueueError> {
        self.request_with_context(data, &RequestContext::new()).await
    }

    /// Send a request carrying the caller's correlation id.
    ///
    /// The returned handle settles exactly once: with the worker's response,
    /// the worker's error text, a response timeout when no worker claims the
    /// job in time, or a keep-alive expiry when a worker claims it and then
    /// goes silent.
    pub async fn request_with_context(
        &self,
        data: Value,
        context: &RequestContext,
    ) -> Result<RequestHandle, QueueError> {
        requester::start(
            self.transport.clone(),
            &self.options.name,
            data,
            context,
            self.options.timeout,
        )
        .await
    }

    /// Register a job handler with the queue's default worker ceiling and
    /// timeout.
    pub async fn process<H: Handler>(&self, handler: H) -> Result<ProcessHandle, QueueError> {
        self.process_with_options(handler, ProcessOptions::default())
            .await
    }

    /// Register a job handler, overriding worker ceiling and timeout.
    ///
    /// Jobs are distributed over all processing instances of the channel via
    /// a queue group; each instance runs at most its configured number of
    /// handlers concurrently and stops taking jobs while at capacity.
    pub async fn process_with_options<H: Handler>(
        &self,
        handler: H,
        options: ProcessOptions,
    ) -> Result<ProcessHandle, QueueError> {
        let workers = options.workers.unwrap_or(self.options.workers);
        if workers < 1 {
            return Err(QueueError::Config("workers must be at least 1".into()));
        }
        let timeout = options.timeout.unwrap_or(self.options.timeout);

        let processor = Processor::new(
            self.transport.clone(),
            self.options.name.clone(),
            workers,
            timeout,
            Arc::new(handler),
        );
        processor.subscribe().await?;

        let mut processors = self.processors.lock().unwrap();
        processors.retain(|p| !p.is_stopped());
        processors.push(processor.clone());
        Ok(processor.into_handle())
    }

    /// Publish a fire-and-forget notification with an empty context.
    pub async fn publish(&self, data: Value) -> Result<(), QueueError> {
        self.publish_with_context(data, &RequestContext::new()).await
    }

    /// Publish a fire-and-forget notification carrying the caller's
    /// correlation id. No reply inbox is created and no outcome is awaited.
    pub async fn publish_with_context(
        &self,
        data: Value,
        context: &RequestContext,
    ) -> Result<(), QueueError> {
        let payload = codec::encode(&Request::new(data, context))?;
        self.transport.publish(&self.options.name, payload).await?;
        debug!(channel = %self.options.name, "Published notification");
        Ok(())
    }

    /// Listen for notifications on the channel.
    ///
    /// Unlike [`process`](Queue::process) there is no admission control, no
    /// reply protocol, and no queue group: every listener receives every
    /// notification, and listeners never compete with workers for request
    /// jobs. Dropping the returned handle or calling
    /// [`SubscribeHandle::unsubscribe`] stops delivery.
    pub async fn subscribe<F, Fut>(&self, listener: F) -> Result<SubscribeHandle, QueueError>
    where
        F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.transport.subscribe(&self.options.name, None).await?;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let channel = self.options.name.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    message = subscription.next() => {
                        let Some(message) = message else { break };
                        match codec::decode(&message.payload) {
                            Ok(value) => {
                                let request = Request::from_value(value);
                                let context = RequestContext::from_envelope(request.request_id);
                                listener(request.data, context).await;
                            }
                            Err(e) => {
                                warn!(channel = %channel, error = %e, "Failed to decode notification");
                            }
                        }
                    }
                }
            }
            if let Err(e) = subscription.unsubscribe().await {
                warn!(channel = %channel, error = %e, "Failed to unsubscribe listener");
            }
        });

        Ok(SubscribeHandle {
            stop_tx: Some(stop_tx),
        })
    }

    /// Unsubscribe all job listeners while keeping their handler
    /// registrations. In-flight handlers run to completion; their release
    /// does not resubscribe until [`unpause`](Queue::unpause).
    pub fn pause(&self) {
        let processors = self.processors.lock().unwrap();
        for processor in processors.iter() {
            processor.pause();
        }
    }

    /// Resubscribe all paused job listeners with their original handlers.
    pub async fn unpause(&self) -> Result<(), QueueError> {
        let processors: Vec<Arc<Processor>> = {
            let processors = self.processors.lock().unwrap();
            processors.iter().cloned().collect()
        };
        for processor in processors {
            processor.unpause().await?;
        }
        Ok(())
    }
}

/// Handle to a notification listener started by [`Queue::subscribe`].
pub struct SubscribeHandle {
    stop_tx: Option<watch::Sender<bool>>,
}

impl SubscribeHandle {
    /// Stop the listener.
    pub fn unsubscribe(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
    }
}

impl Drop for SubscribeHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
