//! Worker side of a channel: admission control and job dispatch.
//!
//! One processor owns one queue-group listener and a shared
//! `running_workers` counter. Capacity is enforced through the subscription
//! itself: when the counter reaches the configured ceiling the listener
//! unsubscribes, so the fabric stops offering jobs to this instance; when a
//! handler completes and frees a slot, the listener resubscribes. The
//! invariant is that the subscription is active exactly when
//! `running_workers < total_workers` (unless explicitly stopped or paused).
//!
//! For every accepted job the processor publishes the liveness protocol to
//! the caller's reply inbox: `received` immediately (cancels the caller's
//! response timeout), a recurring `keep-alive` at the configured timeout
//! interval for the duration of the handler, `started` just before the
//! handler runs, any `progress` the handler emits, and exactly one terminal
//! `finished`/`error`.

use crate::codec;
use crate::context::RequestContext;
use crate::envelope::{Reply, Request};
use crate::error::QueueError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use transport::{InboundMessage, Subscription, Transport};

/// Failure reported by a job handler.
///
/// The text travels in the `error` envelope field verbatim and becomes the
/// caller's rejection reason as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// A job handed to a [`Handler`].
pub struct Job {
    /// Decoded application payload of the request.
    pub request: Value,
    /// Context the request was sent with; nested requests made from the
    /// handler should carry it so the correlation id is inherited.
    pub context: RequestContext,
    transport: Arc<dyn Transport>,
    reply_to: Option<String>,
}

impl Job {
    /// Publish a progress notification to the caller.
    ///
    /// May be called any number of times before the handler returns. A null
    /// payload is sent as an empty string.
    pub async fn progress<T: Serialize>(&self, info: T) -> Result<(), QueueError> {
        let value = serde_json::to_value(info).map_err(|source| {
            error!("failed to convert progress data to string: {source}");
            QueueError::Encode { source }
        })?;
        let value = if value.is_null() {
            Value::String(String::new())
        } else {
            value
        };

        let Some(reply_to) = &self.reply_to else {
            return Ok(());
        };
        let payload = codec::encode(&Reply::progress(value))?;
        self.transport.publish(reply_to, payload).await?;
        Ok(())
    }
}

/// Application job handler.
///
/// Implemented automatically for async closures taking a [`Job`].
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Process one job, returning the response payload or the error text
    /// to reject the caller with.
    async fn handle(&self, job: Job) -> Result<Value, JobError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    async fn handle(&self, job: Job) -> Result<Value, JobError> {
        (self)(job).await
    }
}

/// Per-listener overrides for [`Queue::process`](crate::Queue::process).
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Worker ceiling for this listener; defaults to the queue's setting.
    pub workers: Option<usize>,
    /// Keep-alive interval / liveness timeout for this listener; defaults
    /// to the queue's setting.
    pub timeout: Option<Duration>,
}

impl ProcessOptions {
    /// Override the worker ceiling.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Override the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Handle returned by [`Queue::process`](crate::Queue::process).
pub struct ProcessHandle {
    processor: Arc<Processor>,
}

impl ProcessHandle {
    /// Tear down the listener.
    ///
    /// Sticky: in-flight handlers run to completion, but their release no
    /// longer resubscribes. Call `process` again to start listening anew.
    pub fn unsubscribe(&self) {
        self.processor.stop();
    }
}

struct ProcessorState {
    running_workers: usize,
    subscribed: bool,
    /// Set by the unsubscribe handle; never cleared.
    stopped: bool,
    /// Set by pause, cleared by unpause.
    paused: bool,
    /// Bumped per subscription so a finished dispatcher cannot clobber the
    /// bookkeeping of its replacement.
    generation: u64,
    stop_tx: Option<watch::Sender<bool>>,
}

/// Admission controller for one channel listener.
pub(crate) struct Processor {
    transport: Arc<dyn Transport>,
    channel: String,
    total_workers: usize,
    timeout: Duration,
    handler: Arc<dyn Handler>,
    state: Mutex<ProcessorState>,
}

impl Processor {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        channel: impl Into<String>,
        total_workers: usize,
        timeout: Duration,
        handler: Arc<dyn Handler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            channel: channel.into(),
            total_workers,
            timeout,
            handler,
            state: Mutex::new(ProcessorState {
                running_workers: 0,
                subscribed: false,
                stopped: false,
                paused: false,
                generation: 0,
                stop_tx: None,
            }),
        })
    }

    pub(crate) fn into_handle(self: Arc<Self>) -> ProcessHandle {
        ProcessHandle { processor: self }
    }

    /// Start the queue-group listener. No-op when already listening,
    /// stopped, or paused.
    ///
    /// Returns a boxed future because this is recursively reachable from
    /// itself (subscribe -> dispatch -> accept -> release_slot ->
    /// subscribe), which an `async fn`'s opaque type cannot express.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> {
        let this = self.clone();
        Box::pin(async move { this.subscribe_inner().await })
    }

    async fn subscribe_inner(self: &Arc<Self>) -> Result<(), QueueError> {
        let generation = {
            let mut state = self.state.lock().unwrap();
            if state.subscribed {
                debug!(channel = %self.channel, "Listener already waiting, returning");
                return Ok(());
            }
            if state.stopped || state.paused {
                return Ok(());
            }
            state.subscribed = true;
            state.generation += 1;
            state.generation
        };

        let subscription = match self
            .transport
            .subscribe(&self.channel, Some(&self.channel))
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                let mut state = self.state.lock().unwrap();
                if state.generation == generation {
                    state.subscribed = false;
                }
                return Err(e.into());
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        // decide under the lock, await after it is released
        let torn_down = {
            let mut state = self.state.lock().unwrap();
            if state.stopped || state.paused {
                // stop or pause requested while the subscribe was in flight
                state.subscribed = false;
                true
            } else {
                state.stop_tx = Some(stop_tx);
                info!(
                    channel = %self.channel,
                    total = self.total_workers,
                    running = state.running_workers,
                    "Subscribing for jobs"
                );
                false
            }
        };
        if torn_down {
            let mut subscription = subscription;
            if let Err(e) = subscription.unsubscribe().await {
                warn!(channel = %self.channel, error = %e, "Failed to unsubscribe listener");
            }
            return Ok(());
        }

        tokio::spawn(self.clone().dispatch(subscription, stop_rx, generation));
        Ok(())
    }

    async fn dispatch(
        self: Arc<Self>,
        mut subscription: Box<dyn Subscription>,
        mut stop_rx: watch::Receiver<bool>,
        generation: u64,
    ) {
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                message = subscription.next() => {
                    let Some(message) = message else { break };
                    let at_capacity = self.accept(message).await;
                    if at_capacity {
                        break;
                    }
                }
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            warn!(channel = %self.channel, error = %e, "Failed to unsubscribe listener");
        }

        let mut state = self.state.lock().unwrap();
        if state.generation == generation {
            state.subscribed = false;
            state.stop_tx = None;
        }
    }

    /// Admit one job. Returns whether the listener hit capacity and must
    /// stop accepting.
    async fn accept(self: &Arc<Self>, message: InboundMessage) -> bool {
        let at_capacity = {
            let mut state = self.state.lock().unwrap();
            state.running_workers += 1;
            info!(
                channel = %self.channel,
                total = self.total_workers,
                running = state.running_workers,
                "Got job"
            );
            let at_capacity = state.running_workers >= self.total_workers;
            if at_capacity {
                info!(
                    channel = %self.channel,
                    total = self.total_workers,
                    running = state.running_workers,
                    "Max workers reached, unsubscribing"
                );
                // mark closed before the handler can complete, so a fast
                // release observes the listener as inactive and resubscribes
                state.subscribed = false;
            }
            at_capacity
        };

        let reply_to = message.reply_to.clone();

        let request = match codec::decode(&message.payload) {
            Ok(value) => Request::from_value(value),
            Err(e) => {
                warn!(
                    channel = %self.channel,
                    error = %e,
                    payload = ?message.payload,
                    "Failed to decode job payload"
                );
                self.publish_reply(
                    reply_to.as_deref(),
                    &Reply::error(format!(
                        "Uncaught exception during handling of request: {}: {e}",
                        self.channel
                    )),
                )
                .await;
                self.release_slot().await;
                return at_capacity;
            }
        };

        // the caller cancels its response timeout on this
        self.publish_reply(reply_to.as_deref(), &Reply::received())
            .await;

        // liveness pulse for the duration of the handler
        let keep_alive = tokio::spawn({
            let transport = self.transport.clone();
            let channel = self.channel.clone();
            let reply_to = reply_to.clone();
            let interval = self.timeout;
            async move {
                let Some(reply_to) = reply_to else { return };
                let payload = match codec::encode(&Reply::keep_alive()) {
                    Ok(payload) => payload,
                    Err(_) => return,
                };
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // first tick is immediate
                loop {
                    ticker.tick().await;
                    if let Err(e) = transport.publish(&reply_to, payload.clone()).await {
                        warn!(channel = %channel, error = %e, "Failed to publish keep-alive");
                    }
                }
            }
        });

        self.publish_reply(reply_to.as_deref(), &Reply::started())
            .await;

        let job = Job {
            request: request.data,
            context: RequestContext::from_envelope(request.request_id),
            transport: self.transport.clone(),
            reply_to: reply_to.clone(),
        };

        let processor = self.clone();
        tokio::spawn(async move {
            let handler = processor.handler.clone();
            // the handler runs in its own task so a panic is contained and
            // surfaces as a join error instead of tearing down dispatch
            let result = tokio::spawn(async move { handler.handle(job).await }).await;
            keep_alive.abort();

            // single completion path: exactly one terminal reply, exactly
            // one slot release, regardless of how the handler ended
            let reply = match result {
                Ok(Ok(response)) => Reply::finished(response),
                Ok(Err(e)) => Reply::error(e.to_string()),
                Err(join_error) => {
                    error!(
                        channel = %processor.channel,
                        error = %join_error,
                        "Uncaught exception during job handling"
                    );
                    Reply::error(format!(
                        "Uncaught exception during handling of request: {}",
                        processor.channel
                    ))
                }
            };
            processor.publish_reply(reply_to.as_deref(), &reply).await;
            processor.release_slot().await;
        });

        at_capacity
    }

    /// Completion bookkeeping: free the slot and resubscribe when below
    /// capacity, unless stopped or paused.
    async fn release_slot(self: &Arc<Self>) {
        let resubscribe = {
            let mut state = self.state.lock().unwrap();
            state.running_workers -= 1;
            info!(
                channel = %self.channel,
                total = self.total_workers,
                running = state.running_workers,
                "Job finished"
            );
            !state.subscribed
                && !state.stopped
                && !state.paused
                && state.running_workers < self.total_workers
        };
        if resubscribe {
            if let Err(e) = self.subscribe().await {
                error!(
                    channel = %self.channel,
                    error = %e,
                    "Failed to resubscribe after releasing worker slot"
                );
            }
        }
    }

    async fn publish_reply(&self, reply_to: Option<&str>, reply: &Reply) {
        let Some(reply_to) = reply_to else { return };
        let payload = match codec::encode(reply) {
            Ok(payload) => payload,
            Err(e) => {
                error!(channel = %self.channel, error = %e, "Failed to encode reply");
                return;
            }
        };
        if let Err(e) = self.transport.publish(reply_to, payload).await {
            warn!(channel = %self.channel, error = %e, "Failed to publish reply");
        }
    }

    /// Sticky teardown from the unsubscribe handle.
    pub(crate) fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        if let Some(stop_tx) = state.stop_tx.take() {
            // the dispatcher tears down on the signal; mark the listener
            // inactive now so nothing waits on its exit
            state.subscribed = false;
            let _ = stop_tx.send(true);
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// Unsubscribe without losing the handler registration.
    pub(crate) fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = true;
        if let Some(stop_tx) = state.stop_tx.take() {
            state.subscribed = false;
            let _ = stop_tx.send(true);
        }
    }

    /// Resume a paused listener with its original handler.
    pub(crate) async fn unpause(self: &Arc<Self>) -> Result<(), QueueError> {
        let resubscribe = {
            let mut state = self.state.lock().unwrap();
            if !state.paused {
                return Ok(());
            }
            state.paused = false;
            !state.stopped && !state.subscribed && state.running_workers < self.total_workers
        };
        if resubscribe {
            self.subscribe().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_error_is_verbatim() {
        let e = JobError::from("handling error");
        assert_eq!(e.to_string(), "handling error");
    }

    #[test]
    fn process_options_overrides() {
        let options = ProcessOptions::default()
            .with_workers(3)
            .with_timeout(Duration::from_secs(2));
        assert_eq!(options.workers, Some(3));
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
    }
}
