//! Caller side of a request: correlation, timers, settle-once.
//!
//! Each request gets its own reply inbox subscription and a dedicated task
//! driving a small state machine: pending, then exactly one of resolved or
//! rejected. Two timers bound the wait:
//!
//! - the **response timeout** fires if no worker claims the job within the
//!   configured timeout; a `received` reply cancels it
//! - the **keep-alive timer** fires if the worker goes silent for twice the
//!   timeout; every inbound reply re-arms it, so it also catches a worker
//!   that claimed the job and then died mid-handler
//!
//! Settlement is idempotent by construction: the driving loop exits on the
//! first terminal transition, unsubscribes exactly once, and later replies
//! or timer firings have nothing left to act on.

use crate::codec;
use crate::context::RequestContext;
use crate::envelope::{Reply, Request, Status};
use crate::error::QueueError;
use serde_json::Value;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};
use transport::{Subscription, Transport};

/// Handle to an in-flight request.
///
/// Progress notifications arrive in transport order, strictly before the
/// terminal outcome. Consuming them is optional; unread notifications are
/// dropped with the handle.
pub struct RequestHandle {
    progress: mpsc::UnboundedReceiver<Value>,
    result: oneshot::Receiver<Result<Value, QueueError>>,
}

impl RequestHandle {
    /// Next progress notification, or `None` once the request has settled
    /// and all notifications were consumed.
    pub async fn next_progress(&mut self) -> Option<Value> {
        self.progress.recv().await
    }

    /// Wait for the terminal outcome.
    pub async fn result(self) -> Result<Value, QueueError> {
        self.result.await.unwrap_or(Err(QueueError::Closed))
    }
}

/// Send a request and spawn the reply-driving task.
pub(crate) async fn start(
    transport: Arc<dyn Transport>,
    channel: &str,
    data: Value,
    context: &RequestContext,
    timeout: Duration,
) -> Result<RequestHandle, QueueError> {
    let payload = codec::encode(&Request::new(data, context))?;

    let inbox = transport.new_inbox();
    let subscription = transport.subscribe(&inbox, None).await?;
    transport.publish_with_reply(channel, &inbox, payload).await?;

    debug!(channel = %channel, inbox = %inbox, "Sent queue request");

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let (result_tx, result_rx) = oneshot::channel();

    tokio::spawn(drive(
        channel.to_string(),
        subscription,
        timeout,
        progress_tx,
        result_tx,
    ));

    Ok(RequestHandle {
        progress: progress_rx,
        result: result_rx,
    })
}

/// Drive one request to its single settlement.
async fn drive(
    channel: String,
    mut subscription: Box<dyn Subscription>,
    timeout: Duration,
    progress_tx: mpsc::UnboundedSender<Value>,
    result_tx: oneshot::Sender<Result<Value, QueueError>>,
) {
    let keep_alive_bound = timeout * 2;
    // cleared once a worker claims the job
    let mut response_deadline = Some(Instant::now() + timeout);
    let mut keep_alive_deadline = Instant::now() + keep_alive_bound;

    let outcome = loop {
        let response_timer = async {
            match response_deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            () = response_timer => {
                break Err(QueueError::Timeout { channel: channel.clone() });
            }
            () = sleep_until(keep_alive_deadline) => {
                break Err(QueueError::KeepAliveExpired { channel: channel.clone() });
            }
            message = subscription.next() => {
                let Some(message) = message else {
                    break Err(QueueError::Closed);
                };

                // any sign of life from the worker re-arms the keep-alive
                keep_alive_deadline = Instant::now() + keep_alive_bound;

                let value = match codec::decode(&message.payload) {
                    Ok(value) => value,
                    Err(error) => {
                        warn!(channel = %channel, error = %error, "Unparseable reply");
                        break Err(QueueError::Malformed {
                            channel: channel.clone(),
                            raw: String::from_utf8_lossy(&message.payload).into_owned(),
                        });
                    }
                };

                let Some(reply) = Reply::from_value(&value) else {
                    debug!(channel = %channel, "Discarding reply without a recognized status");
                    continue;
                };

                match reply.status {
                    Status::Received => {
                        response_deadline = None;
                    }
                    Status::Started | Status::KeepAlive => {}
                    Status::Progress => {
                        let info = reply
                            .progress
                            .unwrap_or_else(|| Value::String(String::new()));
                        let _ = progress_tx.send(info);
                    }
                    Status::Finished => {
                        break Ok(reply.response.unwrap_or(Value::Null));
                    }
                    Status::Error => {
                        break Err(QueueError::App(reply.error.unwrap_or_default()));
                    }
                    // filtered out by Reply::from_value
                    Status::Unknown => continue,
                }
            }
        }
    };

    if let Err(error) = subscription.unsubscribe().await {
        warn!(channel = %channel, error = %error, "Failed to unsubscribe reply inbox");
    }

    // progress sender drops here, so notifications end before the terminal
    // outcome becomes observable
    drop(progress_tx);
    let _ = result_tx.send(outcome);
}
