//! Request/reply messaging over a fire-and-forget pub/sub fabric.
//!
//! The underlying transport only offers publish and subscribe; this crate
//! layers a request lifecycle on top: correlation via per-request reply
//! inboxes, a liveness protocol so callers can tell "no worker available"
//! from "worker died mid-job", worker-side admission control, and
//! exactly-once settlement under races between timeouts, late replies and
//! duplicates.
//!
//! ```text
//!  caller                                   worker
//!    │  request ──────────────▶ channel ──▶ admission (queue group)
//!    │                                        │ received
//!    │ ◀── received ─────────────────────────┤ keep-alive (every T)
//!    │ ◀── started / progress* ──────────────┤ handler runs
//!    │ ◀── finished | error ─────────────────┘
//!    ▼  settle once
//! ```
//!
//! A caller gives up after `T` without a `received` claim, or after `2T` of
//! silence from a worker that did claim the job. Workers cap concurrency by
//! unsubscribing from the channel while at capacity, so the fabric routes
//! jobs to instances with free slots.
//!
//! ```no_run
//! use queue::{Job, Queue, QueueOptions};
//! use serde_json::json;
//! use transport::ConnectionRegistry;
//!
//! # async fn example() -> Result<(), queue::QueueError> {
//! let registry = ConnectionRegistry::new();
//! let queue = Queue::connect(QueueOptions::new("jobs"), &registry).await?;
//!
//! queue
//!     .process(|job: Job| async move { Ok(json!({"echo": job.request})) })
//!     .await?;
//!
//! let response = queue.request(json!({"work": 1})).await?.result().await?;
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
mod context;
mod envelope;
mod error;
mod processor;
mod queue;
mod requester;

pub use codec::{decode, encode, DecodeError};
pub use config::{QueueOptions, DEFAULT_TIMEOUT, DEFAULT_WORKERS};
pub use context::RequestContext;
pub use envelope::{Reply, Request, Status};
pub use error::QueueError;
pub use processor::{Handler, Job, JobError, ProcessHandle, ProcessOptions};
pub use queue::{Queue, SubscribeHandle};
pub use requester::RequestHandle;
