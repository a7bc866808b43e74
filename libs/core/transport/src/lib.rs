//! Pub/sub transport abstraction for the queue layer.
//!
//! The queue engine never talks to NATS directly. It consumes the small
//! capability surface defined here (fire-and-forget publish, queue-group
//! subscribe, per-subscription unsubscribe) so the same protocol logic runs
//! against different fabrics:
//!
//! - [`NatsTransport`]: NATS core client with aggressive reconnection
//! - [`MemoryTransport`]: in-process fabric with full queue-group semantics,
//!   used by the queue crate's tests
//!
//! ```text
//! ┌────────────┐      ┌───────────────────┐      ┌────────────────┐
//! │   Queue    │─────▶│  Transport trait  │─────▶│ NATS / memory  │
//! │  (engine)  │◀─────│  (this crate)     │◀─────│    backend     │
//! └────────────┘      └───────────────────┘      └────────────────┘
//! ```
//!
//! Connections are shared: [`ConnectionRegistry`] hands out one NATS
//! connection per distinct server/TLS fingerprint, no matter how many queue
//! instances point at the same servers.
//!
//! The transport guarantees nothing beyond fire-and-forget, at-least-once
//! delivery with no ordering across subjects. Correlation, timeouts and flow
//! control live in the queue crate.

mod error;
mod memory;
mod nats;
mod pubsub;
mod registry;

pub use error::TransportError;
pub use memory::{MemorySubscription, MemoryTransport};
pub use nats::{NatsOptions, NatsTransport, TlsOptions, DEFAULT_SERVER};
pub use pubsub::{InboundMessage, Subscription, Transport};
pub use registry::{fingerprint, ConnectionRegistry};
