//! In-process transport backend.
//!
//! Implements the same queue-group semantics as the NATS backend over plain
//! channels. The queue crate's protocol tests run against this fabric, and
//! it doubles as a single-process backend where no broker is available.

use crate::error::TransportError;
use crate::pubsub::{InboundMessage, Subscription, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

struct SubEntry {
    id: u64,
    queue_group: Option<String>,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Default)]
struct Shared {
    next_id: u64,
    subs: HashMap<String, Vec<SubEntry>>,
    // round-robin cursor per (subject, queue group)
    cursors: HashMap<(String, String), usize>,
}

/// In-memory pub/sub fabric.
///
/// Cloning is cheap and clones share the same subscription table.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryTransport {
    /// Create an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active subscriptions on a subject.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        let shared = self.shared.lock().unwrap();
        shared.subs.get(subject).map_or(0, Vec::len)
    }

    /// Number of active subscriptions across all subjects.
    pub fn total_subscribers(&self) -> usize {
        let shared = self.shared.lock().unwrap();
        shared.subs.values().map(Vec::len).sum()
    }

    fn route(&self, subject: &str, reply_to: Option<&str>, payload: &Bytes) {
        let mut shared = self.shared.lock().unwrap();

        // prune subscriptions whose receiver side is gone
        if let Some(entries) = shared.subs.get_mut(subject) {
            entries.retain(|entry| !entry.tx.is_closed());
        }

        let Some(entries) = shared.subs.get(subject) else {
            return;
        };

        let message = |_: &SubEntry| InboundMessage {
            payload: payload.clone(),
            reply_to: reply_to.map(str::to_string),
        };

        // plain subscribers get every message
        let mut deliveries: Vec<u64> = entries
            .iter()
            .filter(|entry| entry.queue_group.is_none())
            .map(|entry| entry.id)
            .collect();

        // exactly one member per queue group, rotating through members
        let mut groups: Vec<String> = Vec::new();
        for entry in entries {
            if let Some(group) = &entry.queue_group {
                if !groups.contains(group) {
                    groups.push(group.clone());
                }
            }
        }
        let mut cursor_updates = Vec::new();
        for group in groups {
            let members: Vec<u64> = entries
                .iter()
                .filter(|entry| entry.queue_group.as_deref() == Some(group.as_str()))
                .map(|entry| entry.id)
                .collect();
            let key = (subject.to_string(), group);
            let cursor = shared.cursors.get(&key).copied().unwrap_or(0);
            deliveries.push(members[cursor % members.len()]);
            cursor_updates.push((key, cursor.wrapping_add(1)));
        }
        for (key, next) in cursor_updates {
            shared.cursors.insert(key, next);
        }

        if let Some(entries) = shared.subs.get(subject) {
            for entry in entries {
                if deliveries.contains(&entry.id) {
                    let _ = entry.tx.send(message(entry));
                }
            }
        }
    }

    fn remove(&self, subject: &str, id: u64) {
        let mut shared = self.shared.lock().unwrap();
        if let Some(entries) = shared.subs.get_mut(subject) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                shared.subs.remove(subject);
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.route(subject, None, &payload);
        Ok(())
    }

    async fn publish_with_reply(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.route(subject, Some(reply_to), &payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut shared = self.shared.lock().unwrap();
            let id = shared.next_id;
            shared.next_id += 1;
            shared.subs.entry(subject.to_string()).or_default().push(SubEntry {
                id,
                queue_group: queue_group.map(str::to_string),
                tx,
            });
            id
        };
        Ok(Box::new(MemorySubscription {
            subject: subject.to_string(),
            id,
            rx,
            transport: self.clone(),
            active: true,
        }))
    }

    fn new_inbox(&self) -> String {
        format!("_INBOX.{}", Uuid::new_v4().simple())
    }
}

/// Subscription on a [`MemoryTransport`].
pub struct MemorySubscription {
    subject: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    transport: MemoryTransport,
    active: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        if self.active {
            self.active = false;
            self.transport.remove(&self.subject, self.id);
            self.rx.close();
        }
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if self.active {
            self.transport.remove(&self.subject, self.id);
        }
    }
}
