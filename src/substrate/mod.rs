//! The durable pub/sub + KV substrate contract.
//!
//! Harbor's loop families (workers, monitor watcher, long-term mover) never
//! talk to each other in-process; they communicate only through a replicated
//! substrate offering key-value buckets with change feeds, queue-like and
//! durable-pull stream subscriptions, and two blob stores (a TTL-bounded
//! ephemeral one and a durable one). This module defines that contract as
//! trait seams; [`memory::MemorySubstrate`] is the in-process implementation
//! used in development mode and by the multi-node tests.

pub mod memory;

pub use memory::{MemorySubstrate, NodeView};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// One key-value entry, as stored and as delivered on the change feed.
#[derive(Debug, Clone)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// A replicated key-value bucket with a change feed.
#[async_trait]
pub trait KvBucket: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Full-state upsert of one key.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Snapshot of every current entry.
    async fn entries(&self) -> Result<Vec<KvEntry>>;

    /// Subscribe to changes made after this call returns. Registering the
    /// watch before replaying [`entries`](Self::entries) guarantees no update
    /// falls between snapshot and feed.
    async fn watch(&self) -> Result<mpsc::UnboundedReceiver<KvEntry>>;
}

/// Acknowledgment handle carried by delivered messages.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Mark the message processed; it will not be redelivered.
    async fn ack(&self);

    /// Negatively acknowledge: make the message immediately eligible for
    /// redelivery.
    async fn nak(&self);

    /// Signal that processing is still underway, extending the ack deadline.
    /// Workers on long jobs call this to avoid premature redelivery.
    async fn in_progress(&self);
}

/// A message pulled from a queue or stream.
pub struct Message {
    pub payload: Vec<u8>,
    pub acker: Arc<dyn Acker>,
}

impl Message {
    pub async fn ack(&self) {
        self.acker.ack().await;
    }

    pub async fn nak(&self) {
        self.acker.nak().await;
    }

    pub async fn in_progress(&self) {
        self.acker.in_progress().await;
    }
}

/// A shared-subscription work queue: many pullers, single delivery per
/// message, redelivery when the ack deadline lapses.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn publish(&self, payload: Vec<u8>) -> Result<()>;

    /// Pull the next queued message, blocking up to `timeout`. `Ok(None)`
    /// means nothing was available — a normal empty poll, not an error.
    async fn pull(&self, timeout: Duration) -> Result<Option<Message>>;
}

/// An append-only stream supporting named durable pull consumers.
#[async_trait]
pub trait EventStream: Send + Sync {
    async fn publish(&self, payload: Vec<u8>) -> Result<()>;

    /// Open (or resume) a named durable consumer. A consumer registered for
    /// the first time replays the entire backlog; a resumed one continues
    /// from its persisted cursor.
    async fn durable_consumer(&self, name: &str) -> Result<Box<dyn PullConsumer>>;
}

/// A durable consumer position on an [`EventStream`].
#[async_trait]
pub trait PullConsumer: Send {
    /// Deliver the next unacknowledged message, blocking up to `timeout`.
    /// An unacked message is redelivered on the following call.
    async fn next(&mut self, timeout: Duration) -> Result<Option<Message>>;
}

/// A blob store addressable by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()>;

    /// Fetch an object; `HarborError::NotFound` if absent or expired.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

/// Factory for the substrate's named resources. One instance per node
/// process; every handle it returns shares the node's connection to the
/// replicated backend.
pub trait Substrate: Send + Sync {
    fn kv_bucket(&self, name: &str) -> Arc<dyn KvBucket>;

    fn work_queue(&self, subject: &str, ack_wait: Duration) -> Arc<dyn WorkQueue>;

    fn event_stream(&self, subject: &str) -> Arc<dyn EventStream>;

    /// The TTL-bounded staging store for in-flight artifacts.
    fn temp_store(&self) -> Arc<dyn ObjectStore>;

    /// The long-term replicated blob store.
    fn durable_store(&self) -> Arc<dyn ObjectStore>;
}
