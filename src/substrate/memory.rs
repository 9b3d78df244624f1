//! In-process substrate implementation.
//!
//! Faithful to the contract the real replicated backend provides: ack-wait
//! redelivery on the work queue, durable per-consumer cursors on streams,
//! TTL expiry on the ephemeral store, and a change feed that misses nothing
//! registered before a snapshot. Multiple simulated nodes share one
//! `Arc<MemorySubstrate>` in tests, standing in for the replicated cluster.

use super::{Acker, EventStream, KvBucket, KvEntry, Message, ObjectStore, PullConsumer, Substrate, WorkQueue};
use crate::error::{HarborError, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

/// How long a puller naps between queue re-checks while blocked. Short
/// enough that expired ack deadlines are noticed promptly.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// In-memory implementation of every substrate resource.
pub struct MemorySubstrate {
    temp_ttl: Option<Duration>,
    kv: RwLock<HashMap<String, Arc<MemoryKvBucket>>>,
    queues: RwLock<HashMap<String, Arc<MemoryWorkQueue>>>,
    streams: RwLock<HashMap<String, Arc<MemoryStream>>>,
    temp: Arc<MemoryObjectStore>,
    durable: Arc<MemoryObjectStore>,
}

impl MemorySubstrate {
    pub fn new() -> Arc<Self> {
        Self::with_temp_ttl(None)
    }

    /// Build a substrate whose ephemeral store expires objects after `ttl`.
    pub fn with_temp_ttl(ttl: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            temp_ttl: ttl,
            kv: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            temp: Arc::new(MemoryObjectStore::new(ttl)),
            durable: Arc::new(MemoryObjectStore::new(None)),
        })
    }
}

/// A per-node view of a shared substrate.
///
/// KV buckets, queues, streams and the temp store are replicated and shared
/// by every node; the durable store is node-local, like a node's own disk.
/// Multi-node tests give each simulated node its own view over one shared
/// [`MemorySubstrate`].
pub struct NodeView {
    shared: Arc<MemorySubstrate>,
    durable: Arc<MemoryObjectStore>,
}

impl MemorySubstrate {
    pub fn node_view(self: &Arc<Self>) -> Arc<NodeView> {
        Arc::new(NodeView {
            shared: self.clone(),
            durable: Arc::new(MemoryObjectStore::new(None)),
        })
    }
}

impl Substrate for NodeView {
    fn kv_bucket(&self, name: &str) -> Arc<dyn KvBucket> {
        self.shared.kv_bucket(name)
    }

    fn work_queue(&self, subject: &str, ack_wait: Duration) -> Arc<dyn WorkQueue> {
        self.shared.work_queue(subject, ack_wait)
    }

    fn event_stream(&self, subject: &str) -> Arc<dyn EventStream> {
        self.shared.event_stream(subject)
    }

    fn temp_store(&self) -> Arc<dyn ObjectStore> {
        self.shared.temp_store()
    }

    fn durable_store(&self) -> Arc<dyn ObjectStore> {
        self.durable.clone()
    }
}

impl Substrate for MemorySubstrate {
    fn kv_bucket(&self, name: &str) -> Arc<dyn KvBucket> {
        let mut buckets = self.kv.write();
        buckets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryKvBucket::default()))
            .clone()
    }

    fn work_queue(&self, subject: &str, ack_wait: Duration) -> Arc<dyn WorkQueue> {
        let mut queues = self.queues.write();
        queues
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(MemoryWorkQueue::new(ack_wait)))
            .clone()
    }

    fn event_stream(&self, subject: &str) -> Arc<dyn EventStream> {
        let mut streams = self.streams.write();
        streams
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(MemoryStream::default()))
            .clone()
    }

    fn temp_store(&self) -> Arc<dyn ObjectStore> {
        self.temp.clone()
    }

    fn durable_store(&self) -> Arc<dyn ObjectStore> {
        self.durable.clone()
    }
}

// ---------------------------------------------------------------------------
// KV bucket

#[derive(Default)]
struct MemoryKvBucket {
    entries: RwLock<BTreeMap<String, Arc<Vec<u8>>>>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<KvEntry>>>,
}

#[async_trait]
impl KvBucket for MemoryKvBucket {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).map(|v| (**v).clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let value = Arc::new(value);
        self.entries.write().insert(key.to_string(), value.clone());

        let entry = KvEntry {
            key: key.to_string(),
            value: (*value).clone(),
        };
        // a closed receiver just drops out of the watcher list
        self.watchers.lock().retain(|tx| tx.send(entry.clone()).is_ok());
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<KvEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(k, v)| KvEntry {
                key: k.clone(),
                value: (**v).clone(),
            })
            .collect())
    }

    async fn watch(&self) -> Result<mpsc::UnboundedReceiver<KvEntry>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().push(tx);
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Work queue

struct Inflight {
    payload: Arc<Vec<u8>>,
    deadline: Instant,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    pending: VecDeque<(u64, Arc<Vec<u8>>)>,
    inflight: HashMap<u64, Inflight>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    ack_wait: Duration,
}

struct MemoryWorkQueue {
    inner: Arc<QueueInner>,
}

impl MemoryWorkQueue {
    fn new(ack_wait: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                ack_wait,
            }),
        }
    }
}

impl QueueInner {
    /// Move messages whose ack deadline lapsed back to the head of the queue.
    fn requeue_expired(&self, state: &mut QueueState) {
        let now = Instant::now();
        let expired: Vec<u64> = state
            .inflight
            .iter()
            .filter(|(_, inf)| inf.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(inf) = state.inflight.remove(&id) {
                state.pending.push_front((id, inf.payload));
            }
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.pending.push_back((id, Arc::new(payload)));
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn pull(&self, timeout: Duration) -> Result<Option<Message>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.inner.state.lock();
                self.inner.requeue_expired(&mut state);
                if let Some((id, payload)) = state.pending.pop_front() {
                    state.inflight.insert(
                        id,
                        Inflight {
                            payload: payload.clone(),
                            deadline: Instant::now() + self.inner.ack_wait,
                        },
                    );
                    return Ok(Some(Message {
                        payload: (*payload).clone(),
                        acker: Arc::new(QueueAcker {
                            inner: self.inner.clone(),
                            id,
                        }),
                    }));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let nap = POLL_INTERVAL.min(deadline - now);
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}

struct QueueAcker {
    inner: Arc<QueueInner>,
    id: u64,
}

#[async_trait]
impl Acker for QueueAcker {
    async fn ack(&self) {
        self.inner.state.lock().inflight.remove(&self.id);
    }

    async fn nak(&self) {
        let requeued = {
            let mut state = self.inner.state.lock();
            if let Some(inf) = state.inflight.remove(&self.id) {
                state.pending.push_front((self.id, inf.payload));
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_waiters();
        }
    }

    async fn in_progress(&self) {
        let mut state = self.inner.state.lock();
        let ack_wait = self.inner.ack_wait;
        if let Some(inf) = state.inflight.get_mut(&self.id) {
            inf.deadline = Instant::now() + ack_wait;
        }
    }
}

// ---------------------------------------------------------------------------
// Event stream

#[derive(Default)]
struct StreamInner {
    log: RwLock<Vec<Arc<Vec<u8>>>>,
    /// Durable cursor per consumer name: the next sequence to deliver.
    cursors: Mutex<HashMap<String, u64>>,
    notify: Notify,
}

#[derive(Default)]
struct MemoryStream {
    inner: Arc<StreamInner>,
}

#[async_trait]
impl EventStream for MemoryStream {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        self.inner.log.write().push(Arc::new(payload));
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn durable_consumer(&self, name: &str) -> Result<Box<dyn PullConsumer>> {
        // first registration starts at the beginning of the backlog
        self.inner.cursors.lock().entry(name.to_string()).or_insert(0);
        Ok(Box::new(MemoryPullConsumer {
            inner: self.inner.clone(),
            name: name.to_string(),
        }))
    }
}

struct MemoryPullConsumer {
    inner: Arc<StreamInner>,
    name: String,
}

#[async_trait]
impl PullConsumer for MemoryPullConsumer {
    async fn next(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let deadline = Instant::now() + timeout;
        loop {
            let seq = *self
                .inner
                .cursors
                .lock()
                .get(&self.name)
                .ok_or_else(|| HarborError::StreamClosed(self.name.clone()))?;

            let payload = self.inner.log.read().get(seq as usize).cloned();
            if let Some(payload) = payload {
                return Ok(Some(Message {
                    payload: (*payload).clone(),
                    acker: Arc::new(StreamAcker {
                        inner: self.inner.clone(),
                        name: self.name.clone(),
                        seq,
                    }),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let nap = POLL_INTERVAL.min(deadline - now);
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}

struct StreamAcker {
    inner: Arc<StreamInner>,
    name: String,
    seq: u64,
}

#[async_trait]
impl Acker for StreamAcker {
    async fn ack(&self) {
        let mut cursors = self.inner.cursors.lock();
        if let Some(cursor) = cursors.get_mut(&self.name) {
            if *cursor == self.seq {
                *cursor = self.seq + 1;
            }
        }
    }

    async fn nak(&self) {
        // the cursor never advanced; the next pull redelivers this sequence
        self.inner.notify.notify_waiters();
    }

    async fn in_progress(&self) {}
}

// ---------------------------------------------------------------------------
// Object store

struct ObjectEntry {
    data: Arc<Vec<u8>>,
    expires: Option<Instant>,
}

impl ObjectEntry {
    fn expired(&self) -> bool {
        self.expires.is_some_and(|at| at <= Instant::now())
    }
}

struct MemoryObjectStore {
    ttl: Option<Duration>,
    objects: RwLock<HashMap<String, BTreeMap<String, ObjectEntry>>>,
}

impl MemoryObjectStore {
    fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            objects: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        let entry = ObjectEntry {
            data: Arc::new(data),
            expires: self.ttl.map(|ttl| Instant::now() + ttl),
        };
        self.objects
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read();
        match objects.get(bucket).and_then(|b| b.get(key)) {
            Some(entry) if !entry.expired() => Ok((*entry.data).clone()),
            _ => Err(HarborError::NotFound(format!("{}/{}", bucket, key))),
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let objects = self.objects.read();
        Ok(objects
            .get(bucket)
            .and_then(|b| b.get(key))
            .is_some_and(|entry| !entry.expired()))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.read();
        Ok(objects
            .get(bucket)
            .map(|b| {
                b.iter()
                    .filter(|(k, entry)| k.starts_with(prefix) && !entry.expired())
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
