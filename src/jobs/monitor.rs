//! In-process view of the jobs KV bucket, fanned out to subscribers.
//!
//! The monitor registers a KV change feed before replaying the bucket
//! snapshot, so nothing written between snapshot and feed can be missed. A
//! write observed through both paths is applied twice; every record is full
//! state, so the second apply is a no-op and subscribers are not re-notified.

use crate::error::Result;
use crate::jobs::job::Job;
use crate::substrate::{KvBucket, KvEntry, ObjectStore};
use crate::types::JobId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Live job table plus subscriber fan-out.
///
/// Subscribers are transport-agnostic unbounded senders; the websocket layer
/// owns the receiving half. A subscriber whose channel has closed is silently
/// dropped on the next notification.
pub struct JobsMonitor {
    jobs_kv: Arc<dyn KvBucket>,
    store: Arc<dyn ObjectStore>,
    table: RwLock<HashMap<JobId, Job>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Job>>>,
}

impl JobsMonitor {
    pub fn new(jobs_kv: Arc<dyn KvBucket>, store: Arc<dyn ObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            jobs_kv,
            store,
            table: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Watch the jobs bucket until shutdown. The change feed is registered
    /// first and the snapshot replayed second; deltas are forwarded only
    /// after replay, so late-started monitors converge on the full state.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut feed = self.jobs_kv.watch().await?;

        let snapshot = self.jobs_kv.entries().await?;
        let replayed = snapshot.len();
        for entry in snapshot {
            self.apply_entry(entry);
        }
        info!(jobs = replayed, "Job monitor replayed snapshot");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Job monitor shutting down");
                    return Ok(());
                }
                entry = feed.recv() => match entry {
                    Some(entry) => self.apply_entry(entry),
                    None => {
                        warn!("Jobs KV change feed closed");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Apply one job record to the table, notifying subscribers when it
    /// actually changed something.
    pub fn apply_job(&self, job: Job) {
        let changed = {
            let mut table = self.table.write();
            match table.get(&job.id) {
                Some(existing) if *existing == job => false,
                _ => {
                    table.insert(job.id.clone(), job.clone());
                    true
                }
            }
        };
        if changed {
            self.subscribers
                .lock()
                .retain(|tx| tx.send(job.clone()).is_ok());
        }
    }

    fn apply_entry(&self, entry: KvEntry) {
        match serde_json::from_slice::<Job>(&entry.value) {
            Ok(job) => self.apply_job(job),
            Err(err) => warn!(key = %entry.key, %err, "Skipping malformed job record"),
        }
    }

    pub fn get_job(&self, id: &JobId) -> Option<Job> {
        self.table.read().get(id).cloned()
    }

    /// Every known job, most recently created first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.table.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        jobs
    }

    /// Register a subscriber. The current table is sent as a snapshot before
    /// the sender joins the fan-out list, under the table lock, so the
    /// subscriber sees snapshot-then-deltas with nothing lost in between.
    pub fn register_websocket(&self, tx: mpsc::UnboundedSender<Job>) {
        let table = self.table.read();
        let mut subscribers = self.subscribers.lock();
        for job in table.values() {
            if tx.send(job.clone()).is_err() {
                return;
            }
        }
        subscribers.push(tx);
    }

    /// Raw object fetch for serving staged sources and results.
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.store.get(bucket, key).await
    }
}
