//! Long-term mover: copies finished job artifacts to durable storage.
//!
//! Every node runs one mover with its own durable consumer over the
//! job-updates stream, so the stream fans out to all nodes while each node
//! keeps an independent, crash-surviving position. A first-time consumer
//! replays the entire backlog, which is how a node joining late still lands
//! artifacts for every finished job it owns.
//!
//! Delivery is at-least-once: a message is acked only after every artifact
//! copy succeeded, and copies are overwrite-idempotent, so a crash between
//! copy and ack just repeats the copy on redelivery.

use crate::error::Result;
use crate::jobs::job::{Job, JobStatus};
use crate::jobs::{temp_files_bucket, updates_subject};
use crate::placement::RendezvousDecider;
use crate::substrate::{EventStream, Message, ObjectStore, Substrate};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const PULL_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-node consumer that lands owned artifacts in the durable store.
pub struct LongTermMover {
    decider: Arc<RendezvousDecider>,
    updates: Arc<dyn EventStream>,
    temp: Arc<dyn ObjectStore>,
    durable: Arc<dyn ObjectStore>,
    temp_bucket: String,
    consumer_name: String,
}

impl LongTermMover {
    pub fn new(decider: Arc<RendezvousDecider>, substrate: &dyn Substrate) -> Self {
        let namespace = decider.namespace().to_string();
        let consumer_name = format!("longterm-{}", decider.self_node());
        Self {
            updates: substrate.event_stream(&updates_subject(&namespace)),
            temp: substrate.temp_store(),
            durable: substrate.durable_store(),
            temp_bucket: temp_files_bucket(&namespace),
            decider,
            consumer_name,
        }
    }

    /// Consume job updates until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut consumer = self.updates.durable_consumer(&self.consumer_name).await?;
        info!(consumer = %self.consumer_name, "Long-term mover started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!(consumer = %self.consumer_name, "Long-term mover shutting down");
                    return Ok(());
                }
                next = consumer.next(PULL_TIMEOUT) => match next {
                    Ok(Some(msg)) => self.handle(&msg).await,
                    Ok(None) => {}
                    Err(err) => {
                        warn!(consumer = %self.consumer_name, %err, "Consumer pull failed");
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                }
            }
        }
    }

    async fn handle(&self, msg: &Message) {
        let job: Job = match serde_json::from_slice(&msg.payload) {
            Ok(job) => job,
            Err(err) => {
                warn!(%err, "Dropping malformed job update");
                msg.ack().await;
                return;
            }
        };

        // the stream carries every saved state; only finished jobs have
        // artifacts worth moving
        if job.status != JobStatus::Done {
            msg.ack().await;
            return;
        }

        match self.decider.should_store(job.id.as_str()) {
            Ok(true) => {}
            Ok(false) => {
                msg.ack().await;
                return;
            }
            Err(err) => {
                warn!(job = %job.id, %err, "Unplaceable job id in update stream");
                msg.ack().await;
                return;
            }
        }

        match self.copy_artifacts(&job).await {
            Ok(()) => {
                debug!(job = %job.id, artifacts = job.artifacts.len(), "Artifacts moved to durable storage");
                counter!("harbor_artifacts_moved_total").increment(job.artifacts.len() as u64);
                msg.ack().await;
            }
            Err(err) => {
                // nak for redelivery; the copy is idempotent so a partial
                // success just gets overwritten next time
                warn!(job = %job.id, %err, "Artifact move failed, will retry");
                counter!("harbor_artifact_moves_failed_total").increment(1);
                msg.nak().await;
            }
        }
    }

    /// Copy every result artifact from the temp store into this node's
    /// durable bucket for the job's shard.
    async fn copy_artifacts(&self, job: &Job) -> Result<()> {
        let dest_bucket = self.decider.namespaced_key_for(job.id.as_str())?;
        for artifact in &job.artifacts {
            let data = self.temp.get(&self.temp_bucket, artifact).await?;
            self.durable.put(&dest_bucket, artifact, data).await?;
        }
        Ok(())
    }
}
