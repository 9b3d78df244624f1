//! Job creation and the worker pool.
//!
//! [`JobsManager`] owns every write to the job pipeline: staging the source,
//! persisting job state, and running the shared-group worker loops. All job
//! mutations go through [`JobsManager::save_job`], which overwrites the full
//! record in the jobs KV bucket, publishes the same bytes on the job-updates
//! stream, and refreshes the in-process monitor table in that order.

use crate::error::{HarborError, Result};
use crate::jobs::job::{Job, JobPayload, JobStatus, TranscodeSpec};
use crate::jobs::monitor::JobsMonitor;
use crate::jobs::transcode::MediaTranscoder;
use crate::jobs::{jobs_kv_bucket, temp_files_bucket, updates_subject, work_subject};
use crate::substrate::{EventStream, KvBucket, Message, ObjectStore, Substrate, WorkQueue};
use crate::types::{ContentId, JobId};
use futures::FutureExt;
use metrics::counter;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long one worker pull blocks before re-checking for shutdown.
const PULL_TIMEOUT: Duration = Duration::from_secs(1);

/// Creates jobs and runs the worker pull loops for one node.
pub struct JobsManager {
    namespace: String,
    worker_prefix: String,
    jobs_kv: Arc<dyn KvBucket>,
    queue: Arc<dyn WorkQueue>,
    updates: Arc<dyn EventStream>,
    temp: Arc<dyn ObjectStore>,
    temp_bucket: String,
    monitor: Arc<JobsMonitor>,
    transcoder: Arc<dyn MediaTranscoder>,
}

impl JobsManager {
    /// Wire a manager onto the substrate's named resources for `namespace`.
    /// `worker_prefix` (normally the node id) namespaces worker names in
    /// claimed jobs and logs.
    pub fn new(
        namespace: impl Into<String>,
        worker_prefix: impl Into<String>,
        substrate: &dyn Substrate,
        transcoder: Arc<dyn MediaTranscoder>,
        ack_wait: Duration,
    ) -> Arc<Self> {
        let namespace = namespace.into();
        let jobs_kv = substrate.kv_bucket(&jobs_kv_bucket(&namespace));
        let temp = substrate.temp_store();
        let monitor = JobsMonitor::new(jobs_kv.clone(), temp.clone());

        Arc::new(Self {
            worker_prefix: worker_prefix.into(),
            queue: substrate.work_queue(&work_subject(&namespace), ack_wait),
            updates: substrate.event_stream(&updates_subject(&namespace)),
            temp_bucket: temp_files_bucket(&namespace),
            jobs_kv,
            temp,
            monitor,
            transcoder,
            namespace,
        })
    }

    /// Persist a job: full-state KV overwrite, then the update stream, then
    /// the monitor table. On error the caller may not assume the job
    /// advanced.
    pub async fn save_job(&self, job: &Job) -> Result<()> {
        let bytes = serde_json::to_vec(job)?;
        self.jobs_kv
            .put(job.id.as_str(), bytes.clone())
            .await
            .map_err(|err| HarborError::Persistence(format!("jobs kv put: {}", err)))?;
        self.updates
            .publish(bytes)
            .await
            .map_err(|err| HarborError::Persistence(format!("job-updates publish: {}", err)))?;
        self.monitor.apply_job(job.clone());
        Ok(())
    }

    /// Stage uploaded bytes in the temp store and enqueue a pending
    /// transcode job keyed by a fresh content id.
    pub async fn create_transcode_job(
        &self,
        filename: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<Job> {
        let id = ContentId::generate();
        self.temp
            .put(&self.temp_bucket, id.as_str(), data)
            .await
            .map_err(|err| HarborError::Persistence(format!("staging source: {}", err)))?;

        let source_key = id.as_str().to_string();
        let job = Job::new(
            id,
            JobPayload::Transcode(TranscodeSpec {
                filename: filename.into(),
            }),
            source_key,
        );
        self.save_job(&job).await?;
        self.queue
            .publish(serde_json::to_vec(&job)?)
            .await
            .map_err(|err| HarborError::Persistence(format!("work queue publish: {}", err)))?;

        crate::observability::record_job_created();
        info!(job = %job.id, "Created transcode job");
        Ok(job)
    }

    /// Spawn `count` independent worker loops sharing the work queue. Each
    /// loop runs until the shutdown channel flips.
    pub fn start_workers(
        self: &Arc<Self>,
        count: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|i| {
                let manager = self.clone();
                let mut shutdown = shutdown.clone();
                let worker = format!("{}-worker-{}", manager.worker_prefix, i);
                tokio::spawn(async move {
                    info!(%worker, "Worker started");
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                debug!(%worker, "Worker shutting down");
                                return;
                            }
                            pulled = manager.queue.pull(PULL_TIMEOUT) => match pulled {
                                Ok(Some(msg)) => manager.handle_message(&worker, &msg).await,
                                Ok(None) => {}
                                Err(err) => warn!(%worker, %err, "Queue pull failed"),
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Process one pulled queue message end to end.
    async fn handle_message(&self, worker: &str, msg: &Message) {
        let envelope: Job = match serde_json::from_slice(&msg.payload) {
            Ok(job) => job,
            Err(err) => {
                // poison containment: a message that cannot be decoded will
                // never decode on redelivery either
                warn!(%worker, %err, "Dropping malformed queue message");
                counter!("harbor_jobs_poison_total").increment(1);
                msg.ack().await;
                return;
            }
        };
        let id = envelope.id.clone();

        // redelivery defense: act on the current persisted state, not on
        // the queued copy
        let current = match self.load_job(&id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job = %id, "Queued job has no KV record");
                msg.ack().await;
                return;
            }
            Err(err) => {
                warn!(job = %id, %err, "Failed to load job state");
                msg.nak().await;
                return;
            }
        };
        if current.status != JobStatus::Pending {
            debug!(job = %id, status = %current.status, "Skipping non-pending job");
            msg.ack().await;
            return;
        }

        let mut job = current;
        job.claim(worker);
        if let Err(err) = self.save_job(&job).await {
            warn!(job = %id, %err, "Failed to claim job");
            msg.nak().await;
            return;
        }
        msg.in_progress().await;

        match AssertUnwindSafe(self.process(&mut job, msg)).catch_unwind().await {
            Ok(Ok(artifacts)) => {
                info!(job = %id, %worker, artifacts = artifacts.len(), "Job done");
                job.complete(artifacts);
                counter!("harbor_jobs_processed_total").increment(1);
            }
            Ok(Err(err)) => {
                warn!(job = %id, %worker, %err, "Job processing failed");
                job.fail(err.to_string());
                counter!("harbor_jobs_failed_total").increment(1);
            }
            Err(_) => {
                error!(job = %id, %worker, "Job processing panicked");
                job.fail("processing panicked");
                counter!("harbor_jobs_failed_total").increment(1);
            }
        }

        if let Err(err) = self.save_job(&job).await {
            warn!(job = %id, %err, "Failed to persist terminal job state");
            msg.nak().await;
            return;
        }
        msg.ack().await;
    }

    /// Run the transcode for a claimed job. Returns the temp-store artifact
    /// names on success.
    async fn process(&self, job: &mut Job, msg: &Message) -> Result<Vec<String>> {
        let JobPayload::Transcode(_) = &job.payload;

        let source = self
            .temp
            .get(&self.temp_bucket, &job.source_key)
            .await
            .map_err(|err| HarborError::Processing(format!("fetching source: {}", err)))?;

        job.media_info = Some(self.transcoder.probe(&source).await?);
        self.save_job(job).await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<f64>();
        let report = move |p: f64| {
            let _ = tx.send(p);
        };
        let transcode = self.transcoder.transcode(&source, &report);
        tokio::pin!(transcode);

        // persist progress mid-flight and keep the ack deadline alive; a
        // dropped progress write is harmless, the next one overwrites it
        let outputs = loop {
            tokio::select! {
                result = &mut transcode => break result?,
                Some(progress) = rx.recv() => {
                    job.progress = progress;
                    let _ = self.save_job(job).await;
                    msg.in_progress().await;
                }
            }
        };

        let mut artifacts = Vec::with_capacity(outputs.len());
        for output in outputs {
            let name = format!("{}_{}", job.id, output.variant);
            self.temp
                .put(&self.temp_bucket, &name, output.data)
                .await
                .map_err(|err| HarborError::Processing(format!("storing artifact: {}", err)))?;
            artifacts.push(name);
        }
        Ok(artifacts)
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>> {
        match self.jobs_kv.get(id.as_str()).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn monitor(&self) -> &Arc<JobsMonitor> {
        &self.monitor
    }

    pub fn temp_store(&self) -> &Arc<dyn ObjectStore> {
        &self.temp
    }

    pub fn temp_bucket(&self) -> &str {
        &self.temp_bucket
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}
