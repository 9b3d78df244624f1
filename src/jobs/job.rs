//! Job records and the job state machine.
//!
//! A job is created when content is uploaded and keyed by the upload's
//! content id. Its full state is overwritten in the jobs KV bucket on every
//! transition; there are no partial updates, so the latest KV value is always
//! the complete truth about a job.

use crate::types::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// `Pending -> InProgress -> {Done, Error}`. Both terminal states are final;
/// nothing transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// What kind of work a job carries. A closed set, matched explicitly; an
/// unrecognized tag fails deserialization and is dropped as poison at the
/// queue edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Transcode(TranscodeSpec),
}

/// Parameters for a transcode job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeSpec {
    /// Original filename as uploaded, kept for diagnostics only.
    pub filename: String,
}

/// Media metadata probed from the source before transcoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub format: String,
    pub duration_secs: f64,
}

/// One job record, persisted whole on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub status: JobStatus,

    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Key of the staged source in the temp store.
    pub source_key: String,

    /// Result artifact names in the temp store, filled on `Done`.
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Which worker claimed the job.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub worker: Option<String>,

    /// Terminal error message, set only with status `Error`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,

    /// Fractional transcode progress in [0, 1], updated while in progress.
    #[serde(default)]
    pub progress: f64,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_info: Option<MediaInfo>,
}

impl Job {
    /// A fresh pending job for content staged at `source_key`.
    pub fn new(id: JobId, payload: JobPayload, source_key: impl Into<String>) -> Self {
        Self {
            id,
            payload,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            source_key: source_key.into(),
            artifacts: Vec::new(),
            worker: None,
            error: None,
            progress: 0.0,
            media_info: None,
        }
    }

    /// Claim the job for a worker: `Pending -> InProgress`.
    pub fn claim(&mut self, worker: impl Into<String>) {
        self.status = JobStatus::InProgress;
        self.worker = Some(worker.into());
        self.started_at = Some(Utc::now());
    }

    /// Terminal success with the produced artifact names.
    pub fn complete(&mut self, artifacts: Vec<String>) {
        self.status = JobStatus::Done;
        self.artifacts = artifacts;
        self.progress = 1.0;
        self.error = None;
        self.finished_at = Some(Utc::now());
    }

    /// Terminal failure. The error message is part of the record.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Error;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentId;

    fn sample_job() -> Job {
        let id = ContentId::generate();
        let source_key = id.as_str().to_string();
        Job::new(
            id,
            JobPayload::Transcode(TranscodeSpec {
                filename: "song.wav".to_string(),
            }),
            source_key,
        )
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
        assert!(job.worker.is_none());
    }

    #[test]
    fn test_claim_then_complete() {
        let mut job = sample_job();
        job.claim("worker-0");
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.started_at.is_some());

        job.complete(vec![format!("{}_result", job.id)]);
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.status.is_terminal());
        assert_eq!(job.progress, 1.0);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_fail_records_message_and_finish_time() {
        let mut job = sample_job();
        job.claim("worker-0");
        job.fail("unsupported codec");
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("unsupported codec"));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_job_roundtrips_through_json() {
        let mut job = sample_job();
        job.claim("worker-1");
        job.media_info = Some(MediaInfo {
            format: "wav".to_string(),
            duration_secs: 12.5,
        });

        let bytes = serde_json::to_vec(&job).unwrap();
        let back: Job = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.status, JobStatus::InProgress);
        assert_eq!(back.media_info, job.media_info);
    }
}
