//! The asynchronous job pipeline: creation, worker pool, live monitoring.

pub mod job;
pub mod manager;
pub mod monitor;
pub mod transcode;

pub use job::{Job, JobPayload, JobStatus, MediaInfo, TranscodeSpec};
pub use manager::JobsManager;
pub use monitor::JobsMonitor;
pub use transcode::{MediaTranscoder, PassthroughTranscoder, TranscodeOutput};

/// KV bucket holding full-state job records.
pub fn jobs_kv_bucket(namespace: &str) -> String {
    format!("{}_jobs-kv", namespace)
}

/// Ephemeral object bucket for staged sources and fresh results.
pub fn temp_files_bucket(namespace: &str) -> String {
    format!("{}_temp-job-files", namespace)
}

/// Shared-group work queue subject for pending jobs.
pub fn work_subject(namespace: &str) -> String {
    format!("{}_jobs", namespace)
}

/// Stream subject carrying every persisted job state.
pub fn updates_subject(namespace: &str) -> String {
    format!("{}_job-updates", namespace)
}
