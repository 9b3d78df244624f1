//! The transcoding seam.
//!
//! Actual codec invocation lives outside this crate; workers drive it through
//! the [`MediaTranscoder`] trait. [`PassthroughTranscoder`] is the in-process
//! implementation used in development mode and tests: it copies the source
//! bytes through unchanged as a single `result` variant.

use crate::error::{HarborError, Result};
use crate::jobs::job::MediaInfo;
use async_trait::async_trait;

/// One transcoded rendition of a source.
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    /// Variant name, appended to the job id to form the artifact name.
    pub variant: String,
    pub data: Vec<u8>,
}

/// Converts uploaded bytes into stored renditions.
#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    /// Inspect the source and report its media metadata.
    async fn probe(&self, source: &[u8]) -> Result<MediaInfo>;

    /// Produce every output variant for the source. `progress` is called
    /// with fractions in [0, 1] as work advances; implementations may call
    /// it as often or as rarely as their codec allows.
    async fn transcode(
        &self,
        source: &[u8],
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<Vec<TranscodeOutput>>;
}

/// Identity transcoder: one `result` variant containing the source bytes.
#[derive(Debug, Default)]
pub struct PassthroughTranscoder;

#[async_trait]
impl MediaTranscoder for PassthroughTranscoder {
    async fn probe(&self, source: &[u8]) -> Result<MediaInfo> {
        if source.is_empty() {
            return Err(HarborError::Processing("empty source".to_string()));
        }
        Ok(MediaInfo {
            format: "raw".to_string(),
            duration_secs: 0.0,
        })
    }

    async fn transcode(
        &self,
        source: &[u8],
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<Vec<TranscodeOutput>> {
        if source.is_empty() {
            return Err(HarborError::Processing("empty source".to_string()));
        }
        progress(0.5);
        let output = TranscodeOutput {
            variant: "result".to_string(),
            data: source.to_vec(),
        };
        progress(1.0);
        Ok(vec![output])
    }
}
