use std::time::Duration;
use thiserror::Error;

use crate::job::OwnerId;

/// Terminal outcome of a job that did not complete
#[derive(Debug, Error)]
pub enum JobError {
    #[error("no playable stream found for {0}")]
    Resolution(String),

    #[error("resolver failed: {0}")]
    Resolver(#[source] anyhow::Error),

    #[error("transcoder exited with {}: {stderr}", exit_label(.code))]
    Transcode { code: Option<i32>, stderr: String },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("upload rate limited, retry after {}s", .retry_after.as_secs())]
    FloodWait { retry_after: Duration },

    #[error("cancelled by owner")]
    Cancelled,

    #[error("owner {0} already has an active job")]
    OwnerBusy(OwnerId),

    #[error("failed to launch transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("job task panicked: {0}")]
    Panicked(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl JobError {
    /// Cancellations are counted apart from failures
    pub fn is_cancellation(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }
}

/// Errors an upload sink can report
#[derive(Debug, Error)]
pub enum UploadError {
    /// The sink asked the caller to back off; surfaced as a job failure
    #[error("flood wait of {}s", .retry_after.as_secs())]
    FloodWait { retry_after: Duration },

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<UploadError> for JobError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::FloodWait { retry_after } => JobError::FloodWait { retry_after },
            other => JobError::Upload(other.to_string()),
        }
    }
}
