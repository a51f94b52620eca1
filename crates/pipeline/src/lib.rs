pub mod config;
pub mod job;
pub mod error;
pub mod sidecar;
pub mod progress;
pub mod message;
pub mod reclaim;
pub mod terminate;
pub mod collab;
pub mod supervisor;
pub mod stats;
pub mod queue;
pub mod pool;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{CancelPolicy, GraceWindows, PipelineConfig};
pub use job::{sanitize_filename, Job, JobKey, OwnerId, ReplyRoute};
pub use error::{JobError, UploadError};
pub use progress::{ProgressTracker, ProgressUpdate};
pub use reclaim::{ReclaimReport, Reclaimer, UsageSnapshot};
pub use terminate::TerminationOutcome;
pub use collab::{LogNotifier, MediaStream, Notifier, ProgressFn, Resolver, UploadReceipt, UploadRequest, UploadSink};
pub use supervisor::{StreamSummary, Supervisor};
pub use stats::StatsSnapshot;
pub use pool::{CancelReport, JobPool};
