//! Contracts of the services the pipeline relies on but does not implement:
//! stream resolution, the upload destination and the owner-facing message channel.

use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use tokio::io::AsyncRead;

use crate::error::UploadError;
use crate::job::Job;

/// Transcoder output handed to the upload sink
pub type MediaStream = Box<dyn AsyncRead + Send + Unpin>;

/// Called by the sink with (bytes transferred, total bytes or 0 when unknown)
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Turns a job's source locator into something the transcoder can read
#[async_trait]
pub trait Resolver: Send + Sync {
    /// `Ok(None)` means nothing playable was found; the job fails without retry
    async fn resolve(&self, job: &Job) -> Result<Option<String>>;

    /// Release pooled connections; called once on pool shutdown
    async fn close(&self) {}
}

/// Metadata accompanying an upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub bytes: u64,
    /// Where the sink stored the file, in its own terms
    pub location: String,
}

/// Destination of the transcoded stream
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Consume `stream` to its end. A `FloodWait` error must be returned as-is,
    /// retrying is left to whoever wraps the pipeline.
    async fn upload(
        &self,
        stream: MediaStream,
        request: UploadRequest,
        on_progress: ProgressFn,
    ) -> Result<UploadReceipt, UploadError>;
}

/// Address notifications are delivered to
pub type ChannelId = i64;
/// Handle of a previously sent message that can be edited
pub type MessageHandle = i64;

/// Owner-facing message channel. Failures are the caller's to log, never fatal to a job.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: ChannelId, text: &str) -> Result<()>;

    async fn edit(&self, channel: ChannelId, message: MessageHandle, text: &str) -> Result<()>;
}

/// Writes notifications to the log; used when no chat channel is wired in
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, channel: ChannelId, text: &str) -> Result<()> {
        info!("[notify {}] {}", channel, text.replace('\n', " | "));
        Ok(())
    }

    async fn edit(&self, channel: ChannelId, message: MessageHandle, text: &str) -> Result<()> {
        info!("[notify {}#{}] {}", channel, message, text.replace('\n', " | "));
        Ok(())
    }
}
