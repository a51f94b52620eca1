//! In-memory collaborators shared by the unit tests.

use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;

use crate::collab::{ChannelId, MediaStream, MessageHandle, Notifier, ProgressFn, UploadReceipt, UploadRequest, UploadSink};
use crate::error::UploadError;

/// Reads the whole stream into memory, reporting progress per chunk
#[derive(Debug, Default)]
pub struct MemorySink {
    pub flood: bool,
    /// Total size reported alongside progress, 0 for unknown
    pub total: u64,
}

#[async_trait]
impl UploadSink for MemorySink {
    async fn upload(
        &self,
        mut stream: MediaStream,
        request: UploadRequest,
        on_progress: ProgressFn,
    ) -> Result<UploadReceipt, UploadError> {
        if self.flood {
            return Err(UploadError::FloodWait {
                retry_after: Duration::from_secs(30),
            });
        }
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            on_progress(data.len() as u64, self.total);
        }
        Ok(UploadReceipt {
            bytes: data.len() as u64,
            location: request.file_name,
        })
    }
}

/// Keeps every sent message and every edit
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(ChannelId, String)>>,
    pub edits: Mutex<Vec<(ChannelId, MessageHandle, String)>>,
}

impl RecordingNotifier {
    pub fn sent_to(&self, channel: ChannelId) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, channel: ChannelId, text: &str) -> Result<()> {
        self.sent.lock().push((channel, text.to_string()));
        Ok(())
    }

    async fn edit(&self, channel: ChannelId, message: MessageHandle, text: &str) -> Result<()> {
        self.edits.lock().push((channel, message, text.to_string()));
        Ok(())
    }
}
