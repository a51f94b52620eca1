//! Collaborators for running the pipeline on a single machine: sources are
//! already playable, uploads land in a local directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use pipeline::{Job, MediaStream, ProgressFn, Reclaimer, Resolver, UploadError, UploadReceipt, UploadRequest, UploadSink};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const COPY_CHUNK: usize = 64 * 1024;

/// Treats http(s) URLs and existing paths as directly playable
#[derive(Debug, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl Resolver for PassthroughResolver {
    async fn resolve(&self, job: &Job) -> Result<Option<String>> {
        let source = job.source.trim();
        if source.starts_with("http://") || source.starts_with("https://") {
            return Ok(Some(source.to_string()));
        }
        if fs::try_exists(source).await.unwrap_or(false) {
            return Ok(Some(source.to_string()));
        }
        debug!("Job {}: source is neither a URL nor an existing file: {}", job.id, source);
        Ok(None)
    }
}

/// Writes uploads into `output_dir`, staging them as `.part` files in the scratch root
pub struct DirectorySink {
    output_dir: PathBuf,
    reclaimer: Arc<Reclaimer>,
}

impl DirectorySink {
    pub fn new(output_dir: impl Into<PathBuf>, reclaimer: Arc<Reclaimer>) -> Self {
        Self {
            output_dir: output_dir.into(),
            reclaimer,
        }
    }

    fn part_path(&self, file_name: &str) -> PathBuf {
        self.reclaimer.scratch_root().join(format!("{}.part", file_name))
    }

    async fn stage(&self, stream: &mut MediaStream, part: &Path, on_progress: &ProgressFn) -> Result<u64, UploadError> {
        if let Some(parent) = part.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(part).await?;
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut written = 0u64;

        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            written += n as u64;
            on_progress(written, 0);
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    async fn publish(&self, part: &Path, dest: &Path) -> Result<(), UploadError> {
        fs::create_dir_all(&self.output_dir).await?;
        if fs::rename(part, dest).await.is_ok() {
            return Ok(());
        }
        // Scratch and output may be on different filesystems
        fs::copy(part, dest).await?;
        fs::remove_file(part).await?;
        Ok(())
    }
}

#[async_trait]
impl UploadSink for DirectorySink {
    async fn upload(
        &self,
        mut stream: MediaStream,
        request: UploadRequest,
        on_progress: ProgressFn,
    ) -> Result<UploadReceipt, UploadError> {
        let part = self.part_path(&request.file_name);
        let dest = self.output_dir.join(&request.file_name);

        let result = match self.stage(&mut stream, &part, &on_progress).await {
            Ok(0) => Err(UploadError::Rejected("transcoder produced no output".into())),
            Ok(bytes) => self.publish(&part, &dest).await.map(|_| bytes),
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                info!("Stored {} ({} bytes)", dest.display(), bytes);
                Ok(UploadReceipt {
                    bytes,
                    location: dest.display().to_string(),
                })
            }
            Err(e) => {
                warn!("Upload of {} failed, scheduling partial for deletion: {}", request.file_name, e);
                self.reclaimer.schedule_delete([part]);
                Err(e)
            }
        }
    }
}
