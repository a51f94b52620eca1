use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Local;
use log::{debug, error, info, warn};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;

use crate::collab::{Notifier, ProgressFn, UploadRequest, UploadSink};
use crate::config::{GraceWindows, PipelineConfig, INPUT_PLACEHOLDER};
use crate::error::JobError;
use crate::job::{Job, OwnerId};
use crate::message;
use crate::progress::ProgressTracker;
use crate::terminate::{terminate_gracefully, ChildProcess, TerminationOutcome};

/// Live transcoder bound to one owner
#[derive(Debug)]
pub struct ProcessHandle {
    pub owner: OwnerId,
    pub job_id: uuid::Uuid,
    pub started: Instant,
    cancelled: AtomicBool,
    process: AsyncMutex<ChildProcess>,
}

impl ProcessHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run the escalation; concurrent callers serialize and later ones find the process gone
    pub async fn terminate(&self, windows: &GraceWindows) -> TerminationOutcome {
        let mut process = self.process.lock().await;
        let outcome = terminate_gracefully(&mut *process, windows).await;
        if outcome.was_forced() {
            warn!("Transcoder for owner {} had to be killed", self.owner);
            process.reap().await;
        }
        outcome
    }
}

/// Active transcoders keyed by owner. At most one entry per owner.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    active: parking_lot::Mutex<HashMap<OwnerId, Arc<ProcessHandle>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the owner already has a handle
    fn try_register(&self, handle: &Arc<ProcessHandle>) -> bool {
        let mut active = self.active.lock();
        if active.contains_key(&handle.owner) {
            return false;
        }
        active.insert(handle.owner, Arc::clone(handle));
        true
    }

    /// Remove the entry only if it is still this handle
    fn release(&self, handle: &Arc<ProcessHandle>) -> bool {
        let mut active = self.active.lock();
        match active.get(&handle.owner) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                active.remove(&handle.owner);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, owner: OwnerId) -> Option<Arc<ProcessHandle>> {
        self.active.lock().get(&owner).cloned()
    }

    pub fn contains(&self, owner: OwnerId) -> bool {
        self.active.lock().contains_key(&owner)
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }

    fn handles(&self) -> Vec<Arc<ProcessHandle>> {
        self.active.lock().values().cloned().collect()
    }
}

/// Result of a job that streamed and uploaded successfully
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub bytes: u64,
    pub location: String,
    pub elapsed: Duration,
    pub termination: TerminationOutcome,
}

/// Runs one transcoder per job and streams its stdout into the upload sink
pub struct Supervisor {
    program: PathBuf,
    args: Vec<String>,
    grace: GraceWindows,
    stderr_tail_bytes: usize,
    registry: Arc<ProcessRegistry>,
    tracker: Arc<ProgressTracker>,
    sink: Arc<dyn UploadSink>,
    notifier: Arc<dyn Notifier>,
    /// Set by `shutdown`; no transcoder is launched afterwards
    closing: AtomicBool,
}

impl Supervisor {
    pub fn new(cfg: &PipelineConfig, sink: Arc<dyn UploadSink>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            program: cfg.transcode_bin.clone(),
            args: cfg.transcode_args.clone(),
            grace: cfg.grace,
            stderr_tail_bytes: cfg.stderr_tail_bytes,
            registry: Arc::new(ProcessRegistry::new()),
            tracker: Arc::new(ProgressTracker::new(cfg.progress_interval())),
            sink,
            notifier,
            closing: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Transcoder argument list for a playable locator
    pub fn command_args(&self, input: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, input))
            .collect()
    }

    /// Launch the transcoder, upload its output, and always leave it reaped.
    ///
    /// Succeeds only when the upload finished and the process exited with 0.
    pub async fn stream(&self, job: &Job, input: &str) -> Result<StreamSummary, JobError> {
        let started = Instant::now();
        let args = self.command_args(input);
        debug!("Job {}: transcoder command: {} {}", job.id, self.program.display(), args.join(" "));

        if self.is_closing() {
            info!("Job {}: not launched, shutting down", job.id);
            return Err(JobError::Cancelled);
        }

        // Checked before spawning so a busy owner never gets a second process
        if self.registry.contains(job.owner) {
            return Err(JobError::OwnerBusy(job.owner));
        }

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(JobError::Spawn)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let handle = Arc::new(ProcessHandle {
            owner: job.owner,
            job_id: job.id,
            started,
            cancelled: AtomicBool::new(false),
            process: AsyncMutex::new(ChildProcess::new(child)),
        });

        if !self.registry.try_register(&handle) {
            // Lost a race with another worker for the same owner
            handle.terminate(&self.grace).await;
            return Err(JobError::OwnerBusy(job.owner));
        }
        info!("Job {}: transcoder launched for owner {}", job.id, job.owner);

        // `shutdown` may have taken its snapshot between the first check and the registration
        if self.is_closing() {
            handle.cancelled.store(true, Ordering::SeqCst);
            handle.terminate(&self.grace).await;
        }

        let tail_limit = self.stderr_tail_bytes;
        let stderr_task = tokio::spawn(async move {
            let mut tail = Vec::new();
            if let Some(mut stderr) = stderr {
                let mut buf = [0u8; 4096];
                loop {
                    match stderr.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            tail.extend_from_slice(&buf[..n]);
                            if tail.len() > tail_limit {
                                let excess = tail.len() - tail_limit;
                                tail.drain(..excess);
                            }
                        }
                    }
                }
            }
            String::from_utf8_lossy(&tail).trim().to_string()
        });

        let upload = match stdout {
            Some(stdout) => {
                let request = UploadRequest {
                    file_name: job.upload_file_name(),
                    caption: format!(
                        "🎬 {}\n📺 Episode {} [{}]\n🕐 {}",
                        job.title,
                        job.sequence,
                        job.quality,
                        Local::now().format("%Y-%m-%d %H:%M")
                    ),
                };
                self.sink
                    .upload(Box::new(stdout), request, self.progress_callback(job))
                    .await
            }
            None => Err(crate::error::UploadError::Rejected("transcoder stdout unavailable".into())),
        };

        let termination = handle.terminate(&self.grace).await;
        let exit_code = {
            let mut process = handle.process.lock().await;
            process.reap().await.and_then(|status| status.code())
        };
        self.registry.release(&handle);
        let stderr_tail = stderr_task.await.unwrap_or_default();
        debug!("Job {}: transcoder reaped ({:?}, exit code {:?})", job.id, termination, exit_code);

        if handle.is_cancelled() {
            info!("Job {}: cancelled by owner {}", job.id, job.owner);
            return Err(JobError::Cancelled);
        }

        let receipt = upload.map_err(|e| {
            error!("Job {}: upload failed: {}", job.id, e);
            JobError::from(e)
        })?;

        if exit_code != Some(0) {
            error!("Job {}: transcoder failed with {:?}: {}", job.id, exit_code, stderr_tail);
            return Err(JobError::Transcode {
                code: exit_code,
                stderr: stderr_tail,
            });
        }

        Ok(StreamSummary {
            bytes: receipt.bytes,
            location: receipt.location,
            elapsed: started.elapsed(),
            termination,
        })
    }

    /// Progress callback for one job: records a sample and, when the tracker lets it
    /// through, edits the owner's status message without waiting for the result
    fn progress_callback(&self, job: &Job) -> ProgressFn {
        let tracker = Arc::clone(&self.tracker);
        let notifier = Arc::clone(&self.notifier);
        let job = job.clone();
        let runtime = tokio::runtime::Handle::current();

        Arc::new(move |current, total| {
            let Some(update) = tracker.observe(job.key(), current, total, Instant::now()) else {
                return;
            };
            let Some((channel, message)) = job
                .reply
                .as_ref()
                .and_then(|r| r.message.map(|m| (r.channel, m)))
            else {
                return;
            };
            let text = message::progress_message(&job, &update);
            let notifier = Arc::clone(&notifier);
            let job_id = job.id;
            runtime.spawn(async move {
                if let Err(e) = notifier.edit(channel, message, &text).await {
                    warn!("Job {}: failed to update progress: {}", job_id, e);
                }
            });
        })
    }

    /// Mark the owner's running job cancelled and stop its transcoder.
    /// Returns false when the owner has nothing running, including after reap.
    pub async fn cancel(&self, owner: OwnerId) -> bool {
        let Some(handle) = self.registry.get(owner) else {
            return false;
        };
        handle.cancelled.store(true, Ordering::SeqCst);
        let outcome = handle.terminate(&self.grace).await;
        info!("Cancelled transcoder for owner {} ({:?})", owner, outcome);
        true
    }

    /// Stop and release the owner's transcoder if it still belongs to `job_id`.
    /// Used when the task driving the job died without reaping.
    pub async fn evict(&self, owner: OwnerId, job_id: uuid::Uuid) -> bool {
        let Some(handle) = self.registry.get(owner).filter(|h| h.job_id == job_id) else {
            return false;
        };
        handle.terminate(&self.grace).await;
        handle.process.lock().await.reap().await;
        self.registry.release(&handle)
    }

    /// Refuse further launches and stop every running transcoder;
    /// their workers reap and release them
    pub async fn shutdown(&self) -> usize {
        self.closing.store(true, Ordering::SeqCst);
        let handles = self.registry.handles();
        for handle in &handles {
            handle.cancelled.store(true, Ordering::SeqCst);
            handle.terminate(&self.grace).await;
        }
        handles.len()
    }
}
