use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::collab::{Notifier, Resolver, UploadSink};
use crate::config::{CancelPolicy, PipelineConfig};
use crate::error::JobError;
use crate::job::{Job, OwnerId};
use crate::message;
use crate::queue::JobQueue;
use crate::stats::{Statistics, StatsSnapshot};
use crate::supervisor::{StreamSummary, Supervisor};

/// What `cancel_owner_jobs` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CancelReport {
    pub running_cancelled: bool,
    pub queued_dropped: usize,
}

struct PoolInner {
    queue: JobQueue,
    supervisor: Supervisor,
    resolver: Arc<dyn Resolver>,
    notifier: Arc<dyn Notifier>,
    stats: Statistics,
    cancel_policy: CancelPolicy,
}

/// Queue of jobs drained by a fixed set of workers
pub struct JobPool {
    inner: Arc<PoolInner>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl JobPool {
    pub fn new(
        cfg: &PipelineConfig,
        resolver: Arc<dyn Resolver>,
        sink: Arc<dyn UploadSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let supervisor = Supervisor::new(cfg, sink, Arc::clone(&notifier));
        Self {
            inner: Arc::new(PoolInner {
                queue: JobQueue::new(),
                supervisor,
                resolver,
                notifier,
                stats: Statistics::new(),
                cancel_policy: cfg.cancel_policy,
            }),
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Append a job; returns its 1-based queue position
    pub fn enqueue(&self, job: Job) -> usize {
        let position = self.inner.queue.enqueue(job);
        debug!("Job queued at position {}", position);
        position
    }

    /// Launch `n` workers that run until the pool is closed
    pub fn start_workers(&self, n: usize) {
        let mut workers = self.workers.lock();
        let first = workers.len();
        for idx in first..first + n {
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(worker_loop(inner, format!("worker-{}", idx + 1))));
        }
        info!("👷 Started {} workers ({} total)", n, workers.len());
    }

    /// Stop the owner's running job; with `RunningAndQueued` also drop their queued jobs
    pub async fn cancel_owner_jobs(&self, owner: OwnerId) -> CancelReport {
        let queued_dropped = match self.inner.cancel_policy {
            CancelPolicy::RunningAndQueued => self.inner.queue.remove_owner(owner),
            CancelPolicy::RunningOnly => 0,
        };
        let running_cancelled = self.inner.supervisor.cancel(owner).await;
        if running_cancelled || queued_dropped > 0 {
            info!(
                "🛑 Owner {}: cancelled running job: {}, dropped {} queued",
                owner, running_cancelled, queued_dropped
            );
        }
        CancelReport {
            running_cancelled,
            queued_dropped,
        }
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.inner
            .stats
            .snapshot(self.inner.queue.len(), self.inner.supervisor.registry().len())
    }

    /// 1-based position of the owner's first queued job
    pub fn queue_position(&self, owner: OwnerId) -> Option<usize> {
        self.inner.queue.position_of(owner)
    }

    /// Queue status text for the owner, if they have a job waiting
    pub fn queue_status(&self, owner: OwnerId) -> Option<String> {
        let position = self.queue_position(owner)?;
        let queued = self.inner.queue.len();
        let workers = self.workers.lock().len().max(1);
        let snapshot = self.get_stats();
        // Average job time from throughput so far; unknown until something finished
        let estimated = (snapshot.total_processed > 0).then(|| {
            let per_job = snapshot.uptime_secs as f64 / snapshot.total_processed as f64;
            Duration::from_secs_f64(per_job * position as f64 / workers as f64)
        });
        Some(message::queue_message(position, queued, estimated))
    }

    /// Wait until every enqueued job has finished, or `timeout` elapses
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.queue.join_timeout(timeout).await
    }

    pub async fn wait_until_idle(&self) {
        self.inner.queue.join().await
    }

    /// Stop all running transcoders and the workers. Queued jobs are not drained.
    pub async fn close(&self) {
        info!("🧹 Closing job pool");
        self.inner.queue.close();
        let terminated = self.inner.supervisor.shutdown().await;
        if terminated > 0 {
            info!("Terminated {} running transcoders", terminated);
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker ended abnormally: {}", e);
            }
        }

        self.inner.resolver.close().await;
        let snap = self.get_stats();
        info!(
            "✅ Job pool closed: {} processed, {} failed, {} cancelled, {} left in queue",
            snap.total_processed, snap.total_failed, snap.total_cancelled, snap.queue_depth
        );
    }
}

async fn worker_loop(inner: Arc<PoolInner>, name: String) {
    debug!("{} started", name);
    while let Some(job) = inner.queue.dequeue().await {
        info!("{}: ▶️ Job {} ({} for owner {})", name, job.id, job.label(), job.owner);
        let started = Instant::now();

        let result = {
            let inner = Arc::clone(&inner);
            let job = job.clone();
            tokio::spawn(async move { process(&inner, &job).await }).await
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    join_err.to_string()
                };
                error!("{}: job {} task died: {}", name, job.id, reason);
                inner.supervisor.evict(job.owner, job.id).await;
                Err(JobError::Panicked(reason))
            }
        };

        inner.supervisor.tracker().discard(&job.key());
        finish(&inner, &job, outcome, started).await;
        inner.queue.task_done();
    }
    debug!("{} stopped", name);
}

async fn process(inner: &PoolInner, job: &Job) -> Result<StreamSummary, JobError> {
    let input = match inner.resolver.resolve(job).await {
        Ok(Some(input)) => input,
        Ok(None) => return Err(JobError::Resolution(job.source.clone())),
        Err(e) => return Err(JobError::Resolver(e)),
    };
    inner.supervisor.stream(job, &input).await
}

/// Record statistics and send the single terminal notification
async fn finish(inner: &PoolInner, job: &Job, outcome: Result<StreamSummary, JobError>, started: Instant) {
    let text = match &outcome {
        Ok(summary) => {
            inner.stats.record_success(summary.bytes);
            info!(
                "Job {}: ✅ uploaded {} to {} in {:.1}s",
                job.id,
                message::format_file_size(summary.bytes),
                summary.location,
                started.elapsed().as_secs_f64()
            );
            message::completion_message(job, summary.bytes, summary.elapsed)
        }
        Err(e) if e.is_cancellation() => {
            inner.stats.record_cancelled();
            message::cancelled_message(job)
        }
        Err(e) => {
            inner.stats.record_failure();
            error!("Job {}: ❌ {}", job.id, e);
            message::failure_message(job, &e.to_string())
        }
    };

    match &job.reply {
        Some(route) => {
            if let Err(e) = inner.notifier.send(route.channel, &text).await {
                warn!("Job {}: failed to notify owner: {}", job.id, e);
            }
        }
        None => debug!("Job {}: no reply route, notification dropped", job.id),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
