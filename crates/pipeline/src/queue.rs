use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::job::{Job, OwnerId};

/// Unbounded FIFO of pending jobs with a join on completion.
///
/// Every dequeued job must be acknowledged with [`JobQueue::task_done`];
/// [`JobQueue::join`] resolves once all enqueued jobs were acknowledged.
#[derive(Debug, Default)]
pub struct JobQueue {
    items: Mutex<VecDeque<Job>>,
    available: Notify,
    unfinished: AtomicUsize,
    drained: Notify,
    closed: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job and return its 1-based position
    pub fn enqueue(&self, job: Job) -> usize {
        let position = {
            let mut items = self.items.lock();
            items.push_back(job);
            items.len()
        };
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        self.available.notify_one();
        position
    }

    /// Wait for the next job. Returns `None` once the queue is closed.
    pub async fn dequeue(&self) -> Option<Job> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(job) = self.items.lock().pop_front() {
                return Some(job);
            }
            notified.await;
        }
    }

    /// Acknowledge a job returned by `dequeue`
    pub fn task_done(&self) {
        self.finish(1);
    }

    fn finish(&self, count: usize) {
        if count == 0 {
            return;
        }
        let before = self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(count)))
            .unwrap_or(0);
        if before <= count {
            self.drained.notify_waiters();
        }
    }

    /// Drop every queued job of `owner`; returns how many were removed
    pub fn remove_owner(&self, owner: OwnerId) -> usize {
        let removed = {
            let mut items = self.items.lock();
            let before = items.len();
            items.retain(|job| job.owner != owner);
            before - items.len()
        };
        self.finish(removed);
        removed
    }

    /// 1-based position of the owner's first queued job
    pub fn position_of(&self, owner: OwnerId) -> Option<usize> {
        self.items
            .lock()
            .iter()
            .position(|job| job.owner == owner)
            .map(|idx| idx + 1)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Jobs enqueued but not yet acknowledged, running ones included
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }

    /// Wake every waiting consumer and make further dequeues return `None`.
    /// Queued jobs stay where they are.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued job has been acknowledged
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.unfinished.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// `join` with a deadline; true if the queue drained in time
    pub async fn join_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.join()).await.is_ok()
    }
}
