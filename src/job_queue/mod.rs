//! ClipJobQueue - Bounded job queue between detection and clip assembly
//!
//! ## Responsibilities
//!
//! - Decouple the real-time ingestion path from I/O-heavy clip assembly
//! - FIFO delivery, each job consumed by exactly one worker
//! - Explicit backpressure at capacity: displace the oldest job or reject
//!   the newest, by policy, never silently and never blocking the producer
//! - Drain-then-stop semantics on close for graceful shutdown
//!
//! Accounting identity: every submitted job is either in the queue, handed
//! to a worker, or counted as dropped. `enqueued - dequeued - dropped` is
//! the current depth and never goes negative.

use crate::config::BackpressurePolicy;
use crate::error::{Error, Result};
use crate::types::ClipJob;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify};

/// Outcome of a non-blocking enqueue
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Job admitted, queue had room
    Enqueued {
        /// Queue depth after admission
        depth: usize,
    },
    /// Job admitted by displacing the oldest queued job
    DisplacedOldest {
        /// The job that was pushed out
        displaced: ClipJob,
    },
    /// Job refused, queue unchanged
    Rejected,
}

/// Queue counters snapshot
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    /// Jobs submitted (admitted or not)
    pub enqueued: u64,
    /// Jobs handed to workers
    pub dequeued: u64,
    /// Jobs displaced or rejected at capacity
    pub dropped: u64,
    /// Current depth
    pub depth: usize,
}

/// Bounded FIFO queue of clip jobs
pub struct ClipJobQueue {
    queue: Mutex<VecDeque<ClipJob>>,
    notify: Notify,
    capacity: usize,
    policy: BackpressurePolicy,
    closed: AtomicBool,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
}

impl ClipJobQueue {
    /// Create a queue with the given capacity and full-queue policy
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            policy,
            closed: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Submit a job without blocking
    ///
    /// At capacity the configured policy decides: `DropOldest` displaces the
    /// head to admit the new job, `RejectNewest` refuses it. Both outcomes
    /// are counted and logged. Errors only after `close()`.
    pub async fn enqueue(&self, job: ClipJob) -> Result<EnqueueOutcome> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }

        self.enqueued.fetch_add(1, Ordering::Relaxed);

        let outcome = {
            let mut queue = self.queue.lock().await;
            if queue.len() < self.capacity {
                queue.push_back(job);
                EnqueueOutcome::Enqueued { depth: queue.len() }
            } else {
                match self.policy {
                    BackpressurePolicy::DropOldest => {
                        // Capacity >= 1, the pop cannot fail here
                        let displaced = queue.pop_front();
                        queue.push_back(job);
                        match displaced {
                            Some(displaced) => EnqueueOutcome::DisplacedOldest { displaced },
                            None => EnqueueOutcome::Enqueued { depth: queue.len() },
                        }
                    }
                    BackpressurePolicy::RejectNewest => EnqueueOutcome::Rejected,
                }
            }
        };

        match &outcome {
            EnqueueOutcome::Enqueued { depth } => {
                tracing::debug!(depth = depth, "Clip job enqueued");
                self.notify.notify_one();
            }
            EnqueueOutcome::DisplacedOldest { displaced } => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    displaced_job = %displaced.job_id,
                    policy = %self.policy,
                    capacity = self.capacity,
                    "Queue full, displaced oldest job"
                );
                self.notify.notify_one();
            }
            EnqueueOutcome::Rejected => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    policy = %self.policy,
                    capacity = self.capacity,
                    "Queue full, rejected incoming job"
                );
            }
        }

        Ok(outcome)
    }

    /// Take the next job, waiting until one is available
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<ClipJob> {
        let notified = self.notify.notified();
        tokio::pin!(notified);

        loop {
            // Register before checking the queue; enqueue pushes before it
            // notifies, so anything pushed after this check wakes us
            notified.as_mut().enable();

            {
                let mut queue = self.queue.lock().await;
                if let Some(job) = queue.pop_front() {
                    self.dequeued.fetch_add(1, Ordering::Relaxed);
                    return Some(job);
                }
            }

            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }

    /// Stop accepting jobs and wake all waiting workers
    ///
    /// Jobs already queued are still handed out; workers see `None` only
    /// after the drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        tracing::info!("Clip job queue closed");
    }

    /// True once `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current depth
    pub async fn depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Counter snapshot
    pub async fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            depth: self.queue.lock().await.len(),
        }
    }
}
