//! PipelineHub - Pipeline observability events and counters
//!
//! ## Responsibilities
//!
//! - Broadcast discrete pipeline decisions (acceptance, suppression, queue
//!   drops, clip completion, abandonment) to in-process subscribers
//! - Maintain the pipeline counters
//!
//! Every event carries enough context to reconstruct the decision without
//! consulting logs. Delivery is best-effort: a slow or dropped subscriber
//! never blocks the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum PipelineEvent {
    CandidateAccepted(CandidateAcceptedMessage),
    CandidateSuppressed(CandidateSuppressedMessage),
    JobEnqueued(JobEnqueuedMessage),
    JobDropped(JobDroppedMessage),
    /// Clip fully covering the requested range
    ClipCompleted(ClipCompletedMessage),
    /// Clip produced from partial coverage
    ClipCompletedPartial(ClipCompletedMessage),
    ClipAbandoned(ClipAbandonedMessage),
}

/// Candidate accepted by the dedup engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAcceptedMessage {
    pub key: String,
    pub job_id: String,
    pub camera_id: String,
    pub zone: String,
    pub event_type: String,
    pub score: f64,
    pub detected_at: String,
}

/// Candidate suppressed inside the cool-down window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSuppressedMessage {
    pub key: String,
    pub score: f64,
    pub detected_at: String,
    /// Seconds since the previous acceptance for this key
    pub since_last_secs: i64,
}

/// Job admitted to the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnqueuedMessage {
    pub job_id: String,
    pub key: String,
    /// Queue depth after admission
    pub depth: usize,
}

/// Job dropped by the backpressure policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDroppedMessage {
    pub job_id: String,
    pub key: String,
    /// Policy that dropped it ("drop_oldest" or "reject_newest")
    pub policy: String,
    pub enqueued_at: String,
}

/// Clip written and handed to the evidence sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipCompletedMessage {
    pub job_id: String,
    pub camera_id: String,
    pub path: String,
    pub start: String,
    pub end: String,
    pub frame_count: usize,
}

/// Job abandoned after exhausting its retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipAbandonedMessage {
    pub job_id: String,
    pub camera_id: String,
    pub reason: String,
    pub attempts: u32,
}

/// Pipeline counters
#[derive(Debug, Default)]
pub struct PipelineCounters {
    frames_ingested: AtomicU64,
    candidates_accepted: AtomicU64,
    candidates_suppressed: AtomicU64,
    jobs_enqueued: AtomicU64,
    jobs_dequeued: AtomicU64,
    jobs_dropped: AtomicU64,
    clips_completed: AtomicU64,
    clips_partial: AtomicU64,
    clips_abandoned: AtomicU64,
}

/// Point-in-time counter values
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub frames_ingested: u64,
    pub candidates_accepted: u64,
    pub candidates_suppressed: u64,
    pub jobs_enqueued: u64,
    pub jobs_dequeued: u64,
    pub jobs_dropped: u64,
    pub clips_completed: u64,
    pub clips_partial: u64,
    pub clips_abandoned: u64,
}

impl PipelineCounters {
    pub fn inc_frames_ingested(&self) {
        self.frames_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_jobs_dequeued(&self) {
        self.jobs_dequeued.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            candidates_accepted: self.candidates_accepted.load(Ordering::Relaxed),
            candidates_suppressed: self.candidates_suppressed.load(Ordering::Relaxed),
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_dequeued: self.jobs_dequeued.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            clips_completed: self.clips_completed.load(Ordering::Relaxed),
            clips_partial: self.clips_partial.load(Ordering::Relaxed),
            clips_abandoned: self.clips_abandoned.load(Ordering::Relaxed),
        }
    }
}

/// PipelineHub instance
pub struct PipelineHub {
    subscribers: RwLock<HashMap<Uuid, mpsc::UnboundedSender<PipelineEvent>>>,
    counters: PipelineCounters,
}

impl PipelineHub {
    /// Create a hub with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            counters: PipelineCounters::default(),
        }
    }

    /// Register a subscriber
    pub async fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<PipelineEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.insert(id, tx);
        tracing::debug!(subscriber_id = %id, "Hub subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber
    pub async fn unsubscribe(&self, id: &Uuid) {
        if self.subscribers.write().await.remove(id).is_some() {
            tracing::debug!(subscriber_id = %id, "Hub subscriber removed");
        }
    }

    /// Update counters and broadcast the event to all subscribers
    pub async fn publish(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::CandidateAccepted(_) => {
                self.counters.candidates_accepted.fetch_add(1, Ordering::Relaxed);
            }
            PipelineEvent::CandidateSuppressed(_) => {
                self.counters.candidates_suppressed.fetch_add(1, Ordering::Relaxed);
            }
            PipelineEvent::JobEnqueued(_) => {
                self.counters.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
            }
            PipelineEvent::JobDropped(_) => {
                self.counters.jobs_dropped.fetch_add(1, Ordering::Relaxed);
            }
            PipelineEvent::ClipCompleted(_) => {
                self.counters.clips_completed.fetch_add(1, Ordering::Relaxed);
            }
            PipelineEvent::ClipCompletedPartial(_) => {
                self.counters.clips_completed.fetch_add(1, Ordering::Relaxed);
                self.counters.clips_partial.fetch_add(1, Ordering::Relaxed);
            }
            PipelineEvent::ClipAbandoned(_) => {
                self.counters.clips_abandoned.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, tx) in subscribers.iter() {
                if tx.send(event.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }

        // Receivers dropped without unsubscribing
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in dead {
                subscribers.remove(&id);
                tracing::debug!(subscriber_id = %id, "Pruned dead hub subscriber");
            }
        }
    }

    /// Pipeline counters
    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    /// Number of live subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for PipelineHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dropped_message() -> JobDroppedMessage {
        JobDroppedMessage {
            job_id: Uuid::new_v4().to_string(),
            key: "cam-001|entrance|intrusion".to_string(),
            policy: "drop_oldest".to_string(),
            enqueued_at: "2026-01-01T12:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let hub = PipelineHub::new();
        let (_id, mut rx) = hub.subscribe().await;

        hub.publish(PipelineEvent::JobDropped(dropped_message())).await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PipelineEvent::JobDropped(_)));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = PipelineHub::new();
        let (id, mut rx) = hub.subscribe().await;
        hub.unsubscribe(&id).await;

        hub.publish(PipelineEvent::JobDropped(dropped_message())).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_counters_track_events() {
        let hub = PipelineHub::new();
        hub.publish(PipelineEvent::JobDropped(dropped_message())).await;
        hub.publish(PipelineEvent::JobDropped(dropped_message())).await;
        hub.counters().inc_frames_ingested();

        let snapshot = hub.counters().snapshot();
        assert_eq!(snapshot.jobs_dropped, 2);
        assert_eq!(snapshot.frames_ingested, 1);
        assert_eq!(snapshot.clips_completed, 0);
    }

    #[tokio::test]
    async fn test_dead_subscriber_pruned() {
        let hub = PipelineHub::new();
        let (_id, rx) = hub.subscribe().await;
        drop(rx);

        hub.publish(PipelineEvent::JobDropped(dropped_message())).await;
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_partial_clip_counts_both() {
        let hub = PipelineHub::new();
        let message = ClipCompletedMessage {
            job_id: Uuid::new_v4().to_string(),
            camera_id: "cam-001".to_string(),
            path: "/tmp/clip.mp4".to_string(),
            start: "2026-01-01T12:00:00Z".to_string(),
            end: "2026-01-01T12:00:06Z".to_string(),
            frame_count: 6,
        };
        hub.publish(PipelineEvent::ClipCompletedPartial(message)).await;

        let snapshot = hub.counters().snapshot();
        assert_eq!(snapshot.clips_completed, 1);
        assert_eq!(snapshot.clips_partial, 1);
    }
}
