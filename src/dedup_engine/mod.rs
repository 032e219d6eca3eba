//! DedupEngine - Time-windowed event deduplication
//!
//! ## Responsibilities
//!
//! - Collapse repeated same-key detections into one accepted event per
//!   cool-down window (key = camera + zone + event type)
//! - Mint exactly one `ClipJob` per accepted candidate
//! - Evict stale keys lazily on lookup and via a periodic purge
//!
//! Admission is decided against the candidate's own detection timestamp, so
//! replayed footage and synthetic clocks reproduce live behavior. Each key
//! has its own critical section: concurrent candidates for one key resolve
//! to exactly one acceptance while unrelated keys never contend.

use crate::config::ConfigHandle;
use crate::types::{CandidateEvent, ClipJob, DedupKey};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Entries older than this many cool-down windows are purged
const STALE_WINDOW_FACTOR: i32 = 3;

/// Outcome of a dedup admission check
#[derive(Debug)]
pub enum Admission {
    /// New occurrence, clip job minted
    Accepted(ClipJob),
    /// Same-key event inside the cool-down window
    Suppressed {
        key: DedupKey,
        /// Signed distance to the previous acceptance
        since_last: chrono::Duration,
    },
}

/// Per-key admission state
struct DedupSlot {
    last_accepted_at: Option<DateTime<Utc>>,
}

/// Deduplication engine
pub struct DedupEngine {
    /// Per-key slots, each with its own lock
    slots: RwLock<HashMap<DedupKey, Arc<Mutex<DedupSlot>>>>,
    config: ConfigHandle,
}

impl DedupEngine {
    /// Create an engine reading the cool-down from the shared configuration
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Decide whether a candidate is a new occurrence or a duplicate
    ///
    /// Exactly one of two outcomes: `Accepted` with a fresh job, or
    /// `Suppressed`. The decision timestamp is `candidate.detected_at`.
    /// Acceptance requires the candidate to sit a full cool-down past the
    /// previous acceptance; candidates timestamped before it are duplicates
    /// and the anchor never moves backwards.
    pub async fn admit(&self, candidate: CandidateEvent) -> Admission {
        let (cooldown, during_margin) = {
            let config = self.config.read().await;
            (config.dedup_cooldown, config.during_margin)
        };
        let cooldown =
            chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX);
        let during_margin =
            chrono::Duration::from_std(during_margin).unwrap_or(chrono::Duration::zero());

        let key = candidate.key();
        let slot = self.get_or_create_slot(&key).await;

        // Per-key critical section: check and refresh are atomic
        let mut slot = slot.lock().await;
        let now = candidate.detected_at;

        if let Some(last) = slot.last_accepted_at {
            let since_last = now.signed_duration_since(last);
            if since_last < cooldown {
                tracing::debug!(
                    key = %key,
                    score = candidate.score,
                    since_last_secs = since_last.num_seconds(),
                    "Candidate suppressed by cool-down"
                );
                return Admission::Suppressed { key, since_last };
            }
        }

        slot.last_accepted_at = Some(now);

        let job = ClipJob {
            job_id: Uuid::new_v4(),
            camera_id: candidate.camera_id,
            zone: candidate.zone,
            event_type: candidate.event_type,
            score: candidate.score,
            event_start: now,
            event_end: now + during_margin,
            enqueued_at: Utc::now(),
        };

        tracing::info!(
            key = %key,
            job_id = %job.job_id,
            score = job.score,
            detected_at = %now,
            "Candidate accepted"
        );

        Admission::Accepted(job)
    }

    /// Remove keys whose last acceptance is far outside the cool-down
    ///
    /// Returns the number of purged keys. Meant to run from a periodic
    /// maintenance task.
    pub async fn purge_stale(&self, now: DateTime<Utc>) -> usize {
        let cooldown = self.config.read().await.dedup_cooldown;
        let cooldown =
            chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX);
        let horizon = cooldown
            .checked_mul(STALE_WINDOW_FACTOR)
            .unwrap_or(chrono::Duration::MAX);

        let mut slots = self.slots.write().await;
        let mut stale = Vec::new();
        for (key, slot) in slots.iter() {
            // A slot with no acceptance belongs to an admit that has not
            // reached its critical section yet; it must stay reachable
            let last = slot.lock().await.last_accepted_at;
            if let Some(ts) = last {
                if now.signed_duration_since(ts) > horizon {
                    stale.push(key.clone());
                }
            }
        }
        for key in &stale {
            slots.remove(key);
        }

        if !stale.is_empty() {
            tracing::debug!(purged = stale.len(), "Purged stale dedup keys");
        }
        stale.len()
    }

    /// Number of tracked keys
    pub async fn key_count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Slot for a key, created on first sight
    async fn get_or_create_slot(&self, key: &DedupKey) -> Arc<Mutex<DedupSlot>> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(key) {
                return slot.clone();
            }
        }

        let mut slots = self.slots.write().await;
        slots
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DedupSlot {
                    last_accepted_at: None,
                }))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use chrono::TimeZone;

    fn engine() -> DedupEngine {
        DedupEngine::new(ConfigHandle::new(PipelineConfig::default()).unwrap())
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn candidate(camera: &str, zone: &str, offset_secs: i64, score: f64) -> CandidateEvent {
        CandidateEvent {
            camera_id: camera.to_string(),
            zone: zone.to_string(),
            event_type: "intrusion".to_string(),
            score,
            detected_at: base_time() + chrono::Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn test_first_candidate_accepted() {
        let engine = engine();
        let admission = engine.admit(candidate("cam-001", "entrance", 0, 0.8)).await;
        assert!(matches!(admission, Admission::Accepted(_)));
    }

    #[tokio::test]
    async fn test_same_key_suppressed_within_cooldown() {
        let engine = engine();
        engine.admit(candidate("cam-001", "entrance", 0, 0.8)).await;

        // One second later, default cool-down is 300s
        let admission = engine.admit(candidate("cam-001", "entrance", 1, 0.9)).await;
        match admission {
            Admission::Suppressed { since_last, .. } => {
                assert_eq!(since_last.num_seconds(), 1);
            }
            other => panic!("expected suppression, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accepted_again_after_cooldown() {
        let engine = engine();
        engine.admit(candidate("cam-001", "entrance", 0, 0.8)).await;

        let admission = engine.admit(candidate("cam-001", "entrance", 301, 0.8)).await;
        assert!(matches!(admission, Admission::Accepted(_)));
    }

    #[tokio::test]
    async fn test_stale_candidate_suppressed_without_anchor_rewind() {
        let engine = engine();
        engine.admit(candidate("cam-001", "entrance", 0, 0.8)).await;

        // Replayed candidate from long before the acceptance
        let stale = engine.admit(candidate("cam-001", "entrance", -400, 0.9)).await;
        match stale {
            Admission::Suppressed { since_last, .. } => {
                assert_eq!(since_last.num_seconds(), -400);
            }
            other => panic!("expected suppression, got {:?}", other),
        }

        // The anchor still sits at t=0, so an in-window candidate stays out
        let inside = engine.admit(candidate("cam-001", "entrance", 1, 0.9)).await;
        assert!(matches!(inside, Admission::Suppressed { .. }));
    }

    #[tokio::test]
    async fn test_distinct_keys_independent() {
        let engine = engine();
        let a = engine.admit(candidate("cam-001", "entrance", 0, 0.8)).await;
        let b = engine.admit(candidate("cam-001", "parking", 0, 0.8)).await;
        let c = engine.admit(candidate("cam-002", "entrance", 0, 0.8)).await;
        assert!(matches!(a, Admission::Accepted(_)));
        assert!(matches!(b, Admission::Accepted(_)));
        assert!(matches!(c, Admission::Accepted(_)));
    }

    #[tokio::test]
    async fn test_concurrent_same_key_single_acceptance() {
        let engine = Arc::new(engine());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.admit(candidate("cam-001", "entrance", 0, 0.8)).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Admission::Accepted(_)) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn test_job_fields_from_candidate() {
        let engine = engine();
        let admission = engine.admit(candidate("cam-001", "entrance", 0, 0.8)).await;
        let job = match admission {
            Admission::Accepted(job) => job,
            other => panic!("expected acceptance, got {:?}", other),
        };

        assert_eq!(job.camera_id, "cam-001");
        assert_eq!(job.event_start, base_time());
        // Default during-margin is 2s
        assert_eq!(job.event_end, base_time() + chrono::Duration::seconds(2));
    }

    #[tokio::test]
    async fn test_purge_removes_stale_keys() {
        let engine = engine();
        engine.admit(candidate("cam-001", "entrance", 0, 0.8)).await;
        engine.admit(candidate("cam-002", "entrance", 0, 0.8)).await;
        assert_eq!(engine.key_count().await, 2);

        // Well past 3x the 300s cool-down
        let purged = engine
            .purge_stale(base_time() + chrono::Duration::seconds(1000))
            .await;
        assert_eq!(purged, 2);
        assert_eq!(engine.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_purge_keeps_fresh_keys() {
        let engine = engine();
        engine.admit(candidate("cam-001", "entrance", 0, 0.8)).await;

        let purged = engine
            .purge_stale(base_time() + chrono::Duration::seconds(60))
            .await;
        assert_eq!(purged, 0);
        assert_eq!(engine.key_count().await, 1);
    }

    #[tokio::test]
    async fn test_purge_spares_pending_slots() {
        let engine = engine();
        let key = DedupKey {
            camera_id: "cam-001".to_string(),
            zone: "entrance".to_string(),
            event_type: "intrusion".to_string(),
        };
        // Slot exists but no admit has reached its critical section yet
        let _slot = engine.get_or_create_slot(&key).await;

        let purged = engine
            .purge_stale(base_time() + chrono::Duration::seconds(10_000))
            .await;
        assert_eq!(purged, 0);
        assert_eq!(engine.key_count().await, 1);
    }
}
