//! ScoreGate - Detection threshold gate
//!
//! ## Responsibilities
//!
//! - Compare classifier scores against the configured threshold
//! - Emit a `CandidateEvent` for every passing detection
//! - Honor per-camera threshold overrides
//!
//! The gate holds no state of its own. The threshold is re-read from the
//! shared configuration on every evaluation, so runtime changes apply to the
//! next frame without a restart.

use crate::config::ConfigHandle;
use crate::types::{CandidateEvent, Frame};

/// Threshold gate between the scorer and the dedup engine
pub struct ScoreGate {
    config: ConfigHandle,
}

impl ScoreGate {
    /// Create a gate reading thresholds from the shared configuration
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }

    /// Evaluate one scored frame
    ///
    /// Returns a candidate when `score >= threshold` (boundary inclusive).
    /// Scores outside [0, 1] are clamped before comparison; NaN drops the
    /// detection outright.
    pub async fn evaluate(
        &self,
        frame: &Frame,
        zone: &str,
        event_type: &str,
        score: f64,
    ) -> Option<CandidateEvent> {
        if score.is_nan() {
            tracing::warn!(
                camera_id = %frame.camera_id,
                sequence = frame.sequence,
                "Scorer returned NaN, dropping detection"
            );
            return None;
        }

        let score = if (0.0..=1.0).contains(&score) {
            score
        } else {
            let clamped = score.clamp(0.0, 1.0);
            tracing::warn!(
                camera_id = %frame.camera_id,
                raw_score = score,
                clamped = clamped,
                "Score outside [0, 1], clamped"
            );
            clamped
        };

        let threshold = self.config.read().await.threshold_for(&frame.camera_id);

        if score >= threshold {
            tracing::debug!(
                camera_id = %frame.camera_id,
                zone = %zone,
                event_type = %event_type,
                score = score,
                threshold = threshold,
                "Detection passed score gate"
            );
            Some(CandidateEvent {
                camera_id: frame.camera_id.clone(),
                zone: zone.to_string(),
                event_type: event_type.to_string(),
                score,
                detected_at: frame.timestamp,
            })
        } else {
            tracing::trace!(
                camera_id = %frame.camera_id,
                score = score,
                threshold = threshold,
                "Detection below threshold"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use bytes::Bytes;
    use chrono::Utc;

    fn gate_with(config: PipelineConfig) -> ScoreGate {
        ScoreGate::new(ConfigHandle::new(config).unwrap())
    }

    fn frame(camera_id: &str) -> Frame {
        Frame::new(camera_id, 1, Utc::now(), Bytes::from_static(b"f"))
    }

    #[tokio::test]
    async fn test_above_threshold_passes() {
        let gate = gate_with(PipelineConfig::default());
        let candidate = gate
            .evaluate(&frame("cam-001"), "entrance", "intrusion", 0.7)
            .await;
        let candidate = candidate.unwrap();
        assert_eq!(candidate.camera_id, "cam-001");
        assert_eq!(candidate.zone, "entrance");
        assert_eq!(candidate.score, 0.7);
    }

    #[tokio::test]
    async fn test_below_threshold_drops() {
        let gate = gate_with(PipelineConfig::default());
        let candidate = gate
            .evaluate(&frame("cam-001"), "entrance", "intrusion", 0.3)
            .await;
        assert!(candidate.is_none());
    }

    #[tokio::test]
    async fn test_boundary_is_inclusive() {
        let gate = gate_with(PipelineConfig::default());
        let candidate = gate
            .evaluate(&frame("cam-001"), "entrance", "intrusion", 0.6)
            .await;
        assert!(candidate.is_some());
    }

    #[tokio::test]
    async fn test_camera_override_takes_precedence() {
        let mut config = PipelineConfig::default();
        config.camera_thresholds.insert("cam-strict".to_string(), 0.9);
        let gate = gate_with(config);

        assert!(gate
            .evaluate(&frame("cam-strict"), "z", "intrusion", 0.7)
            .await
            .is_none());
        assert!(gate
            .evaluate(&frame("cam-other"), "z", "intrusion", 0.7)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_threshold_change_applies_immediately() {
        let handle = ConfigHandle::new(PipelineConfig::default()).unwrap();
        let gate = ScoreGate::new(handle.clone());

        assert!(gate
            .evaluate(&frame("cam-001"), "z", "intrusion", 0.7)
            .await
            .is_some());

        handle.set_threshold(0.8).await.unwrap();
        assert!(gate
            .evaluate(&frame("cam-001"), "z", "intrusion", 0.7)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_score_clamped() {
        let gate = gate_with(PipelineConfig::default());
        let candidate = gate
            .evaluate(&frame("cam-001"), "z", "intrusion", 1.7)
            .await
            .unwrap();
        assert_eq!(candidate.score, 1.0);
    }

    #[tokio::test]
    async fn test_nan_score_dropped() {
        let gate = gate_with(PipelineConfig::default());
        assert!(gate
            .evaluate(&frame("cam-001"), "z", "intrusion", f64::NAN)
            .await
            .is_none());
    }
}
