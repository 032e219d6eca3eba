//! Shared model types for the detection and evidence pipeline
//!
//! Everything that flows between pipeline stages lives here: frames coming
//! off a camera, candidate events leaving the score gate, clip jobs on the
//! queue, and finished clips. All windowing decisions downstream are driven
//! by the timestamps carried on these types, never by wall-clock call order.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

/// A single video frame as delivered by the acquisition layer
///
/// The payload is reference-counted, so cloning a frame (e.g. into a
/// snapshot) does not copy pixel data. Frames are immutable after creation.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Camera that produced the frame
    pub camera_id: String,
    /// Monotonic per-camera sequence number
    pub sequence: u64,
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    /// Encoded frame payload (self-contained segment bytes)
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(
        camera_id: impl Into<String>,
        sequence: u64,
        timestamp: DateTime<Utc>,
        payload: Bytes,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            sequence,
            timestamp,
            payload,
        }
    }
}

/// A detection that has already passed the score gate
#[derive(Debug, Clone)]
pub struct CandidateEvent {
    /// Camera the detection occurred on
    pub camera_id: String,
    /// Zone within the camera's view
    pub zone: String,
    /// Classifier label (e.g. "intrusion", "loitering")
    pub event_type: String,
    /// Classifier score that passed the gate
    pub score: f64,
    /// Timestamp of the frame that triggered the detection
    pub detected_at: DateTime<Utc>,
}

impl CandidateEvent {
    /// Deduplication key for this candidate
    pub fn key(&self) -> DedupKey {
        DedupKey {
            camera_id: self.camera_id.clone(),
            zone: self.zone.clone(),
            event_type: self.event_type.clone(),
        }
    }
}

/// Identity of an event for deduplication purposes
///
/// Two candidates with the same key within the cool-down window describe the
/// same real-world occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub camera_id: String,
    pub zone: String,
    pub event_type: String,
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.camera_id, self.zone, self.event_type)
    }
}

/// Work order for the clip assembler, created on dedup acceptance
#[derive(Debug, Clone)]
pub struct ClipJob {
    /// Unique job id
    pub job_id: Uuid,
    /// Camera the event occurred on
    pub camera_id: String,
    /// Zone within the camera's view
    pub zone: String,
    /// Classifier label
    pub event_type: String,
    /// Score of the accepted candidate
    pub score: f64,
    /// Start of the event (detection timestamp)
    pub event_start: DateTime<Utc>,
    /// End of the event (detection timestamp plus during-margin)
    pub event_end: DateTime<Utc>,
    /// When the job was accepted into the queue
    pub enqueued_at: DateTime<Utc>,
}

impl ClipJob {
    /// Deduplication key of the accepted candidate
    pub fn key(&self) -> DedupKey {
        DedupKey {
            camera_id: self.camera_id.clone(),
            zone: self.zone.clone(),
            event_type: self.event_type.clone(),
        }
    }
}

/// A finished evidence clip on disk
#[derive(Debug, Clone)]
pub struct Clip {
    /// Camera the clip covers
    pub camera_id: String,
    /// Artifact path
    pub path: PathBuf,
    /// Timestamp of the first frame in the clip
    pub start: DateTime<Utc>,
    /// Timestamp of the last frame in the clip
    pub end: DateTime<Utc>,
    /// Number of frames stitched into the clip
    pub frame_count: usize,
    /// True when the requested range was only partially covered
    pub partial: bool,
    /// Job that produced the clip
    pub source_job: Uuid,
}
