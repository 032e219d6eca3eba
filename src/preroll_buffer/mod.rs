//! PrerollBuffer - Per-camera pre-roll ring buffer
//!
//! ## Responsibilities
//!
//! - Retain the most recent window of frames per camera (timestamp-bounded,
//!   not slot-count-bounded)
//! - Evict expired frames automatically on every push
//! - Serve consistent, timestamp-ordered snapshots to the clip assembler
//! - Manage per-camera buffer lifecycle via a keyed registry
//!
//! Retention is driven by frame timestamps so replayed or synthetic streams
//! behave exactly like live ones. A slot-count cap sized from the expected
//! worst-case frame rate backstops cameras that deliver faster than
//! configured.

use crate::types::Frame;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Ring buffer of recent frames for one camera
pub struct PrerollBuffer {
    /// Camera this buffer belongs to
    camera_id: String,
    /// Retention window, measured against the newest frame's timestamp
    window: chrono::Duration,
    /// Hard cap on retained frames
    capacity: usize,
    /// Frames in timestamp order, oldest first
    frames: RwLock<VecDeque<Frame>>,
}

impl PrerollBuffer {
    /// Create a buffer with the given retention window and slot cap
    pub fn new(camera_id: impl Into<String>, window: Duration, capacity: usize) -> Self {
        // Out-of-range conversion saturates to effectively infinite retention
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        Self {
            camera_id: camera_id.into(),
            window,
            capacity: capacity.max(1),
            frames: RwLock::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Append a frame and evict everything outside the retention window
    ///
    /// Frames older than the newest retained frame are dropped (per-camera
    /// delivery is timestamp-ordered upstream). Returns false when the frame
    /// was dropped.
    pub async fn push(&self, frame: Frame) -> bool {
        let mut frames = self.frames.write().await;

        if let Some(newest) = frames.back() {
            if frame.timestamp < newest.timestamp {
                tracing::warn!(
                    camera_id = %self.camera_id,
                    sequence = frame.sequence,
                    timestamp = %frame.timestamp,
                    newest = %newest.timestamp,
                    "Dropping out-of-order frame"
                );
                return false;
            }
        }

        let horizon = frame
            .timestamp
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        frames.push_back(frame);

        while let Some(front) = frames.front() {
            if front.timestamp < horizon {
                frames.pop_front();
            } else {
                break;
            }
        }
        while frames.len() > self.capacity {
            frames.pop_front();
        }

        true
    }

    /// Frames with timestamps in `[from, to]`, oldest first
    ///
    /// Ranges reaching outside current retention truncate silently; callers
    /// get whatever overlap exists. Payload clones are reference-counted.
    pub async fn snapshot(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Frame> {
        let frames = self.frames.read().await;
        frames
            .iter()
            .filter(|f| f.timestamp >= from && f.timestamp <= to)
            .cloned()
            .collect()
    }

    /// Timestamp of the newest retained frame
    pub async fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.frames.read().await.back().map(|f| f.timestamp)
    }

    /// Timestamp of the oldest retained frame
    pub async fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.frames.read().await.front().map(|f| f.timestamp)
    }

    /// Number of retained frames
    pub async fn len(&self) -> usize {
        self.frames.read().await.len()
    }

    /// True when nothing is retained
    pub async fn is_empty(&self) -> bool {
        self.frames.read().await.is_empty()
    }

    /// Camera this buffer belongs to
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }
}

/// Registry of per-camera buffers
///
/// Buffers are created on first frame and removed on stream teardown.
/// In-flight clip jobs hold their own `Arc` and keep working with whatever
/// was captured before the release.
pub struct PrerollBuffers {
    buffers: RwLock<HashMap<String, Arc<PrerollBuffer>>>,
    window: Duration,
    capacity: usize,
}

impl PrerollBuffers {
    /// Create a registry; window and capacity apply to every new buffer
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            window,
            capacity,
        }
    }

    /// Buffer for a camera, created on first use
    pub async fn get_or_create(&self, camera_id: &str) -> Arc<PrerollBuffer> {
        // Read lock first, most frames hit an existing buffer
        {
            let buffers = self.buffers.read().await;
            if let Some(buffer) = buffers.get(camera_id) {
                return buffer.clone();
            }
        }

        let mut buffers = self.buffers.write().await;
        buffers
            .entry(camera_id.to_string())
            .or_insert_with(|| {
                tracing::info!(camera_id = %camera_id, "Pre-roll buffer created");
                Arc::new(PrerollBuffer::new(camera_id, self.window, self.capacity))
            })
            .clone()
    }

    /// Buffer for a camera, if one exists
    pub async fn get(&self, camera_id: &str) -> Option<Arc<PrerollBuffer>> {
        self.buffers.read().await.get(camera_id).cloned()
    }

    /// Drop a camera's buffer on stream teardown
    ///
    /// Returns true when a buffer was removed.
    pub async fn release(&self, camera_id: &str) -> bool {
        let removed = self.buffers.write().await.remove(camera_id).is_some();
        if removed {
            tracing::info!(camera_id = %camera_id, "Pre-roll buffer released");
        }
        removed
    }

    /// Number of cameras with live buffers
    pub async fn camera_count(&self) -> usize {
        self.buffers.read().await.len()
    }
}
