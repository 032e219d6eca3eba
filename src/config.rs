//! Pipeline configuration
//!
//! ## Responsibilities
//!
//! - Typed configuration for every pipeline stage with validated defaults
//! - Camera inventory loading (JSON file with per-camera overrides)
//! - Runtime-adjustable access via `ConfigHandle` (threshold changes take
//!   effect without a restart; structural values are read at startup)
//!
//! Invalid values are rejected with `Error::Config` at load or update time.
//! They are never accepted and "fixed up" mid-run.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard};

/// What the job queue does when full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Evict the oldest queued job to admit the newest (default)
    DropOldest,
    /// Refuse the incoming job, keep the queue as-is
    RejectNewest,
}

impl std::fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackpressurePolicy::DropOldest => write!(f, "drop_oldest"),
            BackpressurePolicy::RejectNewest => write!(f, "reject_newest"),
        }
    }
}

/// One camera in the inventory file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSpec {
    /// Camera id (stable, used as the buffer and dedup key component)
    pub camera_id: String,
    /// Human-readable name for evidence records
    pub name: String,
    /// Zone the camera watches
    pub zone: String,
    /// Event type this camera's detections are classified as
    pub event_type: String,
    /// Per-camera score threshold, overrides the global one when set
    #[serde(default)]
    pub threshold_override: Option<f64>,
}

/// Configuration for the whole pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pre-roll retention window per camera
    pub preroll_window: Duration,
    /// Expected worst-case frame rate, sizes the ring buffer allocation
    pub max_fps: u32,
    /// Global score threshold (candidates need score >= threshold)
    pub score_threshold: f64,
    /// Per-camera threshold overrides (camera_id -> threshold)
    pub camera_thresholds: HashMap<String, f64>,
    /// Cool-down window for same-key deduplication
    pub dedup_cooldown: Duration,
    /// Footage included before the event start
    pub pre_margin: Duration,
    /// Event duration assumed after the detection timestamp
    pub during_margin: Duration,
    /// Footage included after the event end
    pub post_margin: Duration,
    /// Upper bound on waiting for post-event footage to arrive
    pub post_wait_timeout: Duration,
    /// Job queue capacity
    pub queue_capacity: usize,
    /// Behavior when the job queue is full
    pub backpressure: BackpressurePolicy,
    /// Number of clip assembler workers
    pub worker_count: usize,
    /// Retries for transient encode/publish failures before abandoning a job
    pub retry_limit: u32,
    /// Base delay for exponential retry backoff
    pub retry_backoff: Duration,
    /// Directory clips are written to
    pub clips_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preroll_window: Duration::from_secs(10),
            max_fps: 30,
            score_threshold: 0.6,
            camera_thresholds: HashMap::new(),
            dedup_cooldown: Duration::from_secs(300),
            pre_margin: Duration::from_secs(2),
            during_margin: Duration::from_secs(2),
            post_margin: Duration::from_secs(2),
            post_wait_timeout: Duration::from_secs(30),
            queue_capacity: 256,
            backpressure: BackpressurePolicy::DropOldest,
            worker_count: 2,
            retry_limit: 3,
            retry_backoff: Duration::from_millis(100),
            clips_dir: PathBuf::from("/var/lib/clipserver/clips"),
        }
    }
}

impl PipelineConfig {
    /// Validate all values, rejecting anything the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(Error::Config(format!(
                "score_threshold must be within [0, 1], got {}",
                self.score_threshold
            )));
        }
        for (camera_id, threshold) in &self.camera_thresholds {
            if !(0.0..=1.0).contains(threshold) {
                return Err(Error::Config(format!(
                    "threshold override for {} must be within [0, 1], got {}",
                    camera_id, threshold
                )));
            }
        }
        if self.preroll_window.is_zero() {
            return Err(Error::Config("preroll_window must be positive".into()));
        }
        if self.max_fps == 0 {
            return Err(Error::Config("max_fps must be at least 1".into()));
        }
        if self.dedup_cooldown.is_zero() {
            return Err(Error::Config("dedup_cooldown must be positive".into()));
        }
        if self.pre_margin.is_zero()
            || self.during_margin.is_zero()
            || self.post_margin.is_zero()
        {
            return Err(Error::Config(
                "pre/during/post margins must be positive".into(),
            ));
        }
        if self.post_wait_timeout.is_zero() {
            return Err(Error::Config("post_wait_timeout must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".into()));
        }
        if self.retry_backoff.is_zero() {
            return Err(Error::Config("retry_backoff must be positive".into()));
        }
        Ok(())
    }

    /// Threshold in effect for a camera (override or global)
    pub fn threshold_for(&self, camera_id: &str) -> f64 {
        self.camera_thresholds
            .get(camera_id)
            .copied()
            .unwrap_or(self.score_threshold)
    }

    /// Ring buffer slot allocation per camera
    pub fn buffer_capacity(&self) -> usize {
        (self.preroll_window.as_secs().max(1) as usize) * (self.max_fps as usize)
    }
}

/// Shared, runtime-updatable view of the pipeline configuration
///
/// Stages re-read the values they act on per decision, so updates (e.g. a
/// threshold change) apply to subsequent evaluations without a restart.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<PipelineConfig>>,
}

impl ConfigHandle {
    /// Create a handle, validating the initial configuration
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(config)),
        })
    }

    /// Read access for per-decision lookups
    pub async fn read(&self) -> RwLockReadGuard<'_, PipelineConfig> {
        self.inner.read().await
    }

    /// Cloned snapshot of the current configuration
    pub async fn snapshot(&self) -> PipelineConfig {
        self.inner.read().await.clone()
    }

    /// Replace the configuration after validating the new values
    ///
    /// On validation failure the previous configuration stays in effect.
    pub async fn update(&self, config: PipelineConfig) -> Result<()> {
        config.validate()?;
        let mut current = self.inner.write().await;
        *current = config;
        tracing::info!(
            threshold = current.score_threshold,
            cooldown_secs = current.dedup_cooldown.as_secs(),
            queue_capacity = current.queue_capacity,
            "Pipeline configuration updated"
        );
        Ok(())
    }

    /// Update only the global score threshold
    pub async fn set_threshold(&self, threshold: f64) -> Result<()> {
        let mut config = self.snapshot().await;
        config.score_threshold = threshold;
        self.update(config).await
    }
}

/// Load the camera inventory from a JSON file
pub async fn load_cameras(path: &Path) -> Result<Vec<CameraSpec>> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Config(format!("cannot read camera inventory {}: {}", path.display(), e))
    })?;
    let cameras: Vec<CameraSpec> = serde_json::from_str(&raw)?;
    for camera in &cameras {
        if camera.camera_id.is_empty() {
            return Err(Error::Config("camera inventory entry with empty camera_id".into()));
        }
        if let Some(threshold) = camera.threshold_override {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::Config(format!(
                    "threshold override for {} must be within [0, 1], got {}",
                    camera.camera_id, threshold
                )));
            }
        }
    }
    Ok(cameras)
}

/// Binary-level configuration from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory clips are written to
    pub clips_dir: PathBuf,
    /// Camera inventory file (JSON)
    pub cameras_file: PathBuf,
    /// External scoring service URL (built-in demo scorer when unset)
    pub scorer_url: Option<String>,
    /// Clip encoder selection: "concat" or "ffmpeg"
    pub clip_encoder: String,
    /// Clip assembler worker count
    pub worker_count: usize,
    /// Job queue capacity
    pub queue_capacity: usize,
    /// Global score threshold
    pub score_threshold: f64,
    /// Dedup cool-down in seconds
    pub dedup_cooldown_secs: u64,
    /// Pre-roll window in seconds
    pub preroll_window_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            clips_dir: std::env::var("CLIPS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/clipserver/clips")),
            cameras_file: std::env::var("CAMERAS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("cameras.json")),
            scorer_url: std::env::var("SCORER_URL").ok(),
            clip_encoder: std::env::var("CLIP_ENCODER")
                .unwrap_or_else(|_| "concat".to_string()),
            worker_count: std::env::var("CLIP_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            queue_capacity: std::env::var("QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(256),
            score_threshold: std::env::var("SCORE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.6),
            dedup_cooldown_secs: std::env::var("DEDUP_COOLDOWN_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            preroll_window_secs: std::env::var("PREROLL_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}

impl AppConfig {
    /// Build the pipeline configuration, folding in camera overrides
    pub fn pipeline_config(&self, cameras: &[CameraSpec]) -> PipelineConfig {
        let camera_thresholds = cameras
            .iter()
            .filter_map(|c| c.threshold_override.map(|t| (c.camera_id.clone(), t)))
            .collect();
        PipelineConfig {
            preroll_window: Duration::from_secs(self.preroll_window_secs),
            score_threshold: self.score_threshold,
            camera_thresholds,
            dedup_cooldown: Duration::from_secs(self.dedup_cooldown_secs),
            queue_capacity: self.queue_capacity,
            worker_count: self.worker_count,
            clips_dir: self.clips_dir.clone(),
            ..PipelineConfig::default()
        }
    }
}
