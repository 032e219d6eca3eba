//! EvidenceSink - Downstream evidence handoff boundary
//!
//! ## Responsibilities
//!
//! - Hand finished clips and their metadata records to the persistence layer
//! - Keep the pipeline ignorant of where evidence actually lands
//!
//! The object store / database behind this boundary is an external
//! collaborator. `JsonlEvidenceSink` writes an append-only metadata index
//! next to the clip files; `MemoryEvidenceSink` collects records for tests
//! and bring-up.

use crate::error::{Error, Result};
use crate::types::{Clip, ClipJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Metadata record handed off with every clip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Dedup key of the accepted event
    pub event_key: String,
    pub camera_id: String,
    /// Human-readable camera name from the inventory
    pub camera_name: String,
    pub zone: String,
    pub event_type: String,
    /// Score of the accepted candidate
    pub score: f64,
    pub event_start: DateTime<Utc>,
    pub event_end: DateTime<Utc>,
    /// Clip artifact location
    pub clip_path: String,
    /// Timestamp of the first frame in the clip
    pub clip_start: DateTime<Utc>,
    /// Timestamp of the last frame in the clip
    pub clip_end: DateTime<Utc>,
    pub frame_count: usize,
    /// True when the clip covers the requested range only partially
    pub partial: bool,
    pub created_at: DateTime<Utc>,
}

impl EvidenceRecord {
    /// Build the record for a finished clip
    pub fn new(job: &ClipJob, clip: &Clip, camera_name: &str) -> Self {
        Self {
            event_key: job.key().to_string(),
            camera_id: job.camera_id.clone(),
            camera_name: camera_name.to_string(),
            zone: job.zone.clone(),
            event_type: job.event_type.clone(),
            score: job.score,
            event_start: job.event_start,
            event_end: job.event_end,
            clip_path: clip.path.display().to_string(),
            clip_start: clip.start,
            clip_end: clip.end,
            frame_count: clip.frame_count,
            partial: clip.partial,
            created_at: Utc::now(),
        }
    }
}

/// Evidence handoff boundary
#[async_trait]
pub trait EvidenceSink: Send + Sync {
    /// Publish one clip with its metadata record
    async fn publish(&self, clip: &Clip, record: &EvidenceRecord) -> Result<()>;
}

/// Appends records as JSON lines to an index file beside the clips
pub struct JsonlEvidenceSink {
    index_path: PathBuf,
}

impl JsonlEvidenceSink {
    /// Create a sink writing `evidence.jsonl` under the given directory
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            index_path: dir.as_ref().join("evidence.jsonl"),
        }
    }
}

#[async_trait]
impl EvidenceSink for JsonlEvidenceSink {
    async fn publish(&self, clip: &Clip, record: &EvidenceRecord) -> Result<()> {
        if let Some(parent) = self.index_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.index_path)
            .await
            .map_err(|e| {
                Error::Sink(format!(
                    "cannot open evidence index {}: {}",
                    self.index_path.display(),
                    e
                ))
            })?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::info!(
            camera_id = %clip.camera_id,
            event_key = %record.event_key,
            clip_path = %record.clip_path,
            partial = clip.partial,
            "Evidence published"
        );
        Ok(())
    }
}

/// Collects records in memory
pub struct MemoryEvidenceSink {
    records: Mutex<Vec<EvidenceRecord>>,
}

impl MemoryEvidenceSink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// All records published so far
    pub async fn records(&self) -> Vec<EvidenceRecord> {
        self.records.lock().await.clone()
    }
}

impl Default for MemoryEvidenceSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EvidenceSink for MemoryEvidenceSink {
    async fn publish(&self, _clip: &Clip, record: &EvidenceRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}
