//! ClipAssembler - Evidence clip worker pool
//!
//! ## Responsibilities
//!
//! - Consume clip jobs from the bounded queue with a fixed worker pool
//! - Wait (bounded) for post-event footage to land in the pre-roll buffer
//! - Snapshot the event range and stitch frames into a clip artifact
//! - Degrade to partial clips when retention already lost part of the range
//! - Retry transient encode/publish failures with backoff, then abandon
//!
//! A worker failure never takes down the pool: every job ends in exactly one
//! of clip-completed, clip-completed-partial, or clip-abandoned, each visible
//! on the hub.

pub mod encoder;

use crate::config::ConfigHandle;
use crate::error::{Error, Result};
use crate::evidence_sink::{EvidenceRecord, EvidenceSink};
use crate::job_queue::ClipJobQueue;
use crate::pipeline_hub::{
    ClipAbandonedMessage, ClipCompletedMessage, PipelineEvent, PipelineHub,
};
use crate::preroll_buffer::{PrerollBuffer, PrerollBuffers};
use crate::types::{Clip, ClipJob, Frame};
use chrono::{DateTime, Utc};
use encoder::ClipEncoder;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Cadence for checking whether post-event footage has arrived
const POST_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Coverage tolerance when the snapshot is too small to measure frame gaps
const FALLBACK_FRAME_INTERVAL_MS: i64 = 1000;

/// Clip assembly worker pool
pub struct ClipAssembler {
    config: ConfigHandle,
    buffers: Arc<PrerollBuffers>,
    queue: Arc<ClipJobQueue>,
    encoder: Arc<dyn ClipEncoder>,
    sink: Arc<dyn EvidenceSink>,
    hub: Arc<PipelineHub>,
    /// camera_id -> display name from the inventory
    camera_names: HashMap<String, String>,
}

impl ClipAssembler {
    /// Create the pool (workers start with `spawn_workers`)
    pub fn new(
        config: ConfigHandle,
        buffers: Arc<PrerollBuffers>,
        queue: Arc<ClipJobQueue>,
        encoder: Arc<dyn ClipEncoder>,
        sink: Arc<dyn EvidenceSink>,
        hub: Arc<PipelineHub>,
        camera_names: HashMap<String, String>,
    ) -> Self {
        Self {
            config,
            buffers,
            queue,
            encoder,
            sink,
            hub,
            camera_names,
        }
    }

    /// Start the configured number of workers
    ///
    /// Workers run until the queue is closed and drained.
    pub async fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let worker_count = self.config.read().await.worker_count;
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let assembler = self.clone();
            handles.push(tokio::spawn(async move {
                assembler.worker_loop(worker_id).await;
            }));
        }
        tracing::info!(workers = worker_count, "Clip assembler workers started");
        handles
    }

    async fn worker_loop(&self, worker_id: usize) {
        tracing::debug!(worker_id = worker_id, "Clip worker running");
        while let Some(job) = self.queue.dequeue().await {
            self.hub.counters().inc_jobs_dequeued();
            self.process_job(job).await;
        }
        tracing::debug!(worker_id = worker_id, "Clip worker stopped");
    }

    /// Run one job to a terminal state
    async fn process_job(&self, job: ClipJob) {
        let (pre_margin, post_margin, post_wait_timeout, retry_limit, retry_backoff, clips_dir) = {
            let config = self.config.read().await;
            (
                chrono::Duration::from_std(config.pre_margin)
                    .unwrap_or(chrono::Duration::zero()),
                chrono::Duration::from_std(config.post_margin)
                    .unwrap_or(chrono::Duration::zero()),
                config.post_wait_timeout,
                config.retry_limit,
                config.retry_backoff,
                config.clips_dir.clone(),
            )
        };

        let clip_start = job.event_start - pre_margin;
        let clip_end = job.event_end + post_margin;

        tracing::debug!(
            job_id = %job.job_id,
            camera_id = %job.camera_id,
            clip_start = %clip_start,
            clip_end = %clip_end,
            "Processing clip job"
        );

        let Some(buffer) = self.buffers.get(&job.camera_id).await else {
            self.abandon(&job, "pre-roll buffer released before assembly", 0)
                .await;
            return;
        };

        self.wait_for_post_footage(&buffer, clip_end, post_wait_timeout)
            .await;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self
                .assemble_once(&job, &buffer, clip_start, clip_end, &clips_dir)
                .await
            {
                Ok(clip) => {
                    self.report_completed(&job, &clip).await;
                    return;
                }
                Err(e) if attempt <= retry_limit => {
                    let delay = retry_delay(retry_backoff, attempt);
                    tracing::warn!(
                        job_id = %job.job_id,
                        camera_id = %job.camera_id,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Clip assembly failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.abandon(&job, &e.to_string(), attempt).await;
                    return;
                }
            }
        }
    }

    /// Block (bounded) until the buffer has seen footage past the clip end
    ///
    /// Availability is judged by frame timestamps, so replayed streams wait
    /// exactly as long as live ones: until the data exists, not until a wall
    /// clock elapses.
    async fn wait_for_post_footage(
        &self,
        buffer: &PrerollBuffer,
        clip_end: DateTime<Utc>,
        timeout: Duration,
    ) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(newest) = buffer.newest_timestamp().await {
                if newest >= clip_end {
                    return;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    camera_id = %buffer.camera_id(),
                    clip_end = %clip_end,
                    timeout_secs = timeout.as_secs(),
                    "Post-event wait timed out, assembling from retained frames"
                );
                return;
            }
            tokio::time::sleep(POST_WAIT_POLL_INTERVAL).await;
        }
    }

    /// One assembly attempt: snapshot, encode, hand off
    async fn assemble_once(
        &self,
        job: &ClipJob,
        buffer: &PrerollBuffer,
        clip_start: DateTime<Utc>,
        clip_end: DateTime<Utc>,
        clips_dir: &Path,
    ) -> Result<Clip> {
        let frames = buffer.snapshot(clip_start, clip_end).await;
        // An empty snapshot is transient: frames may still be arriving
        let (first, last) = match (frames.first(), frames.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => {
                return Err(Error::Encoder(
                    "no frames retained for clip range".to_string(),
                ))
            }
        };

        let partial = !covers_range(&frames, clip_start, clip_end);
        let path = clips_dir.join(clip_filename(job));

        self.encoder.encode(&frames, &path).await?;

        let clip = Clip {
            camera_id: job.camera_id.clone(),
            path,
            start: first,
            end: last,
            frame_count: frames.len(),
            partial,
            source_job: job.job_id,
        };

        let camera_name = self
            .camera_names
            .get(&job.camera_id)
            .map(String::as_str)
            .unwrap_or(&job.camera_id);
        let record = EvidenceRecord::new(job, &clip, camera_name);
        self.sink.publish(&clip, &record).await?;

        Ok(clip)
    }

    async fn report_completed(&self, job: &ClipJob, clip: &Clip) {
        tracing::info!(
            job_id = %job.job_id,
            camera_id = %clip.camera_id,
            path = %clip.path.display(),
            frames = clip.frame_count,
            partial = clip.partial,
            "Clip completed"
        );

        let message = ClipCompletedMessage {
            job_id: job.job_id.to_string(),
            camera_id: clip.camera_id.clone(),
            path: clip.path.display().to_string(),
            start: clip.start.to_rfc3339(),
            end: clip.end.to_rfc3339(),
            frame_count: clip.frame_count,
        };
        let event = if clip.partial {
            PipelineEvent::ClipCompletedPartial(message)
        } else {
            PipelineEvent::ClipCompleted(message)
        };
        self.hub.publish(event).await;
    }

    async fn abandon(&self, job: &ClipJob, reason: &str, attempts: u32) {
        tracing::error!(
            job_id = %job.job_id,
            camera_id = %job.camera_id,
            attempts = attempts,
            reason = %reason,
            "Abandoning clip job"
        );
        self.hub
            .publish(PipelineEvent::ClipAbandoned(ClipAbandonedMessage {
                job_id: job.job_id.to_string(),
                camera_id: job.camera_id.clone(),
                reason: reason.to_string(),
                attempts,
            }))
            .await;
    }
}

/// Backoff before retry `attempt`, doubling from `base`
///
/// The exponent is capped so a misconfigured retry limit cannot overflow
/// the shift. Attempts count from 1.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1).min(16)))
}

/// Clip artifact filename: camera, event time, job id prefix
fn clip_filename(job: &ClipJob) -> String {
    let stamp = job.event_start.format("%Y%m%d_%H%M%S");
    let id = job.job_id.simple().to_string();
    format!("{}_{}_{}.mp4", job.camera_id, stamp, &id[..8])
}

/// Whether the snapshot reaches both requested edges
///
/// Tolerance is the median observed inter-frame gap, so a 1 fps stream is
/// judged by 1 s slack and a 30 fps stream by 33 ms.
fn covers_range(frames: &[Frame], clip_start: DateTime<Utc>, clip_end: DateTime<Utc>) -> bool {
    let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
        return false;
    };
    let tolerance = frame_interval(frames);
    first.timestamp - clip_start <= tolerance && clip_end - last.timestamp <= tolerance
}

/// Median gap between consecutive frames
fn frame_interval(frames: &[Frame]) -> chrono::Duration {
    if frames.len() < 2 {
        return chrono::Duration::milliseconds(FALLBACK_FRAME_INTERVAL_MS);
    }
    let mut gaps: Vec<i64> = frames
        .windows(2)
        .map(|pair| {
            pair[1]
                .timestamp
                .signed_duration_since(pair[0].timestamp)
                .num_milliseconds()
        })
        .collect();
    gaps.sort_unstable();
    chrono::Duration::milliseconds(gaps[gaps.len() / 2])
}
