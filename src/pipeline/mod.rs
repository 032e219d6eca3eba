//! Pipeline - Component wiring and the per-camera ingestion path
//!
//! ## Responsibilities
//!
//! - Own the assembled component graph (buffers, gate, dedup, queue, workers)
//! - Run the ingestion path: buffer push, scoring, gating, dedup, enqueue
//! - Camera lifecycle (buffer teardown) and graceful shutdown
//!
//! Frame acquisition stays outside: callers push frames per camera from
//! their own tasks. A scorer failure is isolated to the frame it scored;
//! the frame still lands in the pre-roll buffer so a later detection can
//! include it as context.

use crate::clip_assembler::encoder::ClipEncoder;
use crate::clip_assembler::ClipAssembler;
use crate::config::{CameraSpec, ConfigHandle, PipelineConfig};
use crate::dedup_engine::{Admission, DedupEngine};
use crate::error::Result;
use crate::evidence_sink::EvidenceSink;
use crate::job_queue::{ClipJobQueue, EnqueueOutcome, QueueStats};
use crate::pipeline_hub::{
    CandidateAcceptedMessage, CandidateSuppressedMessage, JobDroppedMessage,
    JobEnqueuedMessage, PipelineEvent, PipelineHub,
};
use crate::preroll_buffer::PrerollBuffers;
use crate::score_gate::ScoreGate;
use crate::scorer::Scorer;
use crate::types::Frame;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// What happened to one ingested frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Frame retained in the pre-roll buffer, no candidate produced
    Buffered,
    /// Out-of-order frame discarded by the pre-roll buffer, no candidacy
    Dropped,
    /// Candidate suppressed by the dedup cool-down
    Suppressed,
    /// Clip job admitted to the queue
    Enqueued(Uuid),
    /// Clip job refused by the backpressure policy
    Rejected(Uuid),
}

/// The assembled detection and evidence pipeline
pub struct Pipeline {
    config: ConfigHandle,
    buffers: Arc<PrerollBuffers>,
    gate: ScoreGate,
    dedup: DedupEngine,
    queue: Arc<ClipJobQueue>,
    assembler: Arc<ClipAssembler>,
    hub: Arc<PipelineHub>,
    scorer: Arc<dyn Scorer>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Wire up the pipeline from validated configuration
    ///
    /// Structural values (window size, queue capacity, worker count) are
    /// fixed here; thresholds and margins are re-read at each decision.
    pub fn new(
        config: PipelineConfig,
        cameras: &[CameraSpec],
        scorer: Arc<dyn Scorer>,
        encoder: Arc<dyn ClipEncoder>,
        sink: Arc<dyn EvidenceSink>,
    ) -> Result<Self> {
        let handle = ConfigHandle::new(config.clone())?;

        let buffers = Arc::new(PrerollBuffers::new(
            config.preroll_window,
            config.buffer_capacity(),
        ));
        let queue = Arc::new(ClipJobQueue::new(
            config.queue_capacity,
            config.backpressure,
        ));
        let hub = Arc::new(PipelineHub::new());

        let camera_names = cameras
            .iter()
            .map(|c| (c.camera_id.clone(), c.name.clone()))
            .collect();
        let assembler = Arc::new(ClipAssembler::new(
            handle.clone(),
            buffers.clone(),
            queue.clone(),
            encoder,
            sink,
            hub.clone(),
            camera_names,
        ));

        Ok(Self {
            gate: ScoreGate::new(handle.clone()),
            dedup: DedupEngine::new(handle.clone()),
            config: handle,
            buffers,
            queue,
            assembler,
            hub,
            scorer,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Start the clip assembler worker pool
    pub async fn spawn_workers(&self) {
        let handles = self.assembler.spawn_workers().await;
        self.workers.lock().await.extend(handles);
    }

    /// Ingest one frame for a camera
    ///
    /// Runs inline in the caller's task: buffer push, scoring, gate, dedup,
    /// enqueue. Scorer failures drop the frame's candidacy with a warning
    /// and nothing else; the error never crosses to other cameras.
    pub async fn ingest_frame(
        &self,
        frame: Frame,
        zone: &str,
        event_type: &str,
    ) -> Result<IngestOutcome> {
        self.hub.counters().inc_frames_ingested();

        // A frame the buffer refuses carries a stale timestamp; letting it
        // through would hand the gate and dedup a detection from the past
        let buffer = self.buffers.get_or_create(&frame.camera_id).await;
        if !buffer.push(frame.clone()).await {
            return Ok(IngestOutcome::Dropped);
        }

        let score = match self.scorer.score(&frame).await {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!(
                    camera_id = %frame.camera_id,
                    sequence = frame.sequence,
                    error = %e,
                    "Scorer failed, frame kept without candidacy"
                );
                return Ok(IngestOutcome::Buffered);
            }
        };

        let Some(candidate) = self.gate.evaluate(&frame, zone, event_type, score).await else {
            return Ok(IngestOutcome::Buffered);
        };

        let candidate_score = candidate.score;
        let detected_at = candidate.detected_at;

        match self.dedup.admit(candidate).await {
            Admission::Suppressed { key, since_last } => {
                self.hub
                    .publish(PipelineEvent::CandidateSuppressed(
                        CandidateSuppressedMessage {
                            key: key.to_string(),
                            score: candidate_score,
                            detected_at: detected_at.to_rfc3339(),
                            since_last_secs: since_last.num_seconds(),
                        },
                    ))
                    .await;
                Ok(IngestOutcome::Suppressed)
            }
            Admission::Accepted(job) => {
                self.hub
                    .publish(PipelineEvent::CandidateAccepted(CandidateAcceptedMessage {
                        key: job.key().to_string(),
                        job_id: job.job_id.to_string(),
                        camera_id: job.camera_id.clone(),
                        zone: job.zone.clone(),
                        event_type: job.event_type.clone(),
                        score: job.score,
                        detected_at: detected_at.to_rfc3339(),
                    }))
                    .await;

                let job_id = job.job_id;
                let key = job.key();
                match self.queue.enqueue(job).await? {
                    EnqueueOutcome::Enqueued { depth } => {
                        self.hub
                            .publish(PipelineEvent::JobEnqueued(JobEnqueuedMessage {
                                job_id: job_id.to_string(),
                                key: key.to_string(),
                                depth,
                            }))
                            .await;
                        Ok(IngestOutcome::Enqueued(job_id))
                    }
                    EnqueueOutcome::DisplacedOldest { displaced } => {
                        let policy = self.config.read().await.backpressure;
                        self.hub
                            .publish(PipelineEvent::JobDropped(JobDroppedMessage {
                                job_id: displaced.job_id.to_string(),
                                key: displaced.key().to_string(),
                                policy: policy.to_string(),
                                enqueued_at: displaced.enqueued_at.to_rfc3339(),
                            }))
                            .await;
                        let depth = self.queue.depth().await;
                        self.hub
                            .publish(PipelineEvent::JobEnqueued(JobEnqueuedMessage {
                                job_id: job_id.to_string(),
                                key: key.to_string(),
                                depth,
                            }))
                            .await;
                        Ok(IngestOutcome::Enqueued(job_id))
                    }
                    EnqueueOutcome::Rejected => {
                        let policy = self.config.read().await.backpressure;
                        self.hub
                            .publish(PipelineEvent::JobDropped(JobDroppedMessage {
                                job_id: job_id.to_string(),
                                key: key.to_string(),
                                policy: policy.to_string(),
                                enqueued_at: Utc::now().to_rfc3339(),
                            }))
                            .await;
                        Ok(IngestOutcome::Rejected(job_id))
                    }
                }
            }
        }
    }

    /// Tear down a camera's pre-roll buffer
    ///
    /// In-flight clip jobs keep their buffer reference and finish with
    /// whatever was captured.
    pub async fn release_camera(&self, camera_id: &str) -> bool {
        self.buffers.release(camera_id).await
    }

    /// Purge dedup keys that have been cold for several cool-down windows
    pub async fn purge_dedup(&self, now: DateTime<Utc>) -> usize {
        self.dedup.purge_stale(now).await
    }

    /// Close the queue and wait for workers to drain it
    ///
    /// Jobs already queued run to completion; nothing is force-cancelled.
    pub async fn shutdown(&self) {
        tracing::info!("Pipeline shutting down");
        self.queue.close();
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Clip worker panicked during shutdown");
            }
        }
        tracing::info!("Pipeline shut down");
    }

    /// Shared configuration handle for runtime updates
    pub fn config(&self) -> ConfigHandle {
        self.config.clone()
    }

    /// Observability hub
    pub fn hub(&self) -> Arc<PipelineHub> {
        self.hub.clone()
    }

    /// Queue counters
    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// Number of cameras with live buffers
    pub async fn camera_count(&self) -> usize {
        self.buffers.camera_count().await
    }
}
