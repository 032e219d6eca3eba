//! End-to-end pipeline tests
//!
//! Drives the assembled pipeline with synthetic timestamped frames and
//! scripted scores, then asserts on the produced evidence, the queue
//! accounting, and the hub event stream.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use clipserver::clip_assembler::encoder::SegmentConcatEncoder;
use clipserver::config::{CameraSpec, PipelineConfig};
use clipserver::evidence_sink::MemoryEvidenceSink;
use clipserver::pipeline::IngestOutcome;
use clipserver::pipeline_hub::PipelineEvent;
use clipserver::scorer::{Scorer, SequenceScorer};
use clipserver::types::Frame;
use clipserver::Pipeline;
use std::sync::Arc;
use std::time::Duration;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

fn test_config(clips_dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        post_wait_timeout: Duration::from_millis(500),
        retry_backoff: Duration::from_millis(10),
        clips_dir: clips_dir.to_path_buf(),
        ..PipelineConfig::default()
    }
}

fn camera(camera_id: &str, zone: &str, event_type: &str) -> CameraSpec {
    CameraSpec {
        camera_id: camera_id.to_string(),
        name: format!("{} camera", camera_id),
        zone: zone.to_string(),
        event_type: event_type.to_string(),
        threshold_override: None,
    }
}

fn frame(camera_id: &str, sequence: u64, offset_secs: i64) -> Frame {
    Frame::new(
        camera_id,
        sequence,
        base_time() + chrono::Duration::seconds(offset_secs),
        Bytes::from_static(b"synthetic-segment"),
    )
}

fn build_pipeline(
    config: PipelineConfig,
    cameras: &[CameraSpec],
    scorer: Arc<dyn Scorer>,
) -> (Pipeline, Arc<MemoryEvidenceSink>) {
    let sink = Arc::new(MemoryEvidenceSink::new());
    let pipeline = Pipeline::new(
        config,
        cameras,
        scorer,
        Arc::new(SegmentConcatEncoder::new()),
        sink.clone(),
    )
    .unwrap();
    (pipeline, sink)
}

/// A detection burst within one cool-down window yields exactly one clip:
/// scores 0.3 / 0.7 / 0.8 / 0.4 against threshold 0.6 produce candidates at
/// t=1 and t=2, and only the first is accepted.
#[tokio::test]
async fn test_detection_burst_produces_single_clip() {
    let dir = tempfile::tempdir().unwrap();
    let scores = vec![0.3, 0.7, 0.8, 0.4, 0.1, 0.1, 0.1];
    let (pipeline, sink) = build_pipeline(
        test_config(dir.path()),
        &[camera("cam1", "entrance", "suspicious")],
        Arc::new(SequenceScorer::new(scores)),
    );

    let mut outcomes = Vec::new();
    for t in 0..7 {
        let outcome = pipeline
            .ingest_frame(frame("cam1", t as u64, t), "entrance", "suspicious")
            .await
            .unwrap();
        outcomes.push(outcome);
    }

    assert_eq!(outcomes[0], IngestOutcome::Buffered);
    assert!(matches!(outcomes[1], IngestOutcome::Enqueued(_)));
    assert_eq!(outcomes[2], IngestOutcome::Suppressed);
    assert!(outcomes[3..]
        .iter()
        .all(|o| *o == IngestOutcome::Buffered));

    pipeline.spawn_workers().await;
    pipeline.shutdown().await;

    let records = sink.records().await;
    assert_eq!(records.len(), 1, "exactly one clip for the burst");
    let record = &records[0];
    assert_eq!(record.event_key, "cam1|entrance|suspicious");
    assert_eq!(record.score, 0.7, "the first accepted candidate wins");
    assert_eq!(record.event_start, base_time() + chrono::Duration::seconds(1));
    assert!(!record.partial);
    // Clip range is [-1s, +5s] around the event; frames cover 0..=5
    assert_eq!(record.frame_count, 6);
    assert!(std::path::Path::new(&record.clip_path).exists());

    let counters = pipeline.hub().counters().snapshot();
    assert_eq!(counters.frames_ingested, 7);
    assert_eq!(counters.candidates_accepted, 1);
    assert_eq!(counters.candidates_suppressed, 1);
    assert_eq!(counters.clips_completed, 1);
    assert_eq!(counters.clips_abandoned, 0);
}

/// A replayed frame from far in the past earns no second clip: the buffer
/// refuses it, and the dedup anchor never moves backwards, so a frame one
/// second after the acceptance is still inside the cool-down.
#[tokio::test]
async fn test_stale_frame_cannot_reopen_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _sink) = build_pipeline(
        test_config(dir.path()),
        &[camera("cam1", "entrance", "intrusion")],
        Arc::new(SequenceScorer::new(vec![0.9])),
    );

    let mut accepted = 0;
    for (sequence, offset) in [(0u64, 0i64), (1, -400), (2, 1)] {
        let outcome = pipeline
            .ingest_frame(frame("cam1", sequence, offset), "entrance", "intrusion")
            .await
            .unwrap();
        if matches!(outcome, IngestOutcome::Enqueued(_)) {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1, "one acceptance per cool-down window");
    assert_eq!(pipeline.queue_stats().await.depth, 1);
    assert_eq!(pipeline.hub().counters().snapshot().candidates_accepted, 1);
}

/// Queue at capacity 2 with drop-oldest: a third accepted event displaces
/// the first, the displacement is counted and announced, newer jobs stay.
#[tokio::test]
async fn test_queue_backpressure_drops_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        queue_capacity: 2,
        ..test_config(dir.path())
    };
    let cameras = vec![
        camera("cam-a", "entrance", "intrusion"),
        camera("cam-b", "dock", "intrusion"),
        camera("cam-c", "yard", "intrusion"),
    ];
    let (pipeline, _sink) = build_pipeline(
        config,
        &cameras,
        Arc::new(SequenceScorer::new(vec![0.9])),
    );

    let (_id, mut events) = pipeline.hub().subscribe().await;

    // No workers running: three accepted events against capacity 2
    let mut job_ids = Vec::new();
    for spec in &cameras {
        let outcome = pipeline
            .ingest_frame(frame(&spec.camera_id, 0, 0), &spec.zone, &spec.event_type)
            .await
            .unwrap();
        match outcome {
            IngestOutcome::Enqueued(id) => job_ids.push(id),
            other => panic!("expected enqueue, got {:?}", other),
        }
    }

    let stats = pipeline.queue_stats().await;
    assert_eq!(stats.enqueued, 3);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.depth, 2);
    assert!(stats.enqueued >= stats.dequeued + stats.dropped);

    // The displaced job is the first one, and the drop is announced
    let mut dropped = Vec::new();
    let mut enqueued = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            PipelineEvent::JobDropped(message) => dropped.push(message),
            PipelineEvent::JobEnqueued(_) => enqueued += 1,
            _ => {}
        }
    }
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].job_id, job_ids[0].to_string());
    assert_eq!(dropped[0].policy, "drop_oldest");
    assert_eq!(enqueued, 3);
}

/// Threshold updates apply to subsequent evaluations without a restart.
#[tokio::test]
async fn test_threshold_update_applies_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cameras = vec![
        camera("cam-a", "entrance", "intrusion"),
        camera("cam-b", "dock", "intrusion"),
    ];
    let (pipeline, _sink) = build_pipeline(
        test_config(dir.path()),
        &cameras,
        Arc::new(SequenceScorer::new(vec![0.7])),
    );

    let outcome = pipeline
        .ingest_frame(frame("cam-a", 0, 0), "entrance", "intrusion")
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Enqueued(_)));

    pipeline.config().set_threshold(0.8).await.unwrap();

    let outcome = pipeline
        .ingest_frame(frame("cam-b", 0, 0), "dock", "intrusion")
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Buffered);
}

/// A camera that comes online at the event itself still yields evidence,
/// flagged partial because the pre-roll no longer exists.
#[tokio::test]
async fn test_missing_preroll_yields_partial_clip() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, sink) = build_pipeline(
        test_config(dir.path()),
        &[camera("cam1", "entrance", "intrusion")],
        Arc::new(SequenceScorer::new(vec![0.9, 0.1, 0.1, 0.1, 0.1, 0.1])),
    );

    // First ever frame triggers the detection; no pre-roll exists
    for t in 0..6 {
        pipeline
            .ingest_frame(frame("cam1", t as u64, t), "entrance", "intrusion")
            .await
            .unwrap();
    }

    pipeline.spawn_workers().await;
    pipeline.shutdown().await;

    let records = sink.records().await;
    assert_eq!(records.len(), 1);
    assert!(records[0].partial);
    // Only frames from the event onward: 0..=4 inside [-2s, +4s]
    assert_eq!(records[0].frame_count, 5);

    let counters = pipeline.hub().counters().snapshot();
    assert_eq!(counters.clips_completed, 1);
    assert_eq!(counters.clips_partial, 1);
}

/// Shutdown drains queued jobs before stopping the workers.
#[tokio::test]
async fn test_shutdown_drains_inflight_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, sink) = build_pipeline(
        test_config(dir.path()),
        &[camera("cam1", "entrance", "intrusion")],
        Arc::new(SequenceScorer::new(vec![
            0.1, 0.1, 0.1, 0.9, 0.1, 0.1, 0.1, 0.1,
        ])),
    );

    // Full coverage available before workers ever start
    for t in 0..8 {
        pipeline
            .ingest_frame(frame("cam1", t as u64, t), "entrance", "intrusion")
            .await
            .unwrap();
    }
    assert_eq!(pipeline.queue_stats().await.depth, 1);

    pipeline.spawn_workers().await;
    pipeline.shutdown().await;

    let records = sink.records().await;
    assert_eq!(records.len(), 1);
    assert!(!records[0].partial);

    let stats = pipeline.queue_stats().await;
    assert_eq!(stats.dequeued, 1);
    assert_eq!(stats.depth, 0);
}
