//! Clipserver - Multi-camera event detection and evidence pipeline
//!
//! Main entry point. Wires the pipeline, starts the maintenance tasks, and
//! runs a synthetic per-camera bring-up feed until a real acquisition layer
//! pushes frames through the library API.

use clipserver::{
    clip_assembler::encoder::{ClipEncoder, FfmpegClipEncoder, SegmentConcatEncoder},
    config::{load_cameras, AppConfig, CameraSpec},
    evidence_sink::JsonlEvidenceSink,
    pipeline::Pipeline,
    scorer::{HttpScorer, Scorer, SequenceScorer},
    types::Frame,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Score pattern replayed by the bring-up feed: one detection burst per
/// cycle, everything else background noise
const BRING_UP_SCORES: [f64; 8] = [0.30, 0.70, 0.80, 0.40, 0.20, 0.10, 0.35, 0.15];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipserver=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Clipserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        clips_dir = %config.clips_dir.display(),
        cameras_file = %config.cameras_file.display(),
        scorer_url = config.scorer_url.as_deref().unwrap_or("(built-in)"),
        workers = config.worker_count,
        queue_capacity = config.queue_capacity,
        "Configuration loaded"
    );

    // Camera inventory
    let cameras = match load_cameras(&config.cameras_file).await {
        Ok(cameras) => cameras,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Camera inventory not loaded, using bring-up inventory"
            );
            bring_up_inventory()
        }
    };
    tracing::info!(cameras = cameras.len(), "Camera inventory ready");

    tokio::fs::create_dir_all(&config.clips_dir).await?;

    // Pipeline components
    let scorer: Arc<dyn Scorer> = match &config.scorer_url {
        Some(url) => {
            tracing::info!(url = %url, "Using remote scoring service");
            Arc::new(HttpScorer::new(url.clone())?)
        }
        None => {
            tracing::info!("Using built-in sequence scorer (bring-up mode)");
            Arc::new(SequenceScorer::new(BRING_UP_SCORES.to_vec()))
        }
    };

    let encoder: Arc<dyn ClipEncoder> = match config.clip_encoder.as_str() {
        "ffmpeg" => {
            tracing::info!("Clips will be remuxed to MP4 via ffmpeg");
            Arc::new(FfmpegClipEncoder::new())
        }
        _ => Arc::new(SegmentConcatEncoder::new()),
    };

    let sink = Arc::new(JsonlEvidenceSink::new(&config.clips_dir));

    let pipeline_config = config.pipeline_config(&cameras);
    let pipeline = Arc::new(Pipeline::new(
        pipeline_config,
        &cameras,
        scorer,
        encoder,
        sink,
    )?);
    pipeline.spawn_workers().await;
    tracing::info!("Pipeline initialized");

    // Dedup maintenance sweep
    {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let purged = pipeline.purge_dedup(Utc::now()).await;
                if purged > 0 {
                    tracing::debug!(purged = purged, "Dedup maintenance sweep");
                }
            }
        });
    }

    // Periodic counters report
    {
        let hub = pipeline.hub();
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let counters = hub.counters().snapshot();
                let queue = pipeline.queue_stats().await;
                tracing::info!(
                    frames = counters.frames_ingested,
                    accepted = counters.candidates_accepted,
                    suppressed = counters.candidates_suppressed,
                    queue_depth = queue.depth,
                    dropped = counters.jobs_dropped,
                    clips = counters.clips_completed,
                    partial = counters.clips_partial,
                    abandoned = counters.clips_abandoned,
                    "Pipeline counters"
                );
            }
        });
    }

    // Event stream to the debug log
    {
        let hub = pipeline.hub();
        tokio::spawn(async move {
            let (_id, mut events) = hub.subscribe().await;
            while let Some(event) = events.recv().await {
                if let Ok(json) = serde_json::to_string(&event) {
                    tracing::debug!(event = %json, "Pipeline event");
                }
            }
        });
    }

    // Synthetic bring-up feed, one task per camera
    tracing::info!("Synthetic bring-up feed running (1 fps per camera)");
    for camera in &cameras {
        let pipeline = pipeline.clone();
        let camera = camera.clone();
        tokio::spawn(async move {
            feed_camera(pipeline, camera).await;
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    pipeline.shutdown().await;

    Ok(())
}

/// Push synthetic timestamped frames for one camera
async fn feed_camera(pipeline: Arc<Pipeline>, camera: CameraSpec) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut sequence: u64 = 0;
    loop {
        interval.tick().await;
        let frame = Frame::new(
            camera.camera_id.clone(),
            sequence,
            Utc::now(),
            Bytes::from_static(b"synthetic-segment"),
        );
        sequence += 1;

        if let Err(e) = pipeline
            .ingest_frame(frame, &camera.zone, &camera.event_type)
            .await
        {
            tracing::warn!(
                camera_id = %camera.camera_id,
                error = %e,
                "Frame ingestion failed"
            );
        }
    }
}

/// Two-camera inventory used when no inventory file is configured
fn bring_up_inventory() -> Vec<CameraSpec> {
    vec![
        CameraSpec {
            camera_id: "cam-001".to_string(),
            name: "Entrance".to_string(),
            zone: "entrance".to_string(),
            event_type: "intrusion".to_string(),
            threshold_override: None,
        },
        CameraSpec {
            camera_id: "cam-002".to_string(),
            name: "Loading Dock".to_string(),
            zone: "dock".to_string(),
            event_type: "loitering".to_string(),
            threshold_override: Some(0.75),
        },
    ]
}
