//! Clipserver Library
//!
//! Multi-camera event detection and evidence clip pipeline
//!
//! ## Architecture (9 Components)
//!
//! 1. PrerollBuffer - Per-camera pre-roll ring buffer (timestamp-windowed)
//! 2. Scorer - External classifier boundary
//! 3. ScoreGate - Detection threshold gate
//! 4. DedupEngine - Time-windowed event deduplication
//! 5. ClipJobQueue - Bounded job queue with explicit backpressure
//! 6. ClipAssembler - Evidence clip worker pool
//! 7. EvidenceSink - Downstream evidence handoff boundary
//! 8. PipelineHub - Observability events and counters
//! 9. Pipeline - Component wiring and the ingestion path
//!
//! ## Design Principles
//!
//! - Timestamps decide: every windowing decision follows frame and event
//!   timestamps, never wall-clock call order
//! - The real-time ingestion path never blocks on evidence I/O
//! - Degrade instead of fail: lost footage yields flagged partial clips

pub mod config;
pub mod types;
pub mod scorer;
pub mod preroll_buffer;
pub mod score_gate;
pub mod dedup_engine;
pub mod job_queue;
pub mod clip_assembler;
pub mod evidence_sink;
pub mod pipeline_hub;
pub mod pipeline;
pub mod error;

pub use error::{Error, Result};
pub use pipeline::{IngestOutcome, Pipeline};
