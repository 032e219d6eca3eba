//! Scorer - External classifier boundary
//!
//! The scoring model is an external collaborator. The pipeline only depends
//! on this trait: hand in a frame, get back a score in [0, 1]. `HttpScorer`
//! adapts a remote inference service; `SequenceScorer` replays a scripted
//! score pattern for bring-up and tests.

use crate::error::{Error, Result};
use crate::types::Frame;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Default request timeout for the HTTP scorer
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Classifier boundary
///
/// Implementations must be pure with respect to pipeline state: same frame,
/// same score, no side effects the pipeline can observe.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score one frame, bounded to [0, 1]
    async fn score(&self, frame: &Frame) -> Result<f64>;
}

/// Response body of the remote scoring service
#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
}

/// HTTP adapter for a remote scoring service
pub struct HttpScorer {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl HttpScorer {
    /// Create a scorer for the given service base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT_SECS)
    }

    /// Create with an explicit request timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            max_retries: 3,
        })
    }

    /// Send the frame, retrying transient failures with exponential backoff
    ///
    /// The multipart form cannot be reused after a send, so it is rebuilt
    /// per attempt from the reference-counted payload.
    async fn send_with_retry(&self, frame: &Frame) -> Result<reqwest::Response> {
        let url = format!("{}/v1/score", self.base_url);
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }

            let part = reqwest::multipart::Part::bytes(frame.payload.to_vec())
                .file_name("frame.jpg")
                .mime_str("image/jpeg")
                .map_err(|e| Error::Scorer(format!("invalid mime type: {}", e)))?;
            let form = reqwest::multipart::Form::new()
                .part("infer_image", part)
                .text("camera_id", frame.camera_id.clone())
                .text("captured_at", frame.timestamp.to_rfc3339());

            match self.client.post(&url).multipart(form).send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    tracing::warn!(
                        camera_id = %frame.camera_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Scorer request failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .map(Error::from)
            .unwrap_or_else(|| Error::Scorer("request failed after retries".to_string())))
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn score(&self, frame: &Frame) -> Result<f64> {
        let resp = self.send_with_retry(frame).await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Scorer(format!(
                "scoring service returned {}: {}",
                status, body
            )));
        }

        let result: ScoreResponse = resp.json().await?;
        Ok(result.score)
    }
}

/// Scripted scorer replaying a fixed pattern, cycling when exhausted
///
/// Used by the synthetic bring-up feed and by tests that need a
/// deterministic detection sequence.
pub struct SequenceScorer {
    scores: Vec<f64>,
    next: AtomicUsize,
}

impl SequenceScorer {
    /// Create a scorer cycling through `scores`
    pub fn new(scores: Vec<f64>) -> Self {
        Self {
            scores,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Scorer for SequenceScorer {
    async fn score(&self, _frame: &Frame) -> Result<f64> {
        if self.scores.is_empty() {
            return Err(Error::Scorer("empty score sequence".to_string()));
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.scores.len();
        Ok(self.scores[index])
    }
}
