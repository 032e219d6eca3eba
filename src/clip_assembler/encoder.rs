//! Clip encoders
//!
//! Frames arrive as self-contained segment payloads, so assembling a clip is
//! concatenation plus, optionally, a container remux. `SegmentConcatEncoder`
//! writes the raw concatenated stream. `FfmpegClipEncoder` pipes that stream
//! through an ffmpeg child process into an MP4 container.

use crate::error::{Error, Result};
use crate::types::Frame;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Default timeout for the ffmpeg remux
const DEFAULT_FFMPEG_TIMEOUT_SECS: u64 = 30;

/// Writes frames, in order, into a single clip artifact
#[async_trait]
pub trait ClipEncoder: Send + Sync {
    /// Encode `frames` (timestamp-ordered, non-empty) into `out_path`
    async fn encode(&self, frames: &[Frame], out_path: &Path) -> Result<()>;
}

/// Concatenates segment payloads directly into the output file
///
/// Valid for self-contained stream segments (MPEG-TS style) where the
/// concatenation is itself a playable stream.
pub struct SegmentConcatEncoder;

impl SegmentConcatEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SegmentConcatEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClipEncoder for SegmentConcatEncoder {
    async fn encode(&self, frames: &[Frame], out_path: &Path) -> Result<()> {
        if frames.is_empty() {
            return Err(Error::Encoder("no frames to encode".to_string()));
        }

        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(out_path).await?;
        for frame in frames {
            file.write_all(&frame.payload).await?;
        }
        file.flush().await?;

        tracing::debug!(
            path = %out_path.display(),
            frames = frames.len(),
            "Clip segments concatenated"
        );
        Ok(())
    }
}

/// Remuxes the concatenated stream into an MP4 via ffmpeg
///
/// The child process is spawned with `kill_on_drop(true)`: when the timeout
/// fires and the wait future is dropped, ffmpeg receives SIGKILL instead of
/// lingering as a zombie.
pub struct FfmpegClipEncoder {
    timeout: Duration,
}

impl FfmpegClipEncoder {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_FFMPEG_TIMEOUT_SECS),
        }
    }

    /// Create with an explicit remux timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for FfmpegClipEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClipEncoder for FfmpegClipEncoder {
    async fn encode(&self, frames: &[Frame], out_path: &Path) -> Result<()> {
        if frames.is_empty() {
            return Err(Error::Encoder("no frames to encode".to_string()));
        }

        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Stage the concatenated stream, then remux with stream copy
        let staged = out_path.with_extension("ts.tmp");
        {
            let mut file = tokio::fs::File::create(&staged).await?;
            for frame in frames {
                file.write_all(&frame.payload).await?;
            }
            file.flush().await?;
        }

        let result = self.remux(&staged, out_path).await;
        let _ = tokio::fs::remove_file(&staged).await;
        result
    }
}

impl FfmpegClipEncoder {
    async fn remux(&self, input: &Path, output: &Path) -> Result<()> {
        let child = Command::new("ffmpeg")
            .args([
                "-i",
                &input.display().to_string(),
                "-c",
                "copy",
                "-movflags",
                "+faststart",
                "-loglevel",
                "error",
                "-y",
                &output.display().to_string(),
            ])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Encoder(format!("ffmpeg spawn failed: {}", e)))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output_result)) => {
                if !output_result.status.success() {
                    let stderr = String::from_utf8_lossy(&output_result.stderr);
                    return Err(Error::Encoder(format!(
                        "ffmpeg failed: {}",
                        stderr.trim()
                    )));
                }
                tracing::debug!(path = %output.display(), "Clip remuxed to MP4");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Encoder(format!("ffmpeg wait failed: {}", e))),
            Err(_) => Err(Error::Encoder(format!(
                "ffmpeg timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    fn frame(payload: &'static [u8]) -> Frame {
        Frame::new("cam-001", 0, Utc::now(), Bytes::from_static(payload))
    }

    #[tokio::test]
    async fn test_concat_encoder_joins_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("clip.mp4");
        let frames = vec![frame(b"abc"), frame(b"def"), frame(b"ghi")];

        SegmentConcatEncoder::new().encode(&frames, &out).await.unwrap();

        let written = tokio::fs::read(&out).await.unwrap();
        assert_eq!(written, b"abcdefghi");
    }

    #[tokio::test]
    async fn test_concat_encoder_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/clips/clip.mp4");

        SegmentConcatEncoder::new()
            .encode(&[frame(b"x")], &out)
            .await
            .unwrap();
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_concat_encoder_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("clip.mp4");
        let result = SegmentConcatEncoder::new().encode(&[], &out).await;
        assert!(matches!(result, Err(Error::Encoder(_))));
    }
}
