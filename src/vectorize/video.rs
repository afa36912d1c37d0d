use super::audio::AudioAdapter;
use super::{ContentInput, ContentModality, VectorizationAdapter};
use crate::audio::AudioBuffer;
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Pulls the audio track out of a video container.
#[async_trait]
pub trait AudioTrackExtractor: Send + Sync {
    async fn extract(&self, input: &ContentInput) -> Result<AudioBuffer>;
}

/// Extracts mono audio by piping the container through the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegAudioExtractor {
    program: PathBuf,
    sample_rate: u32,
}

impl Default for FfmpegAudioExtractor {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            sample_rate: 16_000,
        }
    }
}

impl FfmpegAudioExtractor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

#[async_trait]
impl AudioTrackExtractor for FfmpegAudioExtractor {
    async fn extract(&self, input: &ContentInput) -> Result<AudioBuffer> {
        let rate = self.sample_rate.to_string();
        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-i", "pipe:0", "-vn"])
            .args(["-ac", "1", "-ar", rate.as_str()])
            .args(["-f", "f32le", "-acodec", "pcm_f32le", "pipe:1"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RuntimeError::InferenceError(format!(
                    "Failed to start '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            RuntimeError::InferenceError("ffmpeg stdin was not captured".to_string())
        })?;
        let bytes = input.bytes.clone();
        let writer = tokio::spawn(async move {
            // ffmpeg may stop reading early (e.g. no audio stream); the exit
            // status below reports that.
            if let Err(e) = stdin.write_all(&bytes).await {
                tracing::debug!(error = %e, "ffmpeg closed its input early");
            }
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RuntimeError::InferenceError(format!("ffmpeg did not finish: {}", e)))?;
        if let Err(e) = writer.await {
            tracing::debug!(error = %e, "ffmpeg input writer task failed");
        }

        if !output.status.success() {
            return Err(RuntimeError::InvalidInput(format!(
                "Could not extract an audio track: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let samples: Vec<f32> = output
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        if samples.is_empty() {
            return Err(RuntimeError::InvalidInput(
                "Video contains no audio samples".to_string(),
            ));
        }
        Ok(AudioBuffer::new(samples, self.sample_rate))
    }
}

/// Declares `video` content, but embeds it by extracting the audio track and
/// handing that to an [`AudioAdapter`].
pub struct VideoAudioAdapter {
    extractor: Arc<dyn AudioTrackExtractor>,
    audio: AudioAdapter,
}

impl VideoAudioAdapter {
    pub fn new(extractor: Arc<dyn AudioTrackExtractor>, audio: AudioAdapter) -> Self {
        Self { extractor, audio }
    }
}

#[async_trait]
impl VectorizationAdapter for VideoAudioAdapter {
    fn name(&self) -> &str {
        "video-as-audio"
    }

    fn supported_modalities(&self) -> Vec<ContentModality> {
        vec![ContentModality::Video]
    }

    fn can_handle(&self, input: &ContentInput) -> bool {
        input.modality() == Some(ContentModality::Video)
    }

    async fn embed(&self, input: &ContentInput) -> Result<Vec<f32>> {
        let track = self.extractor.extract(input).await?;
        tracing::debug!(
            samples = track.samples.len(),
            sample_rate = track.sample_rate,
            "Extracted audio track from video"
        );
        self.audio.embed_buffer(&track).await
    }
}
