use super::{ContentInput, ContentModality, VectorizationAdapter};
use crate::audio::AudioBuffer;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Media types treated as RIFF/WAV.
const WAV_TYPES: &[&str] = &["audio/wav", "audio/x-wav", "audio/wave", "audio/vnd.wave"];

/// Model that turns mono PCM audio into a vector.
#[async_trait]
pub trait AudioEncoder: Send + Sync {
    /// Sample rate the encoder expects; input is resampled to it.
    fn sample_rate(&self) -> u32;

    async fn encode(&self, audio: &AudioBuffer) -> Result<Vec<f32>>;
}

/// Decodes WAV content to mono, resamples it and delegates to an
/// [`AudioEncoder`].
pub struct AudioAdapter {
    encoder: Arc<dyn AudioEncoder>,
}

impl AudioAdapter {
    pub fn new(encoder: Arc<dyn AudioEncoder>) -> Self {
        Self { encoder }
    }

    /// Embed already decoded audio.
    pub async fn embed_buffer(&self, audio: &AudioBuffer) -> Result<Vec<f32>> {
        let resampled = audio.resample(self.encoder.sample_rate());
        self.encoder.encode(&resampled).await
    }
}

#[async_trait]
impl VectorizationAdapter for AudioAdapter {
    fn name(&self) -> &str {
        "audio"
    }

    fn supported_modalities(&self) -> Vec<ContentModality> {
        vec![ContentModality::Audio]
    }

    fn can_handle(&self, input: &ContentInput) -> bool {
        input
            .media_type()
            .is_some_and(|m| WAV_TYPES.contains(&m.as_str()))
    }

    async fn embed(&self, input: &ContentInput) -> Result<Vec<f32>> {
        let audio = AudioBuffer::from_wav_bytes(&input.bytes)?;
        self.embed_buffer(&audio).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::mock::{StubAudioEncoder, wav_bytes};

    #[tokio::test]
    async fn resamples_to_encoder_rate() {
        let adapter = AudioAdapter::new(Arc::new(StubAudioEncoder {
            sample_rate: 16_000,
        }));
        let input = ContentInput::new(wav_bytes(8_000, 8_000)).with_mime_type("audio/x-wav");
        let v = adapter.embed(&input).await.unwrap();
        assert_eq!(v[0], 16_000.0);
        assert_eq!(v[1], 16_000.0);
        assert!((v[2] - 0.5).abs() < 1e-3);
    }

    #[tokio::test]
    async fn undecodable_audio_is_invalid_input() {
        let adapter = AudioAdapter::new(Arc::new(StubAudioEncoder {
            sample_rate: 16_000,
        }));
        let input = ContentInput::new(b"RIFF....".to_vec()).with_mime_type("audio/wav");
        let err = adapter.embed(&input).await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidInput(_)));
    }

    #[test]
    fn claims_wav_only() {
        let adapter = AudioAdapter::new(Arc::new(StubAudioEncoder { sample_rate: 1 }));
        assert!(adapter.can_handle(&ContentInput::new(wav_bytes(4, 8_000))));
        assert!(!adapter.can_handle(&ContentInput::new(vec![]).with_mime_type("audio/mpeg")));
    }
}
