//! Mono PCM audio buffers shared by the speech modalities and the audio
//! vectorization adapter.

use crate::error::{Result, RuntimeError};
use std::io::Cursor;

/// Mono, 32-bit float PCM samples in `[-1.0, 1.0]` at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Decode a RIFF/WAV byte buffer, downmixing every channel to mono.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| RuntimeError::InvalidInput(format!("Failed to read WAV header: {}", e)))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| RuntimeError::InvalidInput(format!("Corrupt WAV data: {}", e)))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| RuntimeError::InvalidInput(format!("Corrupt WAV data: {}", e)))?
            }
        };

        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Ok(Self::new(samples, spec.sample_rate))
    }

    /// Encode as a mono 32-bit float WAV file.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut out = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec)
                .map_err(|e| RuntimeError::InferenceError(format!("WAV encode failed: {}", e)))?;
            for sample in &self.samples {
                writer
                    .write_sample(*sample)
                    .map_err(|e| RuntimeError::InferenceError(format!("WAV encode failed: {}", e)))?;
            }
            writer
                .finalize()
                .map_err(|e| RuntimeError::InferenceError(format!("WAV encode failed: {}", e)))?;
        }
        Ok(out)
    }

    /// Linearly resample to `target_rate`. Returns a clone when the rate
    /// already matches.
    pub fn resample(&self, target_rate: u32) -> Self {
        if target_rate == self.sample_rate || self.samples.is_empty() || self.sample_rate == 0 {
            return Self::new(self.samples.clone(), target_rate);
        }
        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = ((self.samples.len() as f64) / ratio).round().max(1.0) as usize;
        let last = self.samples.len() - 1;
        let samples = (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = (pos.floor() as usize).min(last);
                let next = (idx + 1).min(last);
                let frac = (pos - idx as f64) as f32;
                self.samples[idx] * (1.0 - frac) + self.samples[next] * frac
            })
            .collect();
        Self::new(samples, target_rate)
    }
}
