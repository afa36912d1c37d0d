//! Mock engine, models and encoders shared by the integration suites.

use async_trait::async_trait;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uni_modal::api::{DType, Device, Message, Modality, ModalityConfig, ProviderConfig};
use uni_modal::audio::AudioBuffer;
use uni_modal::cache::{ProgressEvent, report};
use uni_modal::device::CapabilityDescriptor;
use uni_modal::error::{Result, RuntimeError};
use uni_modal::provider::Provider;
use uni_modal::traits::{
    EmbeddingModel, EngineCapabilities, EngineHealth, GenerationOptions, GenerationResult,
    GeneratorModel, LoadRequest, LoadedModelHandle, ModelEngine, SpeechOptions,
    SpeechRecognitionModel, SpeechSynthesisModel, TokenStream, TokenUsage, Transcription,
};
use uni_modal::vectorize::{AudioEncoder, ImageEncoder};

/// Hashed bag-of-words vector, L2-normalized.
pub fn bag_of_words(text: &str, dimensions: u32) -> Vec<f32> {
    let mut v = vec![0.0f32; dimensions as usize];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        v[(hasher.finish() % dimensions as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

pub struct MockEmbeddingModel {
    pub dimensions: u32,
    pub model_id: String,
    /// Return vectors of this length instead of `dimensions`.
    pub wrong_dimensions: Option<usize>,
    pub released: Arc<AtomicUsize>,
}

#[async_trait]
impl EmbeddingModel for MockEmbeddingModel {
    async fn embed(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| match self.wrong_dimensions {
                Some(n) => vec![0.5; n],
                None => bag_of_words(t, self.dimensions),
            })
            .collect())
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl Drop for MockEmbeddingModel {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockGeneratorModel {
    pub tokens: Vec<String>,
    pub produced: Arc<AtomicUsize>,
    pub fail_stream_at: Option<usize>,
    pub released: Arc<AtomicUsize>,
}

#[async_trait]
impl GeneratorModel for MockGeneratorModel {
    async fn generate(
        &self,
        messages: &[Message],
        options: GenerationOptions,
    ) -> Result<GenerationResult> {
        let limit = options.max_tokens.unwrap_or(usize::MAX);
        let tokens: Vec<&String> = self.tokens.iter().take(limit).collect();
        let prompt_tokens = messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum();
        Ok(GenerationResult {
            text: tokens.iter().map(|t| t.as_str()).collect(),
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens: tokens.len(),
                total_tokens: prompt_tokens + tokens.len(),
            }),
        })
    }

    async fn stream(
        &self,
        _messages: &[Message],
        options: GenerationOptions,
    ) -> Result<TokenStream> {
        let limit = options.max_tokens.unwrap_or(usize::MAX);
        let tokens: Vec<String> = self.tokens.iter().take(limit).cloned().collect();
        let produced = self.produced.clone();
        let fail_at = self.fail_stream_at;
        let stream = futures::stream::unfold(0usize, move |i| {
            let next = tokens.get(i).cloned();
            let produced = produced.clone();
            async move {
                if fail_at == Some(i) {
                    return Some((
                        Err(RuntimeError::InferenceError("stream broke".into())),
                        i + 1,
                    ));
                }
                let token = next?;
                produced.fetch_add(1, Ordering::SeqCst);
                Some((Ok(token), i + 1))
            }
        });
        Ok(Box::pin(stream))
    }
}

impl Drop for MockGeneratorModel {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Produces 100 samples per character at 16 kHz, scaled by `speed`.
pub struct MockSpeechModel;

#[async_trait]
impl SpeechSynthesisModel for MockSpeechModel {
    async fn synthesize(&self, text: &str, options: SpeechOptions) -> Result<AudioBuffer> {
        let speed = options.speed.unwrap_or(1.0).max(0.1);
        let len = (text.chars().count() as f32 * 100.0 / speed) as usize;
        Ok(AudioBuffer::new(vec![0.1; len], 16_000))
    }
}

/// Describes what it heard as `"<n> samples at <rate> Hz"`.
pub struct MockRecognitionModel;

#[async_trait]
impl SpeechRecognitionModel for MockRecognitionModel {
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<Transcription> {
        Ok(Transcription {
            text: format!("{} samples at {} Hz", audio.samples.len(), audio.sample_rate),
            language: Some("en".to_string()),
        })
    }
}

/// What the last [`LoadRequest`] asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenRequest {
    pub modality: Modality,
    pub model_id: String,
    pub device: Device,
    pub dtype: DType,
    pub fell_back: bool,
    pub cache_dir: PathBuf,
}

pub struct MockEngine {
    engine_id: &'static str,
    modalities: Vec<Modality>,
    dimensions: u32,
    wrong_dimensions: Option<usize>,
    tokens: Vec<String>,
    load_delay: Duration,
    failures_left: AtomicUsize,
    fail_stream_at: Option<usize>,
    health: EngineHealth,
    pub load_count: AtomicUsize,
    pub warmup_count: AtomicUsize,
    pub released_count: Arc<AtomicUsize>,
    pub produced_tokens: Arc<AtomicUsize>,
    pub last_request: Mutex<Option<SeenRequest>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            engine_id: "mock/all",
            modalities: Modality::ALL.to_vec(),
            dimensions: 64,
            wrong_dimensions: None,
            tokens: vec!["The".into(), " quick".into(), " brown".into(), " fox".into()],
            load_delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            fail_stream_at: None,
            health: EngineHealth::Healthy,
            load_count: AtomicUsize::new(0),
            warmup_count: AtomicUsize::new(0),
            released_count: Arc::new(AtomicUsize::new(0)),
            produced_tokens: Arc::new(AtomicUsize::new(0)),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_id(mut self, engine_id: &'static str) -> Self {
        self.engine_id = engine_id;
        self
    }

    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.modalities = modalities;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Advertise `dimensions` but return vectors of length `n`.
    pub fn with_wrong_dimensions(mut self, n: usize) -> Self {
        self.wrong_dimensions = Some(n);
        self
    }

    pub fn with_stream_failure_at(mut self, index: usize) -> Self {
        self.fail_stream_at = Some(index);
        self
    }

    pub fn with_health(mut self, health: EngineHealth) -> Self {
        self.health = health;
        self
    }

    /// Fail the first `n` loads.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn loads(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released_count.load(Ordering::SeqCst)
    }

    pub fn produced(&self) -> usize {
        self.produced_tokens.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<SeenRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelEngine for MockEngine {
    fn engine_id(&self) -> &'static str {
        self.engine_id
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            supported_modalities: self.modalities.clone(),
        }
    }

    async fn load(&self, request: &LoadRequest) -> Result<LoadedModelHandle> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(SeenRequest {
            modality: request.modality,
            model_id: request.model_id.clone(),
            device: request.device(),
            dtype: request.dtype(),
            fell_back: request.backend.fell_back,
            cache_dir: request.cache_dir.clone(),
        });
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RuntimeError::InferenceError("weights unavailable".into()));
        }
        report(
            request.progress.as_ref(),
            ProgressEvent::Done {
                model: request.model_id.clone(),
            },
        );

        let handle: LoadedModelHandle = match request.modality {
            Modality::Embedding => {
                let model: Arc<dyn EmbeddingModel> = Arc::new(MockEmbeddingModel {
                    dimensions: self.dimensions,
                    model_id: request.model_id.clone(),
                    wrong_dimensions: self.wrong_dimensions,
                    released: self.released_count.clone(),
                });
                Arc::new(model)
            }
            Modality::Llm => {
                let model: Arc<dyn GeneratorModel> = Arc::new(MockGeneratorModel {
                    tokens: self.tokens.clone(),
                    produced: self.produced_tokens.clone(),
                    fail_stream_at: self.fail_stream_at,
                    released: self.released_count.clone(),
                });
                Arc::new(model)
            }
            Modality::Tts => {
                let model: Arc<dyn SpeechSynthesisModel> = Arc::new(MockSpeechModel);
                Arc::new(model)
            }
            Modality::Asr => {
                let model: Arc<dyn SpeechRecognitionModel> = Arc::new(MockRecognitionModel);
                Arc::new(model)
            }
        };
        Ok(handle)
    }

    async fn health(&self) -> EngineHealth {
        self.health.clone()
    }

    async fn warmup(&self) -> Result<()> {
        self.warmup_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mean red, green and blue intensity of the (already resized) image.
pub struct StubImageEncoder {
    pub size: (u32, u32),
}

#[async_trait]
impl ImageEncoder for StubImageEncoder {
    fn input_size(&self) -> (u32, u32) {
        self.size
    }

    async fn encode(&self, image: &image::RgbImage) -> Result<Vec<f32>> {
        let mut sums = [0.0f32; 3];
        for pixel in image.pixels() {
            for (sum, channel) in sums.iter_mut().zip(pixel.0) {
                *sum += channel as f32 / 255.0;
            }
        }
        let n = (image.width() * image.height()).max(1) as f32;
        Ok(sums.iter().map(|s| s / n).collect())
    }
}

/// `[sample_rate, sample_count, mean absolute amplitude]`.
pub struct StubAudioEncoder {
    pub sample_rate: u32,
}

#[async_trait]
impl AudioEncoder for StubAudioEncoder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn encode(&self, audio: &AudioBuffer) -> Result<Vec<f32>> {
        let mean = audio.samples.iter().map(|s| s.abs()).sum::<f32>()
            / audio.samples.len().max(1) as f32;
        Ok(vec![
            audio.sample_rate as f32,
            audio.samples.len() as f32,
            mean,
        ])
    }
}

pub fn wav_bytes(samples: usize, sample_rate: u32) -> Vec<u8> {
    AudioBuffer::new(vec![0.5; samples], sample_rate)
        .to_wav_bytes()
        .unwrap()
}

pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Every modality configured with a lazily loaded `<modality>-model`.
pub fn config_all() -> ProviderConfig {
    Modality::ALL.into_iter().fold(ProviderConfig::default(), |c, m| {
        c.with_modality(m, ModalityConfig::new(format!("{}-model", m)))
    })
}

pub fn config_for(modality: Modality, model: ModalityConfig) -> ProviderConfig {
    ProviderConfig::default().with_modality(modality, model)
}

/// Build a provider over `engine` with fixed, non-accelerated capabilities.
pub async fn provider_with(engine: Arc<MockEngine>, config: ProviderConfig) -> Arc<Provider> {
    Provider::builder()
        .config(config)
        .register_shared_engine(engine)
        .capabilities(CapabilityDescriptor::conservative())
        .build()
        .await
        .unwrap()
}
