//! Core traits every engine and model implementation must satisfy.

use crate::api::{DType, Device, Message, Modality};
use crate::audio::AudioBuffer;
use crate::cache::ProgressSender;
use crate::device::ResolvedBackend;
use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::any::Any;
use std::path::PathBuf;
use std::pin::Pin;

/// Advertised capabilities of a [`ModelEngine`].
#[derive(Debug, Clone)]
pub struct EngineCapabilities {
    /// The modalities this engine can load models for.
    pub supported_modalities: Vec<Modality>,
}

/// Health status reported by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineHealth {
    /// The engine is fully operational.
    Healthy,
    /// The engine is operational but experiencing partial issues.
    Degraded(String),
    /// The engine cannot serve requests.
    Unhealthy(String),
}

/// Everything an engine needs to materialize one model.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub modality: Modality,
    pub model_id: String,
    pub revision: Option<String>,
    /// Device and precision after capability detection and fallback.
    pub backend: ResolvedBackend,
    /// Directory the weights are cached in.
    pub cache_dir: PathBuf,
    /// Engine-specific options, already validated.
    pub options: serde_json::Value,
    /// Where download progress is reported, if anyone listens.
    pub progress: Option<ProgressSender>,
}

impl LoadRequest {
    pub fn device(&self) -> Device {
        self.backend.device
    }

    pub fn dtype(&self) -> DType {
        self.backend.dtype
    }
}

/// A pluggable execution engine that knows how to load models for one or
/// more modalities.
///
/// Engines are registered with
/// [`ProviderBuilder::register_engine`](crate::provider::ProviderBuilder::register_engine)
/// and identified by their [`engine_id`](ModelEngine::engine_id)
/// (e.g. `"local/candle"`). Each modality's lifecycle controller receives its
/// engine at construction and calls [`load`](ModelEngine::load) at most once
/// per load attempt.
#[async_trait]
pub trait ModelEngine: Send + Sync {
    /// Unique identifier for this engine (e.g. `"local/candle"`).
    fn engine_id(&self) -> &'static str;

    /// Return the set of modalities this engine supports.
    fn capabilities(&self) -> EngineCapabilities;

    /// Load a model described by `request` and return a type-erased handle.
    ///
    /// The returned [`LoadedModelHandle`] is expected to contain an
    /// `Arc<dyn GeneratorModel>`, `Arc<dyn EmbeddingModel>`,
    /// `Arc<dyn SpeechSynthesisModel>` or `Arc<dyn SpeechRecognitionModel>`
    /// matching `request.modality`.
    async fn load(&self, request: &LoadRequest) -> Result<LoadedModelHandle>;

    /// Report the current health of this engine.
    async fn health(&self) -> EngineHealth;

    /// Optional one-time warmup hook called during provider construction.
    /// The default implementation is a no-op.
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}

/// A type-erased, reference-counted handle to a loaded model instance.
///
/// Engines wrap their concrete model (e.g. `Arc<dyn EmbeddingModel>`) inside
/// this `Arc<dyn Any + Send + Sync>` so controllers can store them uniformly;
/// the provider downcasts back to the trait object for the modality.
pub type LoadedModelHandle = std::sync::Arc<dyn Any + Send + Sync>;

/// Sampling and length parameters for text generation. Passed through to the
/// engine unmodified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    /// Maximum number of tokens to generate. Engine default if `None`.
    pub max_tokens: Option<usize>,
    /// Sampling temperature (0.0 = greedy, higher = more random).
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold.
    pub top_p: Option<f32>,
}

/// The output of a text generation call.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    /// Token usage statistics, if reported by the engine.
    pub usage: Option<TokenUsage>,
}

/// Token counts for a generation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// A lazily-evaluated sequence of generated text fragments in generation
/// order. Dropping it must stop generation.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A model that generates text from a conversation.
#[async_trait]
pub trait GeneratorModel: Send + Sync {
    /// Generate a complete response.
    async fn generate(
        &self,
        messages: &[Message],
        options: GenerationOptions,
    ) -> Result<GenerationResult>;

    /// Start generating and return the tokens as they are produced.
    ///
    /// Implementations must not compute tokens ahead of demand beyond what
    /// their backend requires, and must release per-request state when the
    /// returned stream is dropped.
    async fn stream(&self, messages: &[Message], options: GenerationOptions)
    -> Result<TokenStream>;

    /// Optional warmup hook. The default is a no-op.
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}

/// A model that produces dense vector embeddings from text.
#[async_trait]
pub trait EmbeddingModel: Send + Sync + Any {
    /// Embed a batch of text strings into dense vectors.
    ///
    /// Returns one `Vec<f32>` per input text, each with
    /// [`dimensions()`](EmbeddingModel::dimensions) elements.
    async fn embed(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>>;

    /// The dimensionality of the vectors produced by this model.
    fn dimensions(&self) -> u32;

    /// The underlying model identifier.
    fn model_id(&self) -> &str;

    /// Optional warmup hook (e.g. load weights into memory on first access).
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}

/// Voice and pacing controls for speech synthesis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechOptions {
    /// Engine-specific voice / speaker name.
    pub voice: Option<String>,
    /// Playback speed multiplier, 1.0 is natural pace.
    pub speed: Option<f32>,
}

/// A model that turns text into speech.
#[async_trait]
pub trait SpeechSynthesisModel: Send + Sync {
    async fn synthesize(&self, text: &str, options: SpeechOptions) -> Result<AudioBuffer>;

    /// Optional warmup hook. The default is a no-op.
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}

/// Output of a speech recognition call.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    /// Detected language code, if the engine reports one.
    pub language: Option<String>,
}

/// A model that turns speech into text.
#[async_trait]
pub trait SpeechRecognitionModel: Send + Sync {
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<Transcription>;

    /// Sample rate the model expects. Input is resampled to it before
    /// [`transcribe`](Self::transcribe) is called.
    fn sample_rate(&self) -> u32 {
        16_000
    }

    /// Optional warmup hook. The default is a no-op.
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}
