//! The provider façade: one object that owns a lifecycle controller per
//! modality and exposes generation, embedding, similarity and speech over
//! whatever engines were registered.

use crate::api::{Message, Modality, ModalityConfig, ProviderConfig, WarmupPolicy};
use crate::audio::AudioBuffer;
use crate::cache::{ProgressSender, resolve_cache_dir};
use crate::device::CapabilityDescriptor;
use crate::error::{Result, RuntimeError};
use crate::lifecycle::{LifecycleController, ModelBinding, ModelState, downcast_model};
use crate::options_validation::validate_engine_options;
use crate::stream::ProviderTokenStream;
use crate::traits::{
    EmbeddingModel, EngineHealth, GenerationOptions, GeneratorModel, ModelEngine, SpeechOptions,
    SpeechRecognitionModel, SpeechSynthesisModel, TokenUsage, Transcription,
};
use crate::vectorize::{ContentInput, VectorizationAdapter, VectorizerRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Input accepted by [`Provider::embed`].
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedInput {
    /// One text, embedded with the embedding modality.
    Text(String),
    /// Several texts, embedded in one call. Output order matches input order.
    Batch(Vec<String>),
    /// Non-text content, routed through the vectorizer registry.
    Content(ContentInput),
}

impl From<&str> for EmbedInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for EmbedInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<String>> for EmbedInput {
    fn from(texts: Vec<String>) -> Self {
        Self::Batch(texts)
    }
}

impl From<Vec<&str>> for EmbedInput {
    fn from(texts: Vec<&str>) -> Self {
        Self::Batch(texts.into_iter().map(str::to_string).collect())
    }
}

impl From<ContentInput> for EmbedInput {
    fn from(content: ContentInput) -> Self {
        Self::Content(content)
    }
}

/// Output of [`Provider::embed`]: a single vector for `Text` and `Content`,
/// one vector per input for `Batch`.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutput {
    Single(Vec<f32>),
    Batch(Vec<Vec<f32>>),
}

impl EmbedOutput {
    pub fn as_single(&self) -> Option<&[f32]> {
        match self {
            Self::Single(v) => Some(v),
            Self::Batch(_) => None,
        }
    }

    /// Every vector, in input order.
    pub fn into_vectors(self) -> Vec<Vec<f32>> {
        match self {
            Self::Single(v) => vec![v],
            Self::Batch(vs) => vs,
        }
    }
}

/// Result of [`Provider::chat`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub content: String,
    /// Token counts; all zeros when the engine does not report usage.
    pub usage: TokenUsage,
}

/// Cosine similarity of two vectors, clamped to `[-1, 1]`.
///
/// Returns `0.0` if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Runtime-agnostic façade over locally executed models.
///
/// Construct with [`Provider::builder`]. Each modality has its own
/// [`LifecycleController`]; operations resolve the controller, load the model
/// if needed (see [`ProviderConfig::auto_warmup`]) and call the engine.
pub struct Provider {
    config: ProviderConfig,
    engines: Vec<Arc<dyn ModelEngine>>,
    controllers: BTreeMap<Modality, Arc<LifecycleController>>,
    vectorizers: VectorizerRegistry,
}

impl Provider {
    /// Create a new [`ProviderBuilder`].
    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::default()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The lifecycle controller for `modality`. Always present; unconfigured
    /// modalities get a controller that refuses to load.
    pub fn controller(&self, modality: Modality) -> &Arc<LifecycleController> {
        &self.controllers[&modality]
    }

    pub fn state(&self, modality: Modality) -> ModelState {
        self.controller(modality).state()
    }

    /// Content vectorizers used by [`embed`](Self::embed) for
    /// [`EmbedInput::Content`].
    pub fn vectorizers(&self) -> &VectorizerRegistry {
        &self.vectorizers
    }

    /// Append a vectorization adapter at runtime.
    pub async fn register_adapter(&self, adapter: Arc<dyn VectorizationAdapter>) {
        self.vectorizers.register(adapter).await;
    }

    /// Health of every registered engine, keyed by engine id.
    pub async fn engine_health(&self) -> BTreeMap<&'static str, EngineHealth> {
        let mut report = BTreeMap::new();
        for engine in &self.engines {
            report.insert(engine.engine_id(), engine.health().await);
        }
        report
    }

    /// Load `modality` now instead of on first use.
    pub async fn warmup(&self, modality: Modality) -> Result<()> {
        self.controller(modality).ensure_loaded().await.map(|_| ())
    }

    /// Load every configured modality concurrently. Returns the first error.
    pub async fn warmup_all(&self) -> Result<()> {
        let loads = self
            .controllers
            .values()
            .filter(|c| c.is_configured())
            .map(|c| c.ensure_loaded());
        futures::future::join_all(loads)
            .await
            .into_iter()
            .try_for_each(|r| r.map(|_| ()))
    }

    /// Release every loaded model. Later operations fail with
    /// [`RuntimeError::Disposed`]. Safe to call more than once.
    pub fn dispose(&self) {
        for controller in self.controllers.values() {
            controller.dispose();
        }
    }

    async fn model<T: ?Sized + Send + Sync + 'static>(&self, modality: Modality) -> Result<Arc<T>> {
        let handle = self
            .controller(modality)
            .handle(self.config.auto_warmup)
            .await?;
        downcast_model::<T>(modality, &handle)
    }

    /// Time `call` and record inference metrics.
    ///
    /// A disposed modality fails with `Disposed` before `call` runs, and any
    /// outcome of a call that raced with disposal is replaced by `Disposed`.
    async fn instrumented<T>(
        &self,
        modality: Modality,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let start = Instant::now();
        let controller = self.controller(modality);
        let res = match controller.ensure_live() {
            Ok(()) => {
                let outcome = call.await;
                controller.ensure_live().and(outcome)
            }
            Err(e) => Err(e),
        };
        let status = if res.is_ok() { "success" } else { "failure" };

        metrics::histogram!(
            "model_inference.duration_seconds",
            "modality" => modality.as_str(),
            "operation" => operation
        )
        .record(start.elapsed().as_secs_f64());
        metrics::counter!(
            "model_inference.total",
            "modality" => modality.as_str(),
            "operation" => operation,
            "status" => status
        )
        .increment(1);

        if let Err(e) = &res {
            tracing::debug!(modality = %modality, operation, error = %e, "Operation failed");
        }
        res
    }

    /// Single-shot generation from a prompt.
    pub async fn complete(&self, prompt: &str, options: GenerationOptions) -> Result<String> {
        let messages = [Message::user(prompt)];
        self.instrumented(Modality::Llm, "complete", async {
            let model = self.model::<dyn GeneratorModel>(Modality::Llm).await?;
            Ok(model.generate(&messages, options).await?.text)
        })
        .await
    }

    /// Multi-turn generation.
    pub async fn chat(&self, messages: &[Message], options: GenerationOptions) -> Result<ChatResponse> {
        self.instrumented(Modality::Llm, "chat", async {
            if messages.is_empty() {
                return Err(RuntimeError::InvalidInput(
                    "chat requires at least one message".to_string(),
                ));
            }
            let model = self.model::<dyn GeneratorModel>(Modality::Llm).await?;
            let result = model.generate(messages, options).await?;
            Ok(ChatResponse {
                content: result.text,
                usage: result.usage.unwrap_or_default(),
            })
        })
        .await
    }

    /// Start a streamed generation. Tokens are produced only as the returned
    /// stream is polled; dropping it stops generation.
    pub async fn stream(
        &self,
        messages: &[Message],
        options: GenerationOptions,
    ) -> Result<ProviderTokenStream> {
        let controller = self.controller(Modality::Llm).clone();
        let inner = self
            .instrumented(Modality::Llm, "stream_open", async {
                if messages.is_empty() {
                    return Err(RuntimeError::InvalidInput(
                        "stream requires at least one message".to_string(),
                    ));
                }
                let model = self.model::<dyn GeneratorModel>(Modality::Llm).await?;
                model.stream(messages, options).await
            })
            .await?;
        Ok(ProviderTokenStream::new(inner, controller))
    }

    /// Embed text, a batch of texts, or non-text content.
    pub async fn embed(&self, input: impl Into<EmbedInput>) -> Result<EmbedOutput> {
        match input.into() {
            EmbedInput::Text(text) => {
                let mut vectors = self.embed_texts("embed", vec![text.as_str()]).await?;
                Ok(EmbedOutput::Single(vectors.pop().unwrap_or_default()))
            }
            EmbedInput::Batch(texts) if texts.is_empty() => {
                let controller = self.controller(Modality::Embedding);
                controller.ensure_live()?;
                if !controller.is_configured() {
                    return Err(RuntimeError::ModelNotConfigured(Modality::Embedding));
                }
                Ok(EmbedOutput::Batch(Vec::new()))
            }
            EmbedInput::Batch(texts) => {
                let refs = texts.iter().map(String::as_str).collect();
                Ok(EmbedOutput::Batch(self.embed_texts("embed", refs).await?))
            }
            EmbedInput::Content(content) => {
                self.instrumented(Modality::Embedding, "embed_content", async {
                    self.vectorizers.dispatch(&content).await
                })
                .await
                .map(EmbedOutput::Single)
            }
        }
    }

    async fn embed_texts(&self, operation: &'static str, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        self.instrumented(Modality::Embedding, operation, async {
            let model = self.model::<dyn EmbeddingModel>(Modality::Embedding).await?;
            let expected = texts.len();
            let vectors = model.embed(texts).await?;
            check_embeddings(model.as_ref(), expected, &vectors)?;
            Ok(vectors)
        })
        .await
    }

    /// Cosine similarity of two texts under the embedding model.
    pub async fn similarity(&self, a: &str, b: &str) -> Result<f32> {
        let vectors = self.embed_texts("similarity", vec![a, b]).await?;
        Ok(cosine_similarity(&vectors[0], &vectors[1]))
    }

    /// Speak `text` with the TTS modality.
    pub async fn synthesize(&self, text: &str, options: SpeechOptions) -> Result<AudioBuffer> {
        self.instrumented(Modality::Tts, "synthesize", async {
            if text.trim().is_empty() {
                return Err(RuntimeError::InvalidInput(
                    "Cannot synthesize empty text".to_string(),
                ));
            }
            let model = self.model::<dyn SpeechSynthesisModel>(Modality::Tts).await?;
            model.synthesize(text, options).await
        })
        .await
    }

    /// Transcribe `audio` with the ASR modality, resampling it to the rate
    /// the model expects.
    pub async fn transcribe(&self, audio: &AudioBuffer) -> Result<Transcription> {
        self.instrumented(Modality::Asr, "transcribe", async {
            if audio.is_empty() {
                return Err(RuntimeError::InvalidInput(
                    "Cannot transcribe empty audio".to_string(),
                ));
            }
            let model = self.model::<dyn SpeechRecognitionModel>(Modality::Asr).await?;
            let audio = audio.resample(model.sample_rate());
            model.transcribe(&audio).await
        })
        .await
    }
}

/// Every vector must exist and match the model's advertised dimensionality.
fn check_embeddings(
    model: &dyn EmbeddingModel,
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<()> {
    if vectors.len() != expected {
        return Err(RuntimeError::InferenceError(format!(
            "Model '{}' returned {} vectors for {} inputs",
            model.model_id(),
            vectors.len(),
            expected
        )));
    }
    let dims = model.dimensions() as usize;
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(RuntimeError::InferenceError(format!(
            "Model '{}' returned a {}-dimensional vector, expected {}",
            model.model_id(),
            bad.len(),
            dims
        )));
    }
    Ok(())
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field(
                "engines",
                &self.engines.iter().map(|e| e.engine_id()).collect::<Vec<_>>(),
            )
            .field("controllers", &self.controllers)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Provider`].
///
/// ```rust,no_run
/// # use uni_modal::provider::Provider;
/// # use uni_modal::api::ProviderConfig;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = Provider::builder()
///     .config(ProviderConfig::default())
///     // .register_engine(...)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ProviderBuilder {
    config: ProviderConfig,
    engines: Vec<Arc<dyn ModelEngine>>,
    adapters: Vec<Arc<dyn VectorizationAdapter>>,
    capabilities: Option<CapabilityDescriptor>,
    progress: Option<ProgressSender>,
    engine_warmup: WarmupPolicy,
}

impl ProviderBuilder {
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a JSON string.
    pub fn config_from_str(mut self, s: &str) -> Result<Self> {
        self.config = ProviderConfig::from_json_str(s)?;
        Ok(self)
    }

    /// Load the configuration from a JSON file.
    pub fn config_from_file(mut self, path: impl AsRef<std::path::Path>) -> Result<Self> {
        self.config = ProviderConfig::from_file(path)?;
        Ok(self)
    }

    /// Register an engine. Registering a second engine with the same
    /// [`engine_id`](ModelEngine::engine_id) replaces the first but keeps its
    /// position.
    pub fn register_engine<E: ModelEngine + 'static>(self, engine: E) -> Self {
        self.register_shared_engine(Arc::new(engine))
    }

    /// Register an engine the caller keeps a handle to.
    pub fn register_shared_engine(mut self, engine: Arc<dyn ModelEngine>) -> Self {
        match self
            .engines
            .iter_mut()
            .find(|e| e.engine_id() == engine.engine_id())
        {
            Some(slot) => *slot = engine,
            None => self.engines.push(engine),
        }
        self
    }

    /// Register a vectorization adapter. Adapters are consulted in
    /// registration order.
    pub fn register_adapter(mut self, adapter: Arc<dyn VectorizationAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Use fixed host capabilities instead of probing the host.
    pub fn capabilities(mut self, capabilities: CapabilityDescriptor) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Receive weight download progress from engines that report it.
    pub fn progress_channel(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    /// When to run each engine's own [`warmup`](ModelEngine::warmup) hook.
    pub fn warmup_policy(mut self, policy: WarmupPolicy) -> Self {
        self.engine_warmup = policy;
        self
    }

    fn select_engine(&self, modality: Modality, config: &ModalityConfig) -> Result<Arc<dyn ModelEngine>> {
        let engine = match &config.engine {
            Some(id) => self
                .engines
                .iter()
                .find(|e| e.engine_id() == id.as_str())
                .ok_or_else(|| RuntimeError::EngineNotFound(id.clone()))?,
            None => self
                .engines
                .iter()
                .find(|e| e.capabilities().supported_modalities.contains(&modality))
                .ok_or_else(|| {
                    RuntimeError::Config(format!(
                        "No registered engine supports modality '{}'",
                        modality
                    ))
                })?,
        };
        if !engine
            .capabilities()
            .supported_modalities
            .contains(&modality)
        {
            return Err(RuntimeError::CapabilityMismatch(format!(
                "Engine '{}' does not support modality '{}'",
                engine.engine_id(),
                modality
            )));
        }
        Ok(engine.clone())
    }

    /// Validate the configuration, bind each configured modality to an engine,
    /// run the warmup policies and return the provider.
    ///
    /// Fails if an entry is invalid, names an unknown engine, has malformed
    /// engine options, or if a `required` eager warmup fails.
    pub async fn build(self) -> Result<Arc<Provider>> {
        self.config.validate()?;

        let mut controllers = BTreeMap::new();
        for modality in Modality::ALL {
            let controller = match self.config.active(modality) {
                None => LifecycleController::unconfigured(modality),
                Some(config) => {
                    let engine = self.select_engine(modality, config)?;
                    validate_engine_options(engine.engine_id(), modality, &config.options)?;
                    let cache_dir = resolve_cache_dir(
                        config.cache_dir.as_deref(),
                        self.config.cache_dir.as_deref(),
                        engine.engine_id(),
                        &config.model,
                    );
                    tracing::debug!(
                        modality = %modality,
                        model = %config.model,
                        engine = %engine.engine_id(),
                        cache_dir = %cache_dir.display(),
                        "Bound modality to engine"
                    );
                    LifecycleController::new(
                        modality,
                        ModelBinding {
                            config: config.clone(),
                            engine,
                            cache_dir,
                            capabilities: self.capabilities,
                            progress: self.progress.clone(),
                        },
                    )
                }
            };
            controllers.insert(modality, Arc::new(controller));
        }

        let vectorizers = VectorizerRegistry::new();
        for adapter in self.adapters {
            vectorizers.register(adapter).await;
        }

        let provider = Arc::new(Provider {
            config: self.config,
            engines: self.engines,
            controllers,
            vectorizers,
        });

        // Engine warmup phase
        match self.engine_warmup {
            WarmupPolicy::Eager => {
                for engine in &provider.engines {
                    tracing::info!(engine = %engine.engine_id(), "Eagerly warming up engine");
                    engine.warmup().await.map_err(|e| {
                        RuntimeError::Config(format!(
                            "Failed to warm up engine {}: {}",
                            engine.engine_id(),
                            e
                        ))
                    })?;
                }
            }
            WarmupPolicy::Background => {
                for engine in &provider.engines {
                    tracing::info!(engine = %engine.engine_id(), "Scheduling background engine warmup");
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = engine.warmup().await {
                            tracing::error!(engine = %engine.engine_id(), error = %e, "Background engine warmup failed");
                        }
                    });
                }
            }
            WarmupPolicy::Lazy => tracing::debug!("Lazy engine warmup (no-op)"),
        }

        // Model warmup phase
        for (modality, config) in provider.config.configured() {
            let controller = provider.controller(modality).clone();
            match config.warmup {
                WarmupPolicy::Eager => {
                    tracing::info!(modality = %modality, "Eagerly warming up model");
                    if let Err(e) = controller.ensure_loaded().await {
                        if config.required {
                            return Err(e);
                        }
                        tracing::error!(
                            modality = %modality,
                            error = %e,
                            "Optional eager warmup failed; continuing startup"
                        );
                    }
                }
                WarmupPolicy::Background => {
                    tracing::info!(modality = %modality, "Scheduling background warmup");
                    tokio::spawn(async move {
                        if let Err(e) = controller.ensure_loaded().await {
                            tracing::error!(modality = %controller.modality(), error = %e, "Background warmup failed");
                        }
                    });
                }
                WarmupPolicy::Lazy => {
                    tracing::debug!(modality = %modality, "Lazy warmup (no-op)");
                }
            }
        }

        Ok(provider)
    }
}
