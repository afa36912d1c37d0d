use crate::api::{DType, Device, Message, Modality, Role};
use crate::error::{Result, RuntimeError};
use crate::traits::{
    EmbeddingModel, EngineCapabilities, EngineHealth, GenerationOptions, GenerationResult,
    GeneratorModel, LoadRequest, LoadedModelHandle, ModelEngine, TokenStream, TokenUsage,
};
use async_trait::async_trait;
use futures::StreamExt;
use mistralrs::{
    EmbeddingModelBuilder, EmbeddingRequestBuilder, GgufModelBuilder, IsqType, Model,
    PagedAttentionMetaBuilder, RequestBuilder, Response, TextMessageRole, TextModelBuilder,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Once};
use tokio::sync::mpsc;

/// Local inference engine using mistral.rs.
///
/// Serves the `llm` modality (with token streaming) and `embedding`.
/// HuggingFace safetensors models are quantized in place (ISQ) when the
/// modality asks for `q8`/`q4`; GGUF checkpoints are loaded when
/// `gguf_files` is set.
#[derive(Default)]
pub struct LocalMistralRsEngine;

static HF_CACHE_INIT: Once = Once::new();

impl LocalMistralRsEngine {
    pub fn new() -> Self {
        Self
    }

    /// mistral.rs reads `HF_HOME` into a process-global cache handle on its
    /// first load and ignores per-builder cache paths afterwards, so the
    /// variable has to point at our cache before that happens.
    fn init_hf_cache(model_cache_dir: &Path) {
        let root = model_cache_dir.parent().unwrap_or(model_cache_dir).to_path_buf();
        HF_CACHE_INIT.call_once(|| {
            tracing::debug!(path = %root.display(), "Pointing HF_HOME at the model cache");
            // SAFETY: runs once, before the first mistral.rs builder reads it.
            unsafe {
                std::env::set_var("HF_HOME", &root);
            }
        });
    }
}

#[async_trait]
impl ModelEngine for LocalMistralRsEngine {
    fn engine_id(&self) -> &'static str {
        "local/mistralrs"
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            supported_modalities: vec![Modality::Llm, Modality::Embedding],
        }
    }

    async fn load(&self, request: &LoadRequest) -> Result<LoadedModelHandle> {
        Self::init_hf_cache(&request.cache_dir);

        let opts: MistralRsOptions = match &request.options {
            serde_json::Value::Null => MistralRsOptions::default(),
            value => serde_json::from_value(value.clone())
                .map_err(|e| RuntimeError::Config(format!("Invalid mistralrs options: {}", e)))?,
        };
        let settings = BuildSettings::resolve(request, &opts)?;

        match request.modality {
            Modality::Embedding => load_embedding(request, &opts, &settings).await,
            Modality::Llm => load_generator(request, &opts, &settings).await,
            other => Err(RuntimeError::CapabilityMismatch(format!(
                "mistralrs engine does not support modality '{}'",
                other
            ))),
        }
    }

    async fn health(&self) -> EngineHealth {
        EngineHealth::Healthy
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MistralRsOptions {
    /// ISQ type, e.g. "Q4K", "Q8_0". Overrides the modality dtype.
    isq: Option<String>,
    #[serde(default)]
    force_cpu: bool,
    #[serde(default)]
    paged_attention: bool,
    max_num_seqs: Option<usize>,
    chat_template: Option<String>,
    tokenizer_json: Option<String>,
    /// Probed at load when absent.
    embedding_dimensions: Option<u32>,
    /// Enables GGUF mode; `model_id` is then the directory or repo holding them.
    gguf_files: Option<Vec<String>>,
}

/// Device and quantization derived from the resolved backend plus options.
#[derive(Debug, PartialEq)]
struct BuildSettings {
    isq: Option<IsqType>,
    force_cpu: bool,
}

impl BuildSettings {
    fn resolve(request: &LoadRequest, opts: &MistralRsOptions) -> Result<Self> {
        Self::from_parts(request.device(), request.dtype(), opts)
    }

    fn from_parts(device: Device, dtype: DType, opts: &MistralRsOptions) -> Result<Self> {
        let isq = match &opts.isq {
            Some(s) => Some(parse_isq_type(s)?),
            None => match dtype {
                DType::Q8 => Some(IsqType::Q8_0),
                DType::Q4 => Some(IsqType::Q4K),
                DType::Fp32 | DType::Fp16 => None,
            },
        };
        Ok(Self {
            isq,
            force_cpu: opts.force_cpu || matches!(device, Device::Cpu | Device::Wasm),
        })
    }
}

fn build_error(what: &str, e: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::Config(format!("Failed to build mistralrs {}: {}", what, e))
}

async fn load_embedding(
    request: &LoadRequest,
    opts: &MistralRsOptions,
    settings: &BuildSettings,
) -> Result<LoadedModelHandle> {
    tracing::info!(model_id = %request.model_id, "Loading mistralrs embedding model");

    let model = if let Some(files) = &opts.gguf_files {
        let mut builder = GgufModelBuilder::new(request.model_id.clone(), files.clone());
        if let Some(tmpl) = &opts.chat_template {
            builder = builder.with_chat_template(tmpl.clone());
        }
        if let Some(tok) = &opts.tokenizer_json {
            builder = builder.with_tokenizer_json(tok.clone());
        }
        if settings.force_cpu {
            builder = builder.with_force_cpu();
        }
        builder
            .with_logging()
            .build()
            .await
            .map_err(|e| build_error("GGUF embedding model", e))?
    } else {
        let mut builder = EmbeddingModelBuilder::new(&request.model_id);
        if let Some(isq) = settings.isq {
            builder = builder.with_isq(isq);
        }
        if settings.force_cpu {
            builder = builder.with_force_cpu();
        }
        if let Some(rev) = &request.revision {
            builder = builder.with_hf_revision(rev);
        }
        if let Some(max_seqs) = opts.max_num_seqs {
            builder = builder.with_max_num_seqs(max_seqs);
        }
        if let Some(tok) = &opts.tokenizer_json {
            builder = builder.with_tokenizer_json(tok);
        }
        builder
            .with_logging()
            .build()
            .await
            .map_err(|e| build_error("embedding model", e))?
    };

    let dimensions = match opts.embedding_dimensions {
        Some(d) => d,
        None => {
            let probe = model
                .generate_embedding("probe")
                .await
                .map_err(|e| build_error("embedding dimension probe", e))?;
            probe.len() as u32
        }
    };

    tracing::info!(model_id = %request.model_id, dimensions, "mistralrs embedding model loaded");

    let service = MistralRsEmbeddingService {
        model,
        model_id: request.model_id.clone(),
        dimensions,
    };
    let handle: Arc<dyn EmbeddingModel> = Arc::new(service);
    Ok(Arc::new(handle) as LoadedModelHandle)
}

async fn load_generator(
    request: &LoadRequest,
    opts: &MistralRsOptions,
    settings: &BuildSettings,
) -> Result<LoadedModelHandle> {
    tracing::info!(model_id = %request.model_id, isq = ?settings.isq, "Loading mistralrs generator model");

    let model = if let Some(files) = &opts.gguf_files {
        let mut builder = GgufModelBuilder::new(request.model_id.clone(), files.clone());
        if let Some(tmpl) = &opts.chat_template {
            builder = builder.with_chat_template(tmpl.clone());
        }
        if let Some(tok) = &opts.tokenizer_json {
            builder = builder.with_tokenizer_json(tok.clone());
        }
        if settings.force_cpu {
            builder = builder.with_force_cpu();
        }
        if opts.paged_attention {
            builder = builder
                .with_paged_attn(|| PagedAttentionMetaBuilder::default().build())
                .map_err(|e| build_error("paged attention config", e))?;
        }
        builder
            .with_logging()
            .build()
            .await
            .map_err(|e| build_error("GGUF generator model", e))?
    } else {
        let mut builder = TextModelBuilder::new(&request.model_id);
        if let Some(isq) = settings.isq {
            builder = builder.with_isq(isq);
        }
        if settings.force_cpu {
            builder = builder.with_force_cpu();
        }
        if let Some(rev) = &request.revision {
            builder = builder.with_hf_revision(rev);
        }
        if opts.paged_attention {
            builder = builder
                .with_paged_attn(|| PagedAttentionMetaBuilder::default().build())
                .map_err(|e| build_error("paged attention config", e))?;
        }
        if let Some(tmpl) = &opts.chat_template {
            builder = builder.with_chat_template(tmpl);
        }
        if let Some(tok) = &opts.tokenizer_json {
            builder = builder.with_tokenizer_json(tok);
        }
        if let Some(max_seqs) = opts.max_num_seqs {
            builder = builder.with_max_num_seqs(max_seqs);
        }
        builder
            .with_logging()
            .build()
            .await
            .map_err(|e| build_error("generator model", e))?
    };

    tracing::info!(model_id = %request.model_id, "mistralrs generator model loaded");

    let service = MistralRsGeneratorService {
        model: Arc::new(model),
    };
    let handle: Arc<dyn GeneratorModel> = Arc::new(service);
    Ok(Arc::new(handle) as LoadedModelHandle)
}

fn parse_isq_type(s: &str) -> Result<IsqType> {
    match s.to_uppercase().as_str() {
        "Q4_0" => Ok(IsqType::Q4_0),
        "Q4_1" => Ok(IsqType::Q4_1),
        "Q5_0" => Ok(IsqType::Q5_0),
        "Q5_1" => Ok(IsqType::Q5_1),
        "Q8_0" => Ok(IsqType::Q8_0),
        "Q8_1" => Ok(IsqType::Q8_1),
        "Q2K" => Ok(IsqType::Q2K),
        "Q3K" => Ok(IsqType::Q3K),
        "Q4K" => Ok(IsqType::Q4K),
        "Q5K" => Ok(IsqType::Q5K),
        "Q6K" => Ok(IsqType::Q6K),
        "Q8K" => Ok(IsqType::Q8K),
        "HQQ4" => Ok(IsqType::HQQ4),
        "HQQ8" => Ok(IsqType::HQQ8),
        other => Err(RuntimeError::Config(format!(
            "Unknown ISQ type '{}'. Valid types: Q4_0, Q4_1, Q5_0, Q5_1, Q8_0, Q8_1, \
             Q2K, Q3K, Q4K, Q5K, Q6K, Q8K, HQQ4, HQQ8",
            other
        ))),
    }
}

struct MistralRsEmbeddingService {
    model: Model,
    model_id: String,
    dimensions: u32,
}

#[async_trait]
impl EmbeddingModel for MistralRsEmbeddingService {
    async fn embed(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let request = EmbeddingRequestBuilder::new().add_prompts(texts.iter().map(|s| s.to_string()));
        self.model
            .generate_embeddings(request)
            .await
            .map_err(|e| RuntimeError::InferenceError(format!("Embedding inference failed: {}", e)))
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

struct MistralRsGeneratorService {
    model: Arc<Model>,
}

fn build_request(messages: &[Message], options: &GenerationOptions) -> RequestBuilder {
    let mut request = RequestBuilder::new();
    for msg in messages {
        let role = match msg.role {
            Role::System => TextMessageRole::System,
            Role::User => TextMessageRole::User,
            Role::Assistant => TextMessageRole::Assistant,
        };
        request = request.add_message(role, &msg.content);
    }

    if options.temperature.is_none() && options.top_p.is_none() && options.max_tokens.is_none() {
        return request.set_deterministic_sampler();
    }
    if let Some(temp) = options.temperature {
        request = request.set_sampler_temperature(temp as f64);
    }
    if let Some(top_p) = options.top_p {
        request = request.set_sampler_topp(top_p as f64);
    }
    if let Some(max_tokens) = options.max_tokens {
        request = request.set_sampler_max_len(max_tokens);
    }
    request
}

#[async_trait]
impl GeneratorModel for MistralRsGeneratorService {
    async fn generate(
        &self,
        messages: &[Message],
        options: GenerationOptions,
    ) -> Result<GenerationResult> {
        let response = self
            .model
            .send_chat_request(build_request(messages, &options))
            .await
            .map_err(|e| RuntimeError::InferenceError(format!("Generation failed: {}", e)))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("")
            .to_string();

        Ok(GenerationResult {
            text,
            usage: Some(TokenUsage {
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                total_tokens: response.usage.total_tokens,
            }),
        })
    }

    /// Generation runs on a spawned task that hands chunks over a channel of
    /// capacity 1. The engine can therefore run ahead of the consumer: one
    /// chunk waiting in the channel plus the one being generated when the
    /// task blocks on `send`. Dropping the stream cancels the request at the
    /// next send, so at most that much extra work is done.
    async fn stream(&self, messages: &[Message], options: GenerationOptions) -> Result<TokenStream> {
        let request = build_request(messages, &options);
        let model = self.model.clone();
        let (tx, mut rx) = mpsc::channel::<Result<String>>(1);

        tokio::spawn(async move {
            let upstream = match model.stream_chat_request(request).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx
                        .send(Err(RuntimeError::InferenceError(format!(
                            "Failed to start generation: {}",
                            e
                        ))))
                        .await;
                    return;
                }
            };
            let steps = futures::stream::unfold(upstream, |mut upstream| async move {
                upstream
                    .next()
                    .await
                    .map(|response| (classify(response), upstream))
            });
            pump(steps, tx).await;
        });

        Ok(Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx))))
    }
}

/// What one mistral.rs response means for the token stream.
enum Step {
    Emit(Result<String>),
    Skip,
    Stop,
}

fn classify(response: Response) -> Step {
    match response {
        Response::Chunk(chunk) => match chunk.choices.first().and_then(|c| c.delta.content.clone()) {
            Some(text) if !text.is_empty() => Step::Emit(Ok(text)),
            _ => Step::Skip,
        },
        Response::Done(_) => Step::Stop,
        Response::ModelError(msg, _) => Step::Emit(Err(RuntimeError::InferenceError(msg))),
        Response::InternalError(e) | Response::ValidationError(e) => {
            Step::Emit(Err(RuntimeError::InferenceError(e.to_string())))
        }
        _ => Step::Skip,
    }
}

/// Forward steps to `tx` until the upstream stops, fails, or the consumer
/// goes away. Returning drops `steps`, which cancels the request.
async fn pump(steps: impl futures::Stream<Item = Step>, tx: mpsc::Sender<Result<String>>) {
    let mut steps = std::pin::pin!(steps);
    while let Some(step) = steps.next().await {
        let item = match step {
            Step::Emit(item) => item,
            Step::Skip => continue,
            Step::Stop => break,
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() {
            tracing::debug!("Token consumer went away; cancelling generation");
            return;
        }
        if failed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quantized_dtype_maps_to_isq() {
        let opts = MistralRsOptions::default();
        let q4 = BuildSettings::from_parts(Device::Gpu, DType::Q4, &opts).unwrap();
        assert_eq!(q4.isq, Some(IsqType::Q4K));
        assert!(!q4.force_cpu);

        let q8 = BuildSettings::from_parts(Device::Cpu, DType::Q8, &opts).unwrap();
        assert_eq!(q8.isq, Some(IsqType::Q8_0));
        assert!(q8.force_cpu);

        let full = BuildSettings::from_parts(Device::Wasm, DType::Fp32, &opts).unwrap();
        assert_eq!(full.isq, None);
        assert!(full.force_cpu);
    }

    #[test]
    fn explicit_isq_overrides_dtype() {
        let opts: MistralRsOptions = serde_json::from_value(json!({ "isq": "q6k" })).unwrap();
        let s = BuildSettings::from_parts(Device::Gpu, DType::Q4, &opts).unwrap();
        assert_eq!(s.isq, Some(IsqType::Q6K));
    }

    #[test]
    fn unknown_isq_is_config_error() {
        assert!(matches!(parse_isq_type("Q9"), Err(RuntimeError::Config(_))));
    }

    #[test]
    fn options_reject_unknown_fields() {
        assert!(serde_json::from_value::<MistralRsOptions>(json!({ "bogus": 1 })).is_err());
    }

    fn counted_steps(produced: Arc<std::sync::atomic::AtomicUsize>) -> impl futures::Stream<Item = Step> {
        futures::stream::iter(0..100).map(move |i| {
            produced.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Step::Emit(Ok(format!("t{i}")))
        })
    }

    #[tokio::test]
    async fn pump_runs_at_most_two_chunks_ahead() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let produced = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(pump(counted_steps(produced.clone()), tx));

        assert_eq!(rx.recv().await.unwrap().unwrap(), "t0");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(produced.load(Ordering::SeqCst) <= 3);

        drop(rx);
        task.await.unwrap();
        assert!(produced.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn pump_skips_blanks_and_stops_after_error() {
        let steps = futures::stream::iter(vec![
            Step::Skip,
            Step::Emit(Ok("a".to_string())),
            Step::Emit(Err(RuntimeError::InferenceError("boom".to_string()))),
            Step::Emit(Ok("never".to_string())),
        ]);
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(pump(steps, tx));

        assert_eq!(rx.recv().await.unwrap().unwrap(), "a");
        assert!(rx.recv().await.unwrap().is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn pump_ends_at_stop() {
        let steps = futures::stream::iter(vec![
            Step::Emit(Ok("a".to_string())),
            Step::Stop,
            Step::Emit(Ok("after".to_string())),
        ]);
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(pump(steps, tx));

        assert_eq!(rx.recv().await.unwrap().unwrap(), "a");
        assert!(rx.recv().await.is_none());
    }
}
