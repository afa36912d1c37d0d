use crate::api::Modality;
use crate::cache::{ProgressEvent, report};
use crate::error::{Result, RuntimeError};
use crate::traits::{
    EmbeddingModel, EngineCapabilities, EngineHealth, LoadRequest, LoadedModelHandle, ModelEngine,
};
use anyhow::anyhow;
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;

/// Local embedding engine using [FastEmbed](https://github.com/Anush008/fastembed-rs)
/// (ONNX Runtime).
///
/// FastEmbed ships its own quantized ONNX exports, so the requested precision
/// is expressed through the model name (`...Q` variants) rather than `dtype`.
#[derive(Default)]
pub struct LocalFastEmbedEngine;

impl LocalFastEmbedEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelEngine for LocalFastEmbedEngine {
    fn engine_id(&self) -> &'static str {
        "local/fastembed"
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            supported_modalities: vec![Modality::Embedding],
        }
    }

    async fn load(&self, request: &LoadRequest) -> Result<LoadedModelHandle> {
        if request.modality != Modality::Embedding {
            return Err(RuntimeError::CapabilityMismatch(format!(
                "FastEmbed engine does not support modality '{}'",
                request.modality
            )));
        }

        let model_name = request.model_id.clone();
        let cache_dir = request.cache_dir.clone();
        if request.dtype().is_quantized() && !model_name.ends_with('Q') {
            tracing::warn!(
                model = %model_name,
                "FastEmbed selects quantization by model name; dtype is ignored"
            );
        }

        // ONNX session creation blocks.
        let service =
            tokio::task::spawn_blocking(move || FastEmbedService::new(&model_name, cache_dir))
                .await
                .map_err(|e| RuntimeError::Config(format!("Join error: {}", e)))?
                .map_err(|e| RuntimeError::Config(e.to_string()))?;

        report(
            request.progress.as_ref(),
            ProgressEvent::Done {
                model: request.model_id.clone(),
            },
        );

        let handle: Arc<dyn EmbeddingModel> = Arc::new(service);
        Ok(Arc::new(handle) as LoadedModelHandle)
    }

    async fn health(&self) -> EngineHealth {
        EngineHealth::Healthy
    }
}

/// Stack size for embedding threads.
const EMBEDDING_THREAD_STACK_SIZE: usize = 8 * 1024 * 1024;

fn parse_model_name(name: &str) -> Option<(FastEmbedModel, u32)> {
    let parsed = match name {
        "AllMiniLML6V2" | "all-MiniLM-L6-v2" => (FastEmbedModel::AllMiniLML6V2, 384),
        "AllMiniLML6V2Q" => (FastEmbedModel::AllMiniLML6V2Q, 384),
        "AllMiniLML12V2" => (FastEmbedModel::AllMiniLML12V2, 384),
        "AllMiniLML12V2Q" => (FastEmbedModel::AllMiniLML12V2Q, 384),
        "BGESmallENV15" | "bge-small-en-v1.5" => (FastEmbedModel::BGESmallENV15, 384),
        "BGESmallENV15Q" => (FastEmbedModel::BGESmallENV15Q, 384),
        "MultilingualE5Small" | "multilingual-e5-small" => {
            (FastEmbedModel::MultilingualE5Small, 384)
        }
        "BGESmallZHV15" => (FastEmbedModel::BGESmallZHV15, 512),
        "AllMpnetBaseV2" | "all-mpnet-base-v2" => (FastEmbedModel::AllMpnetBaseV2, 768),
        "BGEBaseENV15" | "bge-base-en-v1.5" => (FastEmbedModel::BGEBaseENV15, 768),
        "BGEBaseENV15Q" => (FastEmbedModel::BGEBaseENV15Q, 768),
        "NomicEmbedTextV15" | "nomic-embed-text-v1.5" => (FastEmbedModel::NomicEmbedTextV15, 768),
        "NomicEmbedTextV15Q" => (FastEmbedModel::NomicEmbedTextV15Q, 768),
        "MultilingualE5Base" | "multilingual-e5-base" => (FastEmbedModel::MultilingualE5Base, 768),
        "BGELargeENV15" | "bge-large-en-v1.5" => (FastEmbedModel::BGELargeENV15, 1024),
        "BGELargeENV15Q" => (FastEmbedModel::BGELargeENV15Q, 1024),
        "BGEM3" => (FastEmbedModel::BGEM3, 1024),
        "MultilingualE5Large" | "multilingual-e5-large" => {
            (FastEmbedModel::MultilingualE5Large, 1024)
        }
        "MxbaiEmbedLargeV1" | "mxbai-embed-large-v1" => (FastEmbedModel::MxbaiEmbedLargeV1, 1024),
        _ => return None,
    };
    Some(parsed)
}

/// Wrapper around a [`TextEmbedding`] instance.
///
/// Each inference call runs on a short-lived worker thread with a larger
/// stack to satisfy ONNX Runtime.
pub struct FastEmbedService {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimensions: u32,
}

impl FastEmbedService {
    pub fn new(model_name: &str, cache_dir: PathBuf) -> anyhow::Result<Self> {
        let (variant, dimensions) = parse_model_name(model_name)
            .ok_or_else(|| anyhow!("Unsupported FastEmbed model: {}", model_name))?;

        let options = InitOptions::new(variant).with_cache_dir(cache_dir);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| anyhow!("Failed to initialize FastEmbed model: {}", e))?;

        tracing::info!(model = %model_name, dimensions, "FastEmbed model loaded");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: model_name.to_string(),
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingModel for FastEmbedService {
    async fn embed(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let texts: Vec<String> = texts.into_iter().map(str::to_string).collect();
        let model = self.model.clone();
        let (tx, rx) = oneshot::channel();

        thread::Builder::new()
            .name("fastembed-worker".to_string())
            .stack_size(EMBEDDING_THREAD_STACK_SIZE)
            .spawn(move || {
                let result = model
                    .lock()
                    .map_err(|_| anyhow!("Embedding model lock poisoned"))
                    .and_then(|mut guard| {
                        guard
                            .embed(texts, None)
                            .map_err(|e| anyhow!("FastEmbed error: {}", e))
                    });
                let _ = tx.send(result);
            })
            .map_err(|e| {
                RuntimeError::InferenceError(format!("Failed to spawn embedding thread: {}", e))
            })?;

        rx.await
            .map_err(|_| RuntimeError::InferenceError("Embedding thread panicked".to_string()))?
            .map_err(|e| RuntimeError::InferenceError(e.to_string()))
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }
}
