use crate::api::{DType as Precision, Device as Backend, Modality};
use crate::cache::{ProgressEvent, report};
use crate::error::{Result, RuntimeError};
use crate::traits::{
    EmbeddingModel, EngineCapabilities, EngineHealth, LoadRequest, LoadedModelHandle, ModelEngine,
};
use async_trait::async_trait;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::jina_bert::{
    BertModel as JinaBertModel, Config as JinaBertConfig,
};
use hf_hub::{Repo, RepoType, api::tokio::ApiBuilder};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

const DEFAULT_MAX_LENGTH: usize = 512;

/// Files fetched for every model, in download order.
const MODEL_FILES: [&str; 3] = ["config.json", "tokenizer.json", "model.safetensors"];

#[derive(Deserialize, Debug)]
struct BaseConfig {
    architectures: Option<Vec<String>>,
    hidden_size: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ModelArchitecture {
    Bert,
    JinaBert,
}

impl ModelArchitecture {
    fn from_config(config: &BaseConfig) -> Result<Self> {
        if let Some(archs) = &config.architectures
            && let Some(arch) = archs.first()
        {
            return match arch.as_str() {
                "BertModel" | "BertForMaskedLM" => Ok(Self::Bert),
                "JinaBertModel" | "JinaBertForMaskedLM" => Ok(Self::JinaBert),
                _ => Err(RuntimeError::Config(format!(
                    "Unsupported architecture: {}",
                    arch
                ))),
            };
        }
        // Sentence-transformers exports often omit `architectures`.
        Ok(Self::Bert)
    }
}

/// Expand short aliases (`all-MiniLM-L6-v2`, `bge-small-en-v1.5`, ...) to
/// HuggingFace repo ids. Anything else is used as given.
pub fn resolve_model_id(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminilml6v2" | "default" => {
            "sentence-transformers/all-MiniLM-L6-v2".to_string()
        }
        "bge-small-en-v1.5" | "bgesmallenv15" => "BAAI/bge-small-en-v1.5".to_string(),
        "bge-base-en-v1.5" | "bgebaseenv15" => "BAAI/bge-base-en-v1.5".to_string(),
        _ => name.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CandleOptions {
    normalize: bool,
    max_length: usize,
}

impl CandleOptions {
    fn from_value(options: &serde_json::Value) -> Self {
        Self {
            normalize: options
                .get("normalize")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            max_length: options
                .get("max_length")
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_MAX_LENGTH),
        }
    }
}

/// Pick the candle device for a resolved backend. `Wasm` is the portable
/// path and runs on the CPU.
fn select_device(backend: Backend) -> Result<Device> {
    match backend {
        Backend::Cpu | Backend::Wasm => Ok(Device::Cpu),
        Backend::Gpu => {
            if candle_core::utils::cuda_is_available() {
                Device::new_cuda(0).map_err(|e| RuntimeError::Config(e.to_string()))
            } else if candle_core::utils::metal_is_available() {
                Device::new_metal(0).map_err(|e| RuntimeError::Config(e.to_string()))
            } else {
                tracing::warn!("GPU requested but candle was built without CUDA or Metal; using CPU");
                Ok(Device::Cpu)
            }
        }
    }
}

fn select_dtype(precision: Precision, device: &Device) -> Result<DType> {
    match precision {
        Precision::Fp32 => Ok(DType::F32),
        Precision::Fp16 if device.is_cpu() => {
            tracing::warn!("fp16 is not supported for candle BERT on CPU; using fp32");
            Ok(DType::F32)
        }
        Precision::Fp16 => Ok(DType::F16),
        Precision::Q8 | Precision::Q4 => Err(RuntimeError::Config(format!(
            "Candle engine cannot load safetensors weights at {} precision",
            precision
        ))),
    }
}

/// Local text-embedding engine using the [Candle](https://github.com/huggingface/candle)
/// ML framework.
///
/// Supports Bert and JinaBert architectures. Weights are fetched from
/// HuggingFace Hub into the modality's cache directory when the model is
/// loaded; embeddings are mean-pooled and (by default) L2-normalized.
#[derive(Default)]
pub struct LocalCandleEngine;

impl LocalCandleEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelEngine for LocalCandleEngine {
    fn engine_id(&self) -> &'static str {
        "local/candle"
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            supported_modalities: vec![Modality::Embedding],
        }
    }

    async fn load(&self, request: &LoadRequest) -> Result<LoadedModelHandle> {
        if request.modality != Modality::Embedding {
            return Err(RuntimeError::CapabilityMismatch(format!(
                "Candle engine does not support modality '{}'",
                request.modality
            )));
        }

        let model = CandleEmbeddingModel::load(request).await?;
        let handle: Arc<dyn EmbeddingModel> = Arc::new(model);
        Ok(Arc::new(handle) as LoadedModelHandle)
    }

    async fn health(&self) -> EngineHealth {
        EngineHealth::Healthy
    }
}

enum InnerModel {
    Bert(BertModel),
    JinaBert(JinaBertModel),
}

struct LoadedModel {
    model: InnerModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// A loaded Candle sentence-embedding model.
pub struct CandleEmbeddingModel {
    model_id: String,
    dimensions: u32,
    normalize: bool,
    inner: Arc<LoadedModel>,
}

impl CandleEmbeddingModel {
    async fn load(request: &LoadRequest) -> Result<Self> {
        let model_id = resolve_model_id(&request.model_id);
        let options = CandleOptions::from_value(&request.options);
        let device = select_device(request.device())?;
        let dtype = select_dtype(request.dtype(), &device)?;

        let api = ApiBuilder::new()
            .with_cache_dir(request.cache_dir.clone())
            .with_progress(false)
            .build()
            .map_err(|e| RuntimeError::Config(e.to_string()))?;
        let repo = match &request.revision {
            Some(rev) => Repo::with_revision(model_id.clone(), RepoType::Model, rev.clone()),
            None => Repo::model(model_id.clone()),
        };
        let api_repo = api.repo(repo);

        let mut paths: Vec<PathBuf> = Vec::with_capacity(MODEL_FILES.len());
        for file in MODEL_FILES {
            let path = api_repo
                .get(file)
                .await
                .map_err(|e| RuntimeError::Config(format!("Failed to fetch {}: {}", file, e)))?;
            report(
                request.progress.as_ref(),
                ProgressEvent::Progress {
                    model: model_id.clone(),
                    file: file.to_string(),
                    percent: 100.0,
                },
            );
            paths.push(path);
        }
        report(
            request.progress.as_ref(),
            ProgressEvent::Done {
                model: model_id.clone(),
            },
        );

        let [config_path, tokenizer_path, weights_path]: [PathBuf; 3] = paths
            .try_into()
            .map_err(|_| RuntimeError::Config("Incomplete model download".to_string()))?;

        let loading_device = device.clone();
        let (loaded, dimensions) = tokio::task::spawn_blocking(move || {
            build_model(
                &config_path,
                &tokenizer_path,
                weights_path,
                loading_device,
                dtype,
                options.max_length,
            )
        })
        .await
        .map_err(|e| RuntimeError::Config(format!("Model build task failed: {}", e)))??;

        tracing::info!(
            model = %model_id,
            dimensions,
            device = ?device,
            "Candle embedding model loaded"
        );

        Ok(Self {
            model_id,
            dimensions,
            normalize: options.normalize,
            inner: Arc::new(loaded),
        })
    }
}

fn build_model(
    config_path: &std::path::Path,
    tokenizer_path: &std::path::Path,
    weights_path: PathBuf,
    device: Device,
    dtype: DType,
    max_length: usize,
) -> Result<(LoadedModel, u32)> {
    let config_contents =
        std::fs::read_to_string(config_path).map_err(|e| RuntimeError::Config(e.to_string()))?;
    let base_config: BaseConfig =
        serde_json::from_str(&config_contents).map_err(|e| RuntimeError::Config(e.to_string()))?;
    let arch = ModelArchitecture::from_config(&base_config)?;
    let dimensions = base_config.hidden_size.ok_or_else(|| {
        RuntimeError::Config("config.json does not declare hidden_size".to_string())
    })?;
    tracing::debug!(architecture = ?arch, "Detected model architecture");

    let mut tokenizer = Tokenizer::from_file(tokenizer_path)
        .map_err(|e| RuntimeError::Config(format!("Failed to load tokenizer: {}", e)))?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| RuntimeError::Config(format!("Failed to set truncation: {}", e)))?;

    // SAFETY: the weights file lives in our cache directory and is not
    // modified while mapped.
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], dtype, &device)
            .map_err(|e| RuntimeError::Config(e.to_string()))?
    };

    let model = match arch {
        ModelArchitecture::Bert => {
            let config: BertConfig = serde_json::from_str(&config_contents)
                .map_err(|e| RuntimeError::Config(e.to_string()))?;
            InnerModel::Bert(
                BertModel::load(vb, &config).map_err(|e| RuntimeError::Config(e.to_string()))?,
            )
        }
        ModelArchitecture::JinaBert => {
            let config: JinaBertConfig = serde_json::from_str(&config_contents)
                .map_err(|e| RuntimeError::Config(e.to_string()))?;
            InnerModel::JinaBert(
                JinaBertModel::new(vb, &config).map_err(|e| RuntimeError::Config(e.to_string()))?,
            )
        }
    };

    Ok((
        LoadedModel {
            model,
            tokenizer,
            device,
        },
        dimensions,
    ))
}

impl LoadedModel {
    fn embed(&self, texts: Vec<String>, normalize: bool) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| RuntimeError::InferenceError(format!("Tokenization failed: {}", e)))?;
        self.forward_pooled(&encodings, normalize)
            .map_err(|e| RuntimeError::InferenceError(e.to_string()))
    }

    fn forward_pooled(
        &self,
        encodings: &[tokenizers::Encoding],
        normalize: bool,
    ) -> candle_core::Result<Vec<Vec<f32>>> {
        let batch_size = encodings.len();
        let seq_len = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);

        let flatten = |f: fn(&tokenizers::Encoding) -> &[u32]| -> Vec<i64> {
            encodings
                .iter()
                .flat_map(|e| f(e).iter().map(|&x| x as i64))
                .collect()
        };
        let input_ids = Tensor::from_vec(
            flatten(tokenizers::Encoding::get_ids),
            (batch_size, seq_len),
            &self.device,
        )?;
        let attention_mask = Tensor::from_vec(
            flatten(tokenizers::Encoding::get_attention_mask),
            (batch_size, seq_len),
            &self.device,
        )?;
        let token_type_ids = Tensor::from_vec(
            flatten(tokenizers::Encoding::get_type_ids),
            (batch_size, seq_len),
            &self.device,
        )?;

        let hidden = match &self.model {
            InnerModel::Bert(m) => m.forward(&input_ids, &token_type_ids, Some(&attention_mask))?,
            InnerModel::JinaBert(m) => m.forward(&input_ids)?,
        }
        .to_dtype(DType::F32)?;

        // Mean pooling over non-padding tokens.
        let mask = attention_mask.to_dtype(DType::F32)?;
        let summed = hidden
            .broadcast_mul(&mask.unsqueeze(2)?)?
            .sum(1)?;
        let counts = mask.sum_keepdim(1)?.clamp(1e-9, f64::MAX)?;
        let mut pooled = summed.broadcast_div(&counts)?;

        if normalize {
            let norm = pooled
                .sqr()?
                .sum_keepdim(1)?
                .sqrt()?
                .clamp(1e-12, f64::MAX)?;
            pooled = pooled.broadcast_div(&norm)?;
        }

        pooled.to_vec2()
    }
}

#[async_trait]
impl EmbeddingModel for CandleEmbeddingModel {
    async fn embed(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let owned: Vec<String> = texts.into_iter().map(str::to_string).collect();
        let inner = self.inner.clone();
        let normalize = self.normalize;
        tokio::task::spawn_blocking(move || inner.embed(owned, normalize))
            .await
            .map_err(|e| RuntimeError::InferenceError(format!("Embedding task failed: {}", e)))?
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
