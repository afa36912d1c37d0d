//! Public API types for configuring modalities, backends, and conversations.

use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One of the four model kinds a provider can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Text generation (completion, chat, streaming).
    Llm,
    /// Text embedding.
    Embedding,
    /// Speech synthesis (text to speech).
    Tts,
    /// Speech recognition (speech to text).
    Asr,
}

impl Modality {
    /// Every modality, in configuration order.
    pub const ALL: [Modality; 4] = [Self::Llm, Self::Embedding, Self::Tts, Self::Asr];

    /// The configuration key for this modality.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Embedding => "embedding",
            Self::Tts => "tts",
            Self::Asr => "asr",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution backend for a modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Native CPU execution.
    Cpu,
    /// Portable, non-accelerated execution path. Used as the fallback when
    /// accelerated compute was requested but is unavailable.
    Wasm,
    /// GPU-accelerated compute (CUDA or Metal, whichever is compiled in).
    Gpu,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Wasm => write!(f, "wasm"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

/// Numeric precision the weights are loaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Fp32,
    Fp16,
    /// 8-bit quantized.
    Q8,
    /// 4-bit quantized.
    Q4,
}

impl DType {
    /// Whether this precision requires a quantized weight format.
    pub fn is_quantized(&self) -> bool {
        matches!(self, Self::Q8 | Self::Q4)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fp32 => write!(f, "fp32"),
            Self::Fp16 => write!(f, "fp16"),
            Self::Q8 => write!(f, "q8"),
            Self::Q4 => write!(f, "q4"),
        }
    }
}

/// Controls when a modality (or an engine) is initialized during provider
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WarmupPolicy {
    /// Load during [`ProviderBuilder::build`](crate::provider::ProviderBuilder::build).
    /// Construction blocks until the load completes (or fails).
    Eager,
    /// Defer loading until `warmup` or the first request. This is the default.
    #[default]
    Lazy,
    /// Spawn loading in a background task at construction. Requests that
    /// arrive before it finishes join the in-flight load.
    Background,
}

impl std::fmt::Display for WarmupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eager => write!(f, "eager"),
            Self::Lazy => write!(f, "lazy"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// Configuration for a single modality. Immutable once the provider is built.
///
/// # Example JSON
///
/// ```json
/// {
///   "model": "sentence-transformers/all-MiniLM-L6-v2",
///   "device": "cpu",
///   "dtype": "fp32",
///   "cacheDir": "/var/cache/models"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityConfig {
    /// Model identifier understood by the engine, typically a HuggingFace
    /// repo ID.
    pub model: String,
    /// Requested backend. Detected from host capabilities when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    /// Requested precision. Detected from host capabilities when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DType>,
    /// Keep the entry but treat the modality as unconfigured.
    #[serde(default)]
    pub skip: bool,
    /// Directory the engine stores weights in. Overrides the provider-wide
    /// cache root.
    #[serde(default, alias = "cacheDir", skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Engine ID (e.g. `"local/candle"`). The first registered engine that
    /// supports the modality is used when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Optional HuggingFace revision (branch, tag, or commit hash).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// When the model is loaded. Defaults to [`WarmupPolicy::Lazy`].
    #[serde(default)]
    pub warmup: WarmupPolicy,
    /// If `true`, a failed eager warmup aborts provider construction.
    #[serde(default)]
    pub required: bool,
    /// Load timeout in seconds. `None` means the load is never cut short.
    #[serde(default, alias = "loadTimeout", skip_serializing_if = "Option::is_none")]
    pub load_timeout: Option<u64>,
    /// Engine-specific options (e.g. `{"isq": "Q4K"}` for mistral.rs).
    #[serde(default)]
    pub options: serde_json::Value,
}

impl ModalityConfig {
    /// A lazily-loaded configuration for `model` with detected backend and
    /// precision.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            device: None,
            dtype: None,
            skip: false,
            cache_dir: None,
            engine: None,
            revision: None,
            warmup: WarmupPolicy::Lazy,
            required: false,
            load_timeout: None,
            options: serde_json::Value::Null,
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with_warmup(mut self, warmup: WarmupPolicy) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Load timeout in seconds.
    pub fn with_load_timeout(mut self, secs: u64) -> Self {
        self.load_timeout = Some(secs);
        self
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    /// Mark the entry as skipped.
    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Validate invariants: the model id must be non-empty and the load
    /// timeout non-zero when set.
    pub fn validate(&self, modality: Modality) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(RuntimeError::Config(format!(
                "Model id for modality '{}' cannot be empty",
                modality
            )));
        }
        if self.load_timeout == Some(0) {
            return Err(RuntimeError::Config(format!(
                "Load timeout for modality '{}' must be greater than 0",
                modality
            )));
        }
        Ok(())
    }
}

fn default_auto_warmup() -> bool {
    true
}

/// Mapping from modality to its optional configuration, plus provider-wide
/// settings.
///
/// # Example JSON
///
/// ```json
/// {
///   "llm": { "model": "Qwen/Qwen2.5-0.5B-Instruct", "engine": "local/mistralrs" },
///   "embedding": { "model": "all-MiniLM-L6-v2", "warmup": "eager" },
///   "cache_dir": "/var/cache/models",
///   "auto_warmup": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<ModalityConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<ModalityConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<ModalityConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asr: Option<ModalityConfig>,
    /// Cache root shared by every modality that does not set its own
    /// `cache_dir`.
    #[serde(default, alias = "cacheDir", skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// When `true` (the default), every operation on a configured but not yet
    /// loaded modality loads it first. When `false`, such operations fail
    /// with [`RuntimeError::ModelNotLoaded`] until `warmup` is called.
    #[serde(default = "default_auto_warmup", alias = "autoWarmup")]
    pub auto_warmup: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            llm: None,
            embedding: None,
            tts: None,
            asr: None,
            cache_dir: None,
            auto_warmup: true,
        }
    }
}

impl ProviderConfig {
    /// Set the configuration for `modality`, replacing any previous entry.
    pub fn with_modality(mut self, modality: Modality, config: ModalityConfig) -> Self {
        *self.slot_mut(modality) = Some(config);
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_auto_warmup(mut self, enabled: bool) -> Self {
        self.auto_warmup = enabled;
        self
    }

    /// The raw entry for `modality`, including skipped ones.
    pub fn get(&self, modality: Modality) -> Option<&ModalityConfig> {
        match modality {
            Modality::Llm => self.llm.as_ref(),
            Modality::Embedding => self.embedding.as_ref(),
            Modality::Tts => self.tts.as_ref(),
            Modality::Asr => self.asr.as_ref(),
        }
    }

    fn slot_mut(&mut self, modality: Modality) -> &mut Option<ModalityConfig> {
        match modality {
            Modality::Llm => &mut self.llm,
            Modality::Embedding => &mut self.embedding,
            Modality::Tts => &mut self.tts,
            Modality::Asr => &mut self.asr,
        }
    }

    /// The entry for `modality` if present and not skipped.
    pub fn active(&self, modality: Modality) -> Option<&ModalityConfig> {
        self.get(modality).filter(|c| !c.skip)
    }

    /// Iterate over every present, non-skipped modality.
    pub fn configured(&self) -> impl Iterator<Item = (Modality, &ModalityConfig)> {
        Modality::ALL
            .into_iter()
            .filter_map(|m| self.active(m).map(|c| (m, c)))
    }

    /// Validate every present entry (skipped ones included, so a typo does not
    /// hide until the entry is re-enabled).
    pub fn validate(&self) -> Result<()> {
        for modality in Modality::ALL {
            if let Some(config) = self.get(modality) {
                config.validate(modality)?;
            }
        }
        Ok(())
    }

    /// Parse a `ProviderConfig` from a JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| RuntimeError::Config(format!("Invalid provider config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a `ProviderConfig` from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| RuntimeError::Config(format!("Invalid provider config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a `ProviderConfig` from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!(
                "Failed to read provider config '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&contents)
    }
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation. Order in the slice is the only identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}
