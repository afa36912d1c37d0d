//! Error types for the uni-modal provider runtime.

use crate::api::Modality;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Unified error type covering configuration, lifecycle, content routing and
/// inference failures.
///
/// Every payload is owned text or a [`Modality`], so the error is `Clone`: a
/// single load outcome is handed verbatim to every caller that joined the
/// in-flight load.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// Invalid or missing configuration (empty model id, bad options, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested engine ID is not registered with the provider.
    #[error("Engine not found: {0}")]
    EngineNotFound(String),

    /// An engine was asked to load a modality it does not support.
    #[error("Capability mismatch: {0}")]
    CapabilityMismatch(String),

    /// The modality is absent from the provider configuration or explicitly
    /// skipped. Not retryable without reconfiguration.
    #[error("Model not configured for modality '{0}'")]
    ModelNotConfigured(Modality),

    /// An operation ran before a successful load and no implicit warmup
    /// applies. Call [`Provider::warmup`](crate::provider::Provider::warmup)
    /// first.
    #[error("Model not loaded for modality '{0}'")]
    ModelNotLoaded(Modality),

    /// The engine failed to materialize the model (missing files, backend
    /// unavailable, load timeout, ...). A later `warmup` may retry.
    #[error("Load failed for modality '{modality}': {cause}")]
    LoadFailed {
        /// Modality whose load failed.
        modality: Modality,
        /// Human-readable cause reported by the engine.
        cause: String,
    },

    /// The modality was disposed. Fatal for that provider instance.
    #[error("Modality '{0}' has been disposed")]
    Disposed(Modality),

    /// No vectorization adapter claims the content.
    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    /// The caller supplied malformed input (undecodable audio, bad image, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An error during model inference (tokenization, forward pass, etc.).
    #[error("Inference error: {0}")]
    InferenceError(String),
}

impl RuntimeError {
    /// Returns `true` for failures that may succeed when retried without
    /// reconfiguring the provider. Only [`LoadFailed`](Self::LoadFailed)
    /// qualifies: the controller moves to `Error`, from which a new load may
    /// start.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LoadFailed { .. })
    }

    /// Shorthand for building a [`LoadFailed`](Self::LoadFailed) error.
    pub fn load_failed(modality: Modality, cause: impl std::fmt::Display) -> Self {
        Self::LoadFailed {
            modality,
            cause: cause.to_string(),
        }
    }
}
