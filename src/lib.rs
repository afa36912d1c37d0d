//! Runtime-agnostic façade over locally executed ML models.
//!
//! Uni-Modal exposes one stable API for text generation, text embedding,
//! speech synthesis and speech recognition, independent of the engine that
//! runs the model (Candle, FastEmbed, mistral.rs, or anything implementing
//! [`ModelEngine`](traits::ModelEngine)) and of the compute backend (CPU,
//! portable WASM-class CPU path, GPU).
//!
//! # Key concepts
//!
//! - **[`Provider`](provider::Provider)**: the façade. Holds one
//!   [`LifecycleController`](lifecycle::LifecycleController) per modality and
//!   the [`VectorizerRegistry`](vectorize::VectorizerRegistry) for non-text
//!   content.
//! - **[`ProviderConfig`](api::ProviderConfig)**: per-modality
//!   [`ModalityConfig`](api::ModalityConfig) (model id, device, dtype, cache
//!   directory, warmup policy).
//! - **Lifecycle**: a modality loads at most once at a time; concurrent
//!   callers share the in-flight load, and `dispose` releases everything.
//! - **[`device::detect`]**: probes the host once and picks the backend a
//!   modality runs on when its config does not say.
//! - **Vectorization adapters**: image, audio, and video (through its audio
//!   track) content is routed to the first adapter that claims it.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use uni_modal::api::{Modality, ModalityConfig, ProviderConfig};
//! use uni_modal::provider::Provider;
//! # #[cfg(feature = "provider-candle")]
//! use uni_modal::engine::candle::LocalCandleEngine;
//!
//! # #[cfg(feature = "provider-candle")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProviderConfig::default().with_modality(
//!     Modality::Embedding,
//!     ModalityConfig::new("sentence-transformers/all-MiniLM-L6-v2"),
//! );
//!
//! let provider = Provider::builder()
//!     .config(config)
//!     .register_engine(LocalCandleEngine::new())
//!     .build()
//!     .await?;
//!
//! let score = provider.similarity("a cat", "a kitten").await?;
//! provider.dispose();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod audio;
pub mod cache;
pub mod compat;
pub mod device;
pub mod engine;
pub mod error;
pub mod lifecycle;
mod options_validation;
pub mod provider;
pub mod stream;
pub mod traits;
pub mod vectorize;

#[cfg(test)]
mod mock;
