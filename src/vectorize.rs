//! Capability-routed vectorization of non-text content.
//!
//! The [`VectorizerRegistry`] holds an ordered list of
//! [`VectorizationAdapter`]s. [`dispatch`](VectorizerRegistry::dispatch) asks
//! each adapter in registration order whether it can handle a
//! [`ContentInput`] and hands the content to the first one that says yes.
//! New content types are supported by registering another adapter; neither
//! the registry nor the provider needs to change.

pub mod audio;
pub mod image;
pub mod video;

pub use self::audio::{AudioAdapter, AudioEncoder};
pub use self::image::{ImageAdapter, ImageEncoder};
pub use self::video::{AudioTrackExtractor, FfmpegAudioExtractor, VideoAudioAdapter};

use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Broad content family an adapter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentModality {
    Text,
    Image,
    Audio,
    Video,
}

impl ContentModality {
    /// Classify a media type by its top-level type (`image/png` → `Image`).
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let (top, _) = media_type.split_once('/')?;
        match top.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentModality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Raw content plus its declared media type.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentInput {
    pub bytes: Bytes,
    pub mime_type: Option<String>,
}

impl ContentInput {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// The effective media type: the declared one (lower-cased, parameters
    /// stripped), otherwise whatever the magic bytes say.
    pub fn media_type(&self) -> Option<String> {
        match &self.mime_type {
            Some(declared) => {
                let essence = declared.split(';').next().unwrap_or_default().trim();
                (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
            }
            None => infer::get(&self.bytes).map(|kind| kind.mime_type().to_string()),
        }
    }

    pub fn modality(&self) -> Option<ContentModality> {
        self.media_type()
            .as_deref()
            .and_then(ContentModality::from_media_type)
    }
}

/// Turns one family of content into an embedding vector.
#[async_trait]
pub trait VectorizationAdapter: Send + Sync {
    /// Short name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// The content families this adapter may claim. Every input accepted by
    /// [`can_handle`](Self::can_handle) must fall in one of them.
    fn supported_modalities(&self) -> Vec<ContentModality>;

    fn can_handle(&self, input: &ContentInput) -> bool;

    async fn embed(&self, input: &ContentInput) -> Result<Vec<f32>>;
}

/// Introspection record for one registered adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    pub name: String,
    pub modalities: Vec<ContentModality>,
}

/// Ordered adapter list with first-match dispatch.
#[derive(Default)]
pub struct VectorizerRegistry {
    adapters: RwLock<Vec<Arc<dyn VectorizationAdapter>>>,
}

impl VectorizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an adapter. Adapters registered earlier win ties.
    pub async fn register(&self, adapter: Arc<dyn VectorizationAdapter>) {
        tracing::info!(
            adapter = %adapter.name(),
            modalities = ?adapter.supported_modalities(),
            "Registered vectorization adapter"
        );
        self.adapters.write().await.push(adapter);
    }

    pub async fn len(&self) -> usize {
        self.adapters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.adapters.read().await.is_empty()
    }

    /// Registered adapters in dispatch order.
    pub async fn adapters(&self) -> Vec<Arc<dyn VectorizationAdapter>> {
        self.adapters.read().await.clone()
    }

    pub async fn describe(&self) -> Vec<AdapterInfo> {
        self.adapters
            .read()
            .await
            .iter()
            .map(|a| AdapterInfo {
                name: a.name().to_string(),
                modalities: a.supported_modalities(),
            })
            .collect()
    }

    /// Embed `input` with the first adapter that claims it.
    pub async fn dispatch(&self, input: &ContentInput) -> Result<Vec<f32>> {
        let content_modality = input.modality();
        let claimant = {
            let adapters = self.adapters.read().await;
            adapters
                .iter()
                .find(|adapter| {
                    if !adapter.can_handle(input) {
                        return false;
                    }
                    let declared = adapter.supported_modalities();
                    match content_modality {
                        Some(m) if !declared.contains(&m) => {
                            tracing::warn!(
                                adapter = %adapter.name(),
                                content = %m,
                                "Adapter claimed content outside its declared modalities; skipping"
                            );
                            false
                        }
                        _ => true,
                    }
                })
                .cloned()
        };

        let Some(adapter) = claimant else {
            metrics::counter!("vectorize.dispatch.total", "adapter" => "none", "status" => "unsupported")
                .increment(1);
            return Err(RuntimeError::UnsupportedContent(format!(
                "no adapter handles media type '{}'",
                input.media_type().as_deref().unwrap_or("unknown")
            )));
        };

        tracing::debug!(adapter = %adapter.name(), "Dispatching content");
        let result = adapter.embed(input).await;
        let status = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!(
            "vectorize.dispatch.total",
            "adapter" => adapter.name().to_string(),
            "status" => status
        )
        .increment(1);
        result
    }
}

impl std::fmt::Debug for VectorizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorizerRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{StubAudioEncoder, StubImageEncoder, png_bytes, wav_bytes};

    struct Fixed {
        name: &'static str,
        modalities: Vec<ContentModality>,
        accepts: &'static str,
        value: f32,
    }

    #[async_trait]
    impl VectorizationAdapter for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn supported_modalities(&self) -> Vec<ContentModality> {
            self.modalities.clone()
        }

        fn can_handle(&self, input: &ContentInput) -> bool {
            input
                .media_type()
                .is_some_and(|m| m.starts_with(self.accepts))
        }

        async fn embed(&self, _input: &ContentInput) -> Result<Vec<f32>> {
            Ok(vec![self.value])
        }
    }

    fn fixed(name: &'static str, m: ContentModality, accepts: &'static str, value: f32) -> Arc<Fixed> {
        Arc::new(Fixed {
            name,
            modalities: vec![m],
            accepts,
            value,
        })
    }

    #[test]
    fn media_type_prefers_declared_then_sniffs() {
        let declared = ContentInput::new(vec![0u8; 4]).with_mime_type("Audio/WAV; codecs=1");
        assert_eq!(declared.media_type().as_deref(), Some("audio/wav"));

        let sniffed = ContentInput::new(png_bytes(2, 2, [0, 0, 0]));
        assert_eq!(sniffed.media_type().as_deref(), Some("image/png"));
        assert_eq!(sniffed.modality(), Some(ContentModality::Image));

        assert_eq!(ContentInput::new(vec![1u8, 2, 3]).media_type(), None);
    }

    #[tokio::test]
    async fn first_registered_claimant_wins() {
        let registry = VectorizerRegistry::new();
        registry
            .register(fixed("first", ContentModality::Image, "image/", 1.0))
            .await;
        registry
            .register(fixed("second", ContentModality::Image, "image/", 2.0))
            .await;

        let input = ContentInput::new(vec![0u8]).with_mime_type("image/png");
        assert_eq!(registry.dispatch(&input).await.unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn unclaimed_content_is_unsupported() {
        let registry = VectorizerRegistry::new();
        registry
            .register(fixed("img", ContentModality::Image, "image/", 1.0))
            .await;

        let input = ContentInput::new(vec![0u8]).with_mime_type("application/pdf");
        let err = registry.dispatch(&input).await.unwrap_err();
        assert!(matches!(err, RuntimeError::UnsupportedContent(_)));
    }

    #[tokio::test]
    async fn claims_outside_declared_modalities_are_ignored() {
        let registry = VectorizerRegistry::new();
        // Claims audio but only declares image.
        registry
            .register(fixed("liar", ContentModality::Image, "audio/", 9.0))
            .await;
        registry
            .register(fixed("honest", ContentModality::Audio, "audio/", 3.0))
            .await;

        let input = ContentInput::new(vec![0u8]).with_mime_type("audio/wav");
        assert_eq!(registry.dispatch(&input).await.unwrap(), vec![3.0]);
    }

    #[tokio::test]
    async fn builtin_adapters_route_by_content() {
        let registry = VectorizerRegistry::new();
        registry
            .register(Arc::new(ImageAdapter::new(Arc::new(StubImageEncoder {
                size: (4, 4),
            }))))
            .await;
        registry
            .register(Arc::new(AudioAdapter::new(Arc::new(StubAudioEncoder {
                sample_rate: 8_000,
            }))))
            .await;

        let image = ContentInput::new(png_bytes(8, 8, [255, 0, 0])).with_mime_type("image/png");
        let v = registry.dispatch(&image).await.unwrap();
        assert!((v[0] - 1.0).abs() < 1e-3 && v[1].abs() < 1e-3);

        let audio = ContentInput::new(wav_bytes(16_000, 16_000));
        let v = registry.dispatch(&audio).await.unwrap();
        assert_eq!(v[0], 8_000.0);

        let info = registry.describe().await;
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].modalities, vec![ContentModality::Image]);
    }
}
