use super::{ContentInput, ContentModality, VectorizationAdapter};
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use image::RgbImage;
use image::imageops::FilterType;
use std::sync::Arc;

/// Media types the bundled `image` codecs can decode.
const DECODABLE: &[&str] = &["image/png", "image/jpeg", "image/jpg"];

/// Model that turns a fixed-size RGB image into a vector.
#[async_trait]
pub trait ImageEncoder: Send + Sync {
    /// `(width, height)` the encoder expects.
    fn input_size(&self) -> (u32, u32);

    async fn encode(&self, image: &RgbImage) -> Result<Vec<f32>>;
}

/// Decodes PNG/JPEG content, resizes it to the encoder's input size and
/// delegates to an [`ImageEncoder`].
pub struct ImageAdapter {
    encoder: Arc<dyn ImageEncoder>,
}

impl ImageAdapter {
    pub fn new(encoder: Arc<dyn ImageEncoder>) -> Self {
        Self { encoder }
    }
}

#[async_trait]
impl VectorizationAdapter for ImageAdapter {
    fn name(&self) -> &str {
        "image"
    }

    fn supported_modalities(&self) -> Vec<ContentModality> {
        vec![ContentModality::Image]
    }

    fn can_handle(&self, input: &ContentInput) -> bool {
        input
            .media_type()
            .is_some_and(|m| DECODABLE.contains(&m.as_str()))
    }

    async fn embed(&self, input: &ContentInput) -> Result<Vec<f32>> {
        let bytes = input.bytes.clone();
        let (width, height) = self.encoder.input_size();
        let rgb = tokio::task::spawn_blocking(move || -> Result<RgbImage> {
            let decoded = image::load_from_memory(&bytes)
                .map_err(|e| RuntimeError::InvalidInput(format!("Failed to decode image: {}", e)))?
                .to_rgb8();
            if decoded.dimensions() == (width, height) {
                return Ok(decoded);
            }
            Ok(image::imageops::resize(
                &decoded,
                width,
                height,
                FilterType::Triangle,
            ))
        })
        .await
        .map_err(|e| RuntimeError::InferenceError(format!("Image decode task failed: {}", e)))??;

        self.encoder.encode(&rgb).await
    }
}
