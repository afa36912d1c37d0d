//! Quick-start example: load a local Candle embedding model, embed a few
//! sentences and compare them.
//!
//! Run with:
//! ```sh
//! cargo run --example quick_start --features provider-candle
//! ```

#[cfg(feature = "provider-candle")]
use uni_modal::api::{Modality, ModalityConfig, ProviderConfig};
#[cfg(feature = "provider-candle")]
use uni_modal::engine::candle::LocalCandleEngine;
#[cfg(feature = "provider-candle")]
use uni_modal::provider::Provider;

#[cfg(feature = "provider-candle")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // 1. Describe the modalities you need; device and precision are detected.
    let config = ProviderConfig::default().with_modality(
        Modality::Embedding,
        ModalityConfig::new("sentence-transformers/all-MiniLM-L6-v2"),
    );

    // 2. Build the provider. Nothing is downloaded yet.
    let provider = Provider::builder()
        .config(config)
        .register_engine(LocalCandleEngine::new())
        .build()
        .await?;
    println!("embedding state before first call: {:?}", provider.state(Modality::Embedding));

    // 3. The first call loads the model.
    let vectors = provider
        .embed(vec!["Hello, world!", "Rust is great for ML inference."])
        .await?
        .into_vectors();
    for v in &vectors {
        println!("dims={}, first 5: {:?}", v.len(), &v[..5.min(v.len())]);
    }

    for (a, b) in [("a cat", "a kitten"), ("a cat", "a tax return")] {
        println!("similarity({a:?}, {b:?}) = {:.3}", provider.similarity(a, b).await?);
    }

    provider.dispose();
    Ok(())
}

#[cfg(not(feature = "provider-candle"))]
fn main() {
    eprintln!("This example requires the `provider-candle` feature.");
    eprintln!("Run with: cargo run --example quick_start --features provider-candle");
}
