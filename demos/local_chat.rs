//! Streamed chat with a local model through mistral.rs.
//!
//! Run with:
//! ```sh
//! cargo run --example local_chat --features provider-mistralrs -- "Why is the sky blue?"
//! ```
//!
//! Set `UNI_MODAL_CHAT_MODEL` to use another Hugging Face model.

#[cfg(feature = "provider-mistralrs")]
use futures::StreamExt;
#[cfg(feature = "provider-mistralrs")]
use std::io::Write;
#[cfg(feature = "provider-mistralrs")]
use uni_modal::api::{DType, Message, Modality, ModalityConfig, ProviderConfig};
#[cfg(feature = "provider-mistralrs")]
use uni_modal::engine::mistralrs::LocalMistralRsEngine;
#[cfg(feature = "provider-mistralrs")]
use uni_modal::provider::Provider;
#[cfg(feature = "provider-mistralrs")]
use uni_modal::traits::GenerationOptions;

#[cfg(feature = "provider-mistralrs")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let model = std::env::var("UNI_MODAL_CHAT_MODEL")
        .unwrap_or_else(|_| "Qwen/Qwen2.5-0.5B-Instruct".to_string());
    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Write a haiku about the Rust borrow checker.".to_string());

    let provider = Provider::builder()
        .config(ProviderConfig::default().with_modality(
            Modality::Llm,
            ModalityConfig::new(model).with_dtype(DType::Q4),
        ))
        .register_engine(LocalMistralRsEngine::new())
        .build()
        .await?;

    let messages = vec![
        Message::system("You are a concise assistant."),
        Message::user(question),
    ];
    let options = GenerationOptions {
        max_tokens: Some(256),
        temperature: Some(0.7),
        top_p: None,
    };

    let mut tokens = provider.stream(&messages, options).await?;
    let mut stdout = std::io::stdout();
    while let Some(token) = tokens.next().await {
        write!(stdout, "{}", token?)?;
        stdout.flush()?;
    }
    println!();

    provider.dispose();
    Ok(())
}

#[cfg(not(feature = "provider-mistralrs"))]
fn main() {
    eprintln!("This example requires the `provider-mistralrs` feature.");
    eprintln!("Run with: cargo run --example local_chat --features provider-mistralrs");
}
