//! Local execution engines.
//!
//! Each engine is behind its own Cargo feature so that only the required
//! dependencies are compiled:
//!
//! | Feature | Engine | Modalities |
//! |---|---|---|
//! | `provider-candle` (default) | [`candle::LocalCandleEngine`] | embedding |
//! | `provider-fastembed` | [`fastembed::LocalFastEmbedEngine`] | embedding |
//! | `provider-mistralrs` | [`mistralrs::LocalMistralRsEngine`] | llm (with streaming), embedding |
//!
//! Any other runtime can be plugged in by implementing
//! [`ModelEngine`](crate::traits::ModelEngine).

#[cfg(feature = "provider-candle")]
pub mod candle;

#[cfg(feature = "provider-fastembed")]
pub mod fastembed;

#[cfg(feature = "provider-mistralrs")]
pub mod mistralrs;
