//! Token stream handed out by [`Provider::stream`](crate::provider::Provider::stream).

use crate::error::{Result, RuntimeError};
use crate::lifecycle::LifecycleController;
use crate::traits::TokenStream;
use futures::Stream;
use futures::stream::FusedStream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Engine token stream bound to the lifecycle of its modality.
///
/// The engine stream is polled only when this stream is polled, so this type
/// adds no read-ahead of its own. Engines that generate on a background task
/// may still buffer a bounded number of tokens (see each engine's `stream`).
/// Tokens come out in generation order.
/// After the engine finishes or fails, the stream stays terminated. If the
/// modality is disposed mid-stream, the next poll yields one
/// [`RuntimeError::Disposed`] and the stream ends. Dropping the stream before
/// the end drops the engine stream right away, which stops generation.
pub struct ProviderTokenStream {
    inner: Option<TokenStream>,
    controller: Arc<LifecycleController>,
    emitted: usize,
    closed: bool,
}

impl ProviderTokenStream {
    pub(crate) fn new(inner: TokenStream, controller: Arc<LifecycleController>) -> Self {
        controller.stream_opened();
        Self {
            inner: Some(inner),
            controller,
            emitted: 0,
            closed: false,
        }
    }

    /// Tokens yielded so far.
    pub fn tokens_emitted(&self) -> usize {
        self.emitted
    }

    fn finish(&mut self, status: &'static str) {
        self.inner = None;
        if !self.closed {
            self.closed = true;
            self.controller.stream_closed();
            metrics::counter!(
                "model_inference.total",
                "modality" => self.controller.modality().as_str(),
                "operation" => "stream",
                "status" => status
            )
            .increment(1);
        }
    }
}

impl Stream for ProviderTokenStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        if this.controller.is_disposed() {
            this.finish("disposed");
            return Poll::Ready(Some(Err(RuntimeError::Disposed(
                this.controller.modality(),
            ))));
        }

        match inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(token))) => {
                this.emitted += 1;
                Poll::Ready(Some(Ok(token)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::error!(error = %e, emitted = this.emitted, "Token stream failed");
                this.finish("failure");
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish("success");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for ProviderTokenStream {
    fn is_terminated(&self) -> bool {
        self.inner.is_none()
    }
}

impl Drop for ProviderTokenStream {
    fn drop(&mut self) {
        if self.inner.is_some() {
            tracing::warn!(
                modality = %self.controller.modality(),
                emitted = self.emitted,
                "Token stream dropped by consumer before completion; stopping generation"
            );
            self.finish("cancelled");
        }
    }
}

impl std::fmt::Debug for ProviderTokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTokenStream")
            .field("modality", &self.controller.modality())
            .field("emitted", &self.emitted)
            .field("terminated", &self.inner.is_none())
            .finish()
    }
}
