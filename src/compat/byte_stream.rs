use crate::error::Result;
use crate::stream::ProviderTokenStream;
use bytes::Bytes;
use futures::Stream;
use futures::stream::FusedStream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// [`ProviderTokenStream`] re-encoded as UTF-8 byte chunks, one per token,
/// for HTTP bodies and other byte-oriented sinks.
#[derive(Debug)]
pub struct TokenByteStream {
    inner: ProviderTokenStream,
}

impl Stream for TokenByteStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|item| item.map(|token| token.map(Bytes::from)))
    }
}

impl FusedStream for TokenByteStream {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

pub fn into_byte_stream(stream: ProviderTokenStream) -> TokenByteStream {
    TokenByteStream { inner: stream }
}
