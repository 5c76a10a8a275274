use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::cancel::{await_or_cancel, is_cancelled, CancelSignal};
use crate::error::ChatApiError;
use crate::sse::{StreamChunk, StreamDecoder};
use crate::vendor::VendorAdapter;

/// Live streaming response, decoded lazily into [`StreamChunk`]s.
///
/// Single use: once the body ends or `[DONE]` arrives, every further
/// [`ChunkStream::next_chunk`] returns `Ok(None)`. A new call is required for
/// another stream.
pub struct ChunkStream {
    body: BoxStream<'static, Result<Vec<u8>, String>>,
    decoder: StreamDecoder,
    pending: VecDeque<StreamChunk>,
    exhausted: bool,
}

impl fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStream")
            .field("pending", &self.pending.len())
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl ChunkStream {
    pub(crate) fn from_response(response: reqwest::Response, vendor: Arc<dyn VendorAdapter>) -> Self {
        let body = response
            .bytes_stream()
            .map(|item| item.map(|bytes| bytes.to_vec()).map_err(|error| error.to_string()))
            .boxed();
        Self::from_body(body, vendor)
    }

    /// Stream over pre-recorded body reads, useful for replaying captures.
    pub fn from_byte_chunks(chunks: Vec<Vec<u8>>, vendor: Arc<dyn VendorAdapter>) -> Self {
        let body = futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed();
        Self::from_body(body, vendor)
    }

    fn from_body(body: BoxStream<'static, Result<Vec<u8>, String>>, vendor: Arc<dyn VendorAdapter>) -> Self {
        Self {
            body,
            decoder: StreamDecoder::new(vendor),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next decoded fragment, or `Ok(None)` when the stream has ended.
    pub async fn next_chunk(
        &mut self,
        cancel: Option<&CancelSignal>,
    ) -> Result<Option<StreamChunk>, ChatApiError> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            if self.exhausted {
                return Ok(None);
            }
            if is_cancelled(cancel) {
                return Err(ChatApiError::Cancelled);
            }

            match await_or_cancel(self.body.next(), cancel).await? {
                Some(Ok(bytes)) => {
                    self.pending.extend(self.decoder.feed(&bytes));
                    if self.decoder.is_done() {
                        self.exhausted = true;
                    }
                }
                Some(Err(error)) => {
                    self.exhausted = true;
                    return Err(ChatApiError::Decode(error));
                }
                None => {
                    self.exhausted = true;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }

    /// Drive the stream to completion, handing each fragment to `on_chunk` as
    /// soon as it is decoded.
    pub async fn for_each_chunk<F>(
        mut self,
        cancel: Option<&CancelSignal>,
        mut on_chunk: F,
    ) -> Result<(), ChatApiError>
    where
        F: FnMut(StreamChunk),
    {
        while let Some(chunk) = self.next_chunk(cancel).await? {
            on_chunk(chunk);
        }
        Ok(())
    }

    /// Concatenate every remaining fragment.
    pub async fn collect_text(self, cancel: Option<&CancelSignal>) -> Result<String, ChatApiError> {
        let mut text = String::new();
        self.for_each_chunk(cancel, |chunk| text.push_str(&chunk.delta_content))
            .await?;
        Ok(text)
    }

    /// Malformed events skipped so far.
    pub fn skipped_chunks(&self) -> usize {
        self.decoder.skipped()
    }
}
