use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::vendor::{DeepSeek, VendorAdapter};

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded reply fragment. Transient: forwarded to the caller and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta_content: String,
}

/// Incremental line decoder for `data: {...}` event streams.
///
/// Network reads may split lines anywhere, so partial input is buffered until
/// its newline arrives. Once `data: [DONE]` is seen the decoder is finished and
/// ignores everything fed afterwards.
#[derive(Debug)]
pub struct StreamDecoder {
    vendor: Arc<dyn VendorAdapter>,
    buffer: Vec<u8>,
    done: bool,
    skipped: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(Arc::new(DeepSeek))
    }
}

impl StreamDecoder {
    pub fn new(vendor: Arc<dyn VendorAdapter>) -> Self {
        Self {
            vendor,
            buffer: Vec::new(),
            done: false,
            skipped: 0,
        }
    }

    /// Feed raw bytes and drain every chunk completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(chunk) = self.decode_line(&line) {
                chunks.push(chunk);
            }
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        chunks
    }

    /// Decode a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Option<StreamChunk> {
        if self.done || self.buffer.is_empty() {
            self.buffer.clear();
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of malformed events skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Decode a complete payload in one shot.
    pub fn decode_lines(input: &str) -> Vec<StreamChunk> {
        let mut decoder = Self::default();
        let mut chunks = decoder.feed(input.as_bytes());
        chunks.extend(decoder.finish());
        chunks
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamChunk> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        let payload = line.strip_prefix(DATA_PREFIX)?.trim();
        if payload.is_empty() {
            return None;
        }
        if payload == DONE_SENTINEL {
            self.done = true;
            return None;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(event) => self
                .vendor
                .extract_delta(&event)
                .map(|delta_content| StreamChunk { delta_content }),
            Err(error) => {
                self.skipped += 1;
                warn!(%error, payload, "skipping malformed stream chunk");
                None
            }
        }
    }
}
