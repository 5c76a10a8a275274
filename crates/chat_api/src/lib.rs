//! Resilient chat-completion client.
//!
//! Owns request building, retry with exponential backoff, cooperative
//! cancellation and incremental decoding of `data:` event streams. Vendor
//! differences live behind [`VendorAdapter`]; nothing here knows about the
//! UI or about conversation bookkeeping beyond the message types it sends.

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod stream;
pub mod url;
pub mod vendor;

pub use cancel::{new_cancel_signal, CancelSignal};
pub use client::{ApiResponse, ChatApiClient, HttpMethod};
pub use config::ClientConfig;
pub use error::{AttemptFailure, ChatApiError};
pub use payload::{ChatRequest, RequestOptions, SendOptions};
pub use sse::{StreamChunk, StreamDecoder};
pub use stream::ChunkStream;
pub use crate::url::join_url;
pub use vendor::{vendor_for_id, Ark, DeepSeek, VendorAdapter};
