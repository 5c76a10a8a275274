use std::collections::BTreeMap;

use conversation::Message;
use serde::{Deserialize, Serialize};

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;
pub const MIN_MAX_TOKENS: u32 = 1;
pub const MAX_MAX_TOKENS: u32 = 4096;

/// Per-call transport options for [`crate::ChatApiClient::send`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Return the live response as a [`crate::ChunkStream`] instead of parsed JSON.
    pub stream: bool,
    /// Headers overriding the client's defaults (the auth header excepted).
    pub headers: BTreeMap<String, String>,
}

impl SendOptions {
    pub fn json() -> Self {
        Self::default()
    }

    pub fn streaming() -> Self {
        Self {
            stream: true,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Generation settings captured for one request.
///
/// Built fresh for each call from whatever the user currently has selected,
/// so in-flight requests never observe later edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl RequestOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            stream: false,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Sets temperature, clamped to `[0, 2]`. Non-finite values clear it.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = clamp_temperature(temperature);
        self
    }

    /// Sets the completion token cap, clamped to `[1, 4096]`.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens.clamp(MIN_MAX_TOKENS, MAX_MAX_TOKENS));
        self
    }
}

pub fn clamp_temperature(temperature: f32) -> Option<f32> {
    if temperature.is_finite() {
        Some(temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE))
    } else {
        None
    }
}

/// A chat-completion call: options plus the message history to send.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub options: RequestOptions,
    pub messages: Vec<Message>,
}

impl ChatRequest {
    pub fn new(options: RequestOptions, messages: Vec<Message>) -> Self {
        Self { options, messages }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.options.stream = stream;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::RequestOptions;

    #[test]
    fn options_clamp_generation_settings() {
        let options = RequestOptions::new("m")
            .with_temperature(3.5)
            .with_max_tokens(100_000);
        assert_eq!(options.temperature, Some(2.0));
        assert_eq!(options.max_tokens, Some(4096));

        let options = RequestOptions::new("m")
            .with_temperature(-1.0)
            .with_max_tokens(0);
        assert_eq!(options.temperature, Some(0.0));
        assert_eq!(options.max_tokens, Some(1));

        assert_eq!(RequestOptions::new("m").with_temperature(f32::NAN).temperature, None);
    }
}
