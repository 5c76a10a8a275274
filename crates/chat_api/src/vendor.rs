use std::fmt::Debug;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::payload::ChatRequest;

pub const DEEPSEEK_VENDOR_ID: &str = "deepseek";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEEPSEEK_DEFAULT_MODEL: &str = "deepseek-chat";

pub const ARK_VENDOR_ID: &str = "ark";
pub const ARK_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const ARK_DEFAULT_MODEL: &str = "doubao-1-5-pro-32k-250115";

/// Capability describing one vendor's chat-completion dialect.
///
/// Default methods implement the OpenAI-compatible schema both supported
/// vendors speak: bearer auth, `POST /chat/completions`, replies under
/// `choices[0].message.content` and stream deltas under `choices[0].delta`.
pub trait VendorAdapter: Debug + Send + Sync + 'static {
    fn id(&self) -> &'static str;

    fn default_base_url(&self) -> &'static str;

    fn default_model(&self) -> &'static str;

    fn key_header(&self) -> &'static str {
        crate::config::DEFAULT_KEY_HEADER
    }

    fn key_prefix(&self) -> &'static str {
        crate::config::DEFAULT_KEY_PREFIX
    }

    fn completions_path(&self) -> &'static str {
        "/chat/completions"
    }

    fn models_path(&self) -> &'static str {
        "/models"
    }

    fn build_payload(&self, request: &ChatRequest) -> Value {
        openai_payload(request)
    }

    fn extract_reply(&self, response: &Value) -> Option<String> {
        response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }

    /// Text carried by one decoded stream event, reasoning first.
    fn extract_delta(&self, event: &Value) -> Option<String> {
        let delta = event.pointer("/choices/0/delta")?;
        let mut text = String::new();
        for field in ["reasoning_content", "content"] {
            if let Some(part) = delta.get(field).and_then(Value::as_str) {
                text.push_str(part);
            }
        }
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

fn openai_payload(request: &ChatRequest) -> Value {
    let options = &request.options;
    let mut body = Map::new();
    body.insert("model".to_owned(), Value::String(options.model.clone()));
    body.insert("messages".to_owned(), json!(request.messages));
    if let Some(temperature) = options.temperature {
        body.insert("temperature".to_owned(), json!(temperature));
    }
    if let Some(max_tokens) = options.max_tokens {
        body.insert("max_tokens".to_owned(), json!(max_tokens));
    }
    body.insert("stream".to_owned(), Value::Bool(options.stream));
    Value::Object(body)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeepSeek;

impl VendorAdapter for DeepSeek {
    fn id(&self) -> &'static str {
        DEEPSEEK_VENDOR_ID
    }

    fn default_base_url(&self) -> &'static str {
        DEEPSEEK_BASE_URL
    }

    fn default_model(&self) -> &'static str {
        DEEPSEEK_DEFAULT_MODEL
    }
}

/// Volcengine Ark, serving the Doubao model family.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ark;

impl VendorAdapter for Ark {
    fn id(&self) -> &'static str {
        ARK_VENDOR_ID
    }

    fn default_base_url(&self) -> &'static str {
        ARK_BASE_URL
    }

    fn default_model(&self) -> &'static str {
        ARK_DEFAULT_MODEL
    }

    fn build_payload(&self, request: &ChatRequest) -> Value {
        let mut body = openai_payload(request);
        if request.options.stream {
            if let Some(object) = body.as_object_mut() {
                object.insert("stream_options".to_owned(), json!({"include_usage": true}));
            }
        }
        body
    }
}

/// Resolves a vendor by id; `doubao` is accepted as an alias for Ark.
pub fn vendor_for_id(vendor_id: &str) -> Option<Arc<dyn VendorAdapter>> {
    match vendor_id.trim().to_ascii_lowercase().as_str() {
        DEEPSEEK_VENDOR_ID => Some(Arc::new(DeepSeek)),
        ARK_VENDOR_ID | "doubao" => Some(Arc::new(Ark)),
        _ => None,
    }
}
