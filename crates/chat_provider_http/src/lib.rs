//! `chat_api`-backed implementation of the `chat_provider` contract.
//!
//! Each run drives one chat-completion call to completion on the calling
//! worker thread and translates the outcome into `RunEvent`s.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chat_api::{
    vendor_for_id, ChatApiClient, ChatApiError, ChatRequest, ClientConfig, RequestOptions,
    VendorAdapter,
};
use chat_provider::{
    CancelSignal, ProviderInitError, ProviderProfile, RunEvent, RunProvider, RunRequest,
};
use serde_json::Value;
use tracing::{debug, info};

/// Runtime configuration for one vendor endpoint and model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpProviderConfig {
    pub vendor_id: String,
    pub api_key: String,
    /// Model id sent to the vendor; empty selects the vendor default.
    pub model: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    /// Auth header name; `None` keeps the vendor's.
    pub key_header: Option<String>,
    /// Auth value prefix; `None` keeps the vendor's, empty sends the bare key.
    pub key_prefix: Option<String>,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl HttpProviderConfig {
    #[must_use]
    pub fn new(
        vendor_id: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: None,
            max_retries: None,
            retry_delay: None,
            key_header: None,
            key_prefix: None,
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    #[must_use]
    pub fn with_key_header(mut self, name: Option<String>, prefix: Option<String>) -> Self {
        self.key_header = name;
        self.key_prefix = prefix;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    fn into_client_config(self, vendor: &dyn VendorAdapter) -> ClientConfig {
        let mut config = ClientConfig::for_vendor(vendor, self.api_key);

        if let Some(base_url) = self.base_url.filter(|value| !value.trim().is_empty()) {
            config = config.with_base_url(base_url);
        }

        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }

        if let Some(max_retries) = self.max_retries {
            config = config.with_max_retries(max_retries);
        }

        if let Some(retry_delay) = self.retry_delay {
            config = config.with_retry_delay(retry_delay);
        }

        if self.key_header.is_some() || self.key_prefix.is_some() {
            let name = self
                .key_header
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| vendor.key_header().to_string());
            let prefix = self
                .key_prefix
                .unwrap_or_else(|| vendor.key_prefix().to_string());
            config = config.with_key_header(name, prefix);
        }

        for (key, value) in self.headers {
            config = config.insert_header(key, value);
        }

        config
    }
}

trait CompletionClient: Send + Sync {
    fn complete(&self, request: &ChatRequest, cancel: &CancelSignal) -> Result<String, ChatApiError>;

    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
        on_chunk: &mut dyn FnMut(String),
    ) -> Result<(), ChatApiError>;

    fn list_models(&self, cancel: &CancelSignal) -> Result<Value, ChatApiError>;
}

#[derive(Debug)]
struct DefaultCompletionClient {
    client: ChatApiClient,
}

impl DefaultCompletionClient {
    fn runtime() -> Result<tokio::runtime::Runtime, ChatApiError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                ChatApiError::Runtime(format!("failed to initialize tokio runtime: {error}"))
            })
    }
}

impl CompletionClient for DefaultCompletionClient {
    fn complete(&self, request: &ChatRequest, cancel: &CancelSignal) -> Result<String, ChatApiError> {
        Self::runtime()?.block_on(self.client.complete(request, Some(cancel)))
    }

    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
        on_chunk: &mut dyn FnMut(String),
    ) -> Result<(), ChatApiError> {
        Self::runtime()?.block_on(async {
            let stream = self.client.stream_completion(request, Some(cancel)).await?;
            stream
                .for_each_chunk(Some(cancel), |chunk| on_chunk(chunk.delta_content))
                .await
        })
    }

    fn list_models(&self, cancel: &CancelSignal) -> Result<Value, ChatApiError> {
        Self::runtime()?.block_on(self.client.list_models(Some(cancel)))
    }
}

/// `RunProvider` for one model on an OpenAI-compatible vendor endpoint.
pub struct HttpChatProvider {
    vendor_id: String,
    model: String,
    client: Arc<dyn CompletionClient>,
}

impl HttpChatProvider {
    /// Creates a provider using real HTTP transport.
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderInitError> {
        let vendor = vendor_for_id(&config.vendor_id).ok_or_else(|| {
            ProviderInitError::new(format!("unknown vendor '{}'", config.vendor_id.trim()))
        })?;
        if config.api_key.trim().is_empty() {
            return Err(ProviderInitError::new(format!(
                "missing API key for vendor '{}'",
                vendor.id()
            )));
        }

        let model = resolve_model(&config.model, vendor.as_ref());
        let client_config = config.into_client_config(vendor.as_ref());
        let vendor_id = vendor.id().to_string();
        let client = ChatApiClient::new(client_config, vendor).map_err(map_init_error)?;

        Ok(Self {
            vendor_id,
            model,
            client: Arc::new(DefaultCompletionClient { client }),
        })
    }

    fn chat_request(&self, req: RunRequest) -> ChatRequest {
        let mut options = RequestOptions::new(self.model.clone()).with_stream(req.stream);
        if let Some(temperature) = req.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(max_tokens) = req.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        ChatRequest::new(options, req.messages)
    }

    #[cfg(test)]
    fn with_client_for_tests(model: &str, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            vendor_id: "test".to_string(),
            model: model.to_string(),
            client,
        }
    }
}

impl RunProvider for HttpChatProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: self.vendor_id.clone(),
            model_id: self.model.clone(),
        }
    }

    fn run(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Result<(), String> {
        let run_id = req.run_id;
        let stream = req.stream;

        emit(RunEvent::Started { run_id });

        if cancel.load(Ordering::Acquire) {
            emit(RunEvent::Cancelled { run_id });
            return Ok(());
        }

        info!(run_id, vendor = %self.vendor_id, model = %self.model, stream, "starting run");
        let request = self.chat_request(req);
        let outcome = if stream {
            self.client.stream(&request, &cancel, &mut |text| {
                emit(RunEvent::Chunk { run_id, text });
            })
        } else {
            self.client.complete(&request, &cancel).map(|reply| {
                if !reply.is_empty() {
                    emit(RunEvent::Chunk {
                        run_id,
                        text: reply,
                    });
                }
            })
        };

        match outcome {
            Ok(()) => emit(RunEvent::Finished { run_id }),
            Err(ChatApiError::Cancelled) => {
                debug!(run_id, "run cancelled");
                emit(RunEvent::Cancelled { run_id });
            }
            Err(error) => {
                info!(run_id, %error, "run failed");
                emit(RunEvent::Failed {
                    run_id,
                    error: error.to_string(),
                });
            }
        }

        Ok(())
    }

    fn check_connection(&self, cancel: CancelSignal) -> Result<String, String> {
        info!(vendor = %self.vendor_id, model = %self.model, "checking connection");
        let listing = self
            .client
            .list_models(&cancel)
            .map_err(|error| error.to_string())?;
        Ok(describe_model_listing(&listing, &self.model))
    }
}

/// Summarizes a `GET /models` listing relative to the configured model.
fn describe_model_listing(listing: &Value, model: &str) -> String {
    let ids: Vec<&str> = listing
        .get("data")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("id").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    match ids.len() {
        0 => "endpoint reachable".to_string(),
        count if ids.contains(&model) => {
            format!("endpoint reachable, {count} models listed including {model}")
        }
        count => format!("endpoint reachable, {count} models listed, {model} not among them"),
    }
}

fn resolve_model(model: &str, vendor: &dyn VendorAdapter) -> String {
    let model = model.trim();
    if model.is_empty() {
        vendor.default_model().to_string()
    } else {
        model.to_string()
    }
}

fn map_init_error(error: ChatApiError) -> ProviderInitError {
    ProviderInitError::new(format!("failed to initialize HTTP provider: {error}"))
}
