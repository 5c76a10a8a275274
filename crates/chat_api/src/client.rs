use std::fmt;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cancel::{await_or_cancel, is_cancelled, CancelSignal};
use crate::config::ClientConfig;
use crate::error::{AttemptFailure, ChatApiError};
use crate::headers::build_headers;
use crate::payload::{ChatRequest, SendOptions};
use crate::retry::{backoff_delay, classify_status, StatusClass};
use crate::stream::ChunkStream;
use crate::url::join_url;
use crate::vendor::VendorAdapter;

const REPLY_SUMMARY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
            Self::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_reqwest().as_str())
    }
}

/// Outcome of a successful [`ChatApiClient::send`].
#[derive(Debug)]
pub enum ApiResponse {
    /// Parsed body, or `{"text": <raw body>}` when the body was not JSON.
    Json(Value),
    /// Live, unread streaming body.
    Stream(ChunkStream),
}

impl ApiResponse {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ChunkStream> {
        match self {
            Self::Stream(stream) => Some(stream),
            Self::Json(_) => None,
        }
    }
}

/// HTTP client for one vendor endpoint with retry, backoff and cancellation.
///
/// Shareable across tasks; every call keeps its own state.
#[derive(Debug)]
pub struct ChatApiClient {
    http: Client,
    config: ClientConfig,
    vendor: Arc<dyn VendorAdapter>,
}

impl ChatApiClient {
    pub fn new(config: ClientConfig, vendor: Arc<dyn VendorAdapter>) -> Result<Self, ChatApiError> {
        if config.max_retries == 0 {
            return Err(ChatApiError::InvalidConfig(
                "max_retries must allow at least one attempt".to_string(),
            ));
        }
        if config.timeout.is_zero() {
            return Err(ChatApiError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        join_url(&config.base_url, "")?;

        // Streams may outlive `timeout` as long as every read makes progress.
        let http = Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .map_err(ChatApiError::HttpClient)?;
        Ok(Self {
            http,
            config,
            vendor,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn vendor(&self) -> &Arc<dyn VendorAdapter> {
        &self.vendor
    }

    pub fn endpoint(&self, path: &str) -> Result<String, ChatApiError> {
        join_url(&self.config.base_url, path)
    }

    pub fn build_header_map(&self, options: &SendOptions) -> Result<HeaderMap, ChatApiError> {
        let headers = build_headers(&self.config, options.stream, &options.headers)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            let name =
                HeaderName::from_bytes(key.as_bytes()).map_err(|error| ChatApiError::InvalidHeader {
                    name: key.clone(),
                    message: error.to_string(),
                })?;
            let value = HeaderValue::from_str(&value).map_err(|error| ChatApiError::InvalidHeader {
                name: key.clone(),
                message: error.to_string(),
            })?;
            out.insert(name, value);
        }
        Ok(out)
    }

    fn build_request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
        stream: bool,
    ) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method.as_reqwest(), url)
            .headers(headers.clone());
        if !stream {
            builder = builder.timeout(self.config.timeout);
        }
        match body {
            Some(body) => builder.body(body.to_vec()),
            None => builder,
        }
    }

    /// Issue one logical call, retrying transient failures with exponential
    /// backoff.
    pub async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        payload: Option<&Value>,
        options: &SendOptions,
        cancel: Option<&CancelSignal>,
    ) -> Result<ApiResponse, ChatApiError> {
        let url = self.endpoint(path)?;
        let headers = self.build_header_map(options)?;
        let body = payload.map(serde_json::to_vec).transpose()?;
        let max_attempts = self.config.max_retries.max(1);
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            if is_cancelled(cancel) {
                return Err(ChatApiError::Cancelled);
            }

            debug!(%method, %url, attempt, max_attempts, "sending request");
            let request = self
                .build_request(method, &url, &headers, body.as_deref(), options.stream)
                .send();
            let failure = match await_or_cancel(request, cancel).await? {
                Ok(response) => match self.handle_response(response, options, cancel).await? {
                    Ok(response) => return Ok(response),
                    Err(failure) => failure,
                },
                Err(error) => AttemptFailure::Transport(error.to_string()),
            };

            if attempt < max_attempts {
                let delay = backoff_delay(self.config.retry_delay, attempt);
                warn!(
                    %method,
                    %url,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    failure = %failure,
                    "request failed, retrying"
                );
                await_or_cancel(tokio::time::sleep(delay), cancel).await?;
            }
            last_failure = Some(failure);
        }

        let last_failure = last_failure
            .unwrap_or_else(|| AttemptFailure::Transport("no attempt was made".to_string()));
        warn!(%method, %url, attempts = max_attempts, failure = %last_failure, "retries exhausted");
        Err(ChatApiError::ExhaustedRetries {
            attempts: max_attempts,
            last_failure,
        })
    }

    /// Outer error ends the call; inner error is a retryable attempt failure.
    async fn handle_response(
        &self,
        response: Response,
        options: &SendOptions,
        cancel: Option<&CancelSignal>,
    ) -> Result<Result<ApiResponse, AttemptFailure>, ChatApiError> {
        let status = response.status().as_u16();
        match classify_status(status) {
            StatusClass::Success if options.stream => Ok(Ok(ApiResponse::Stream(
                ChunkStream::from_response(response, Arc::clone(&self.vendor)),
            ))),
            StatusClass::Success => match await_or_cancel(response.text(), cancel).await? {
                Ok(body) => Ok(Ok(ApiResponse::Json(parse_json_or_text(body)))),
                Err(error) => Ok(Err(AttemptFailure::Transport(format!(
                    "failed to read response body: {error}"
                )))),
            },
            StatusClass::Retryable => {
                let body = read_error_body(response, cancel).await?;
                Ok(Err(AttemptFailure::Status { status, body }))
            }
            StatusClass::Fatal => {
                let body = read_error_body(response, cancel).await?;
                debug!(status, "request rejected without retry");
                Err(ChatApiError::Fatal { status, body })
            }
        }
    }

    /// Non-streaming chat completion; returns the first choice's content.
    pub async fn complete(
        &self,
        request: &ChatRequest,
        cancel: Option<&CancelSignal>,
    ) -> Result<String, ChatApiError> {
        let request = request.clone().with_stream(false);
        let payload = self.vendor.build_payload(&request);
        let response = self
            .send(
                HttpMethod::Post,
                self.vendor.completions_path(),
                Some(&payload),
                &SendOptions::json(),
                cancel,
            )
            .await?;

        let Some(value) = response.into_json() else {
            return Err(ChatApiError::MissingReply(
                "expected a JSON response".to_string(),
            ));
        };
        self.vendor
            .extract_reply(&value)
            .ok_or_else(|| ChatApiError::MissingReply(summarize(&value)))
    }

    /// Streaming chat completion; fragments are decoded as the caller reads.
    pub async fn stream_completion(
        &self,
        request: &ChatRequest,
        cancel: Option<&CancelSignal>,
    ) -> Result<ChunkStream, ChatApiError> {
        let request = request.clone().with_stream(true);
        let payload = self.vendor.build_payload(&request);
        self.send(
            HttpMethod::Post,
            self.vendor.completions_path(),
            Some(&payload),
            &SendOptions::streaming(),
            cancel,
        )
        .await?
        .into_stream()
        .ok_or_else(|| ChatApiError::Decode("expected a streaming response".to_string()))
    }

    /// `GET /models`, used to check that an endpoint and key are usable.
    pub async fn list_models(&self, cancel: Option<&CancelSignal>) -> Result<Value, ChatApiError> {
        self.send(
            HttpMethod::Get,
            self.vendor.models_path(),
            None,
            &SendOptions::json(),
            cancel,
        )
        .await?
        .into_json()
        .ok_or_else(|| ChatApiError::Decode("expected a JSON response".to_string()))
    }
}

fn parse_json_or_text(body: String) -> Value {
    match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => json!({ "text": body }),
    }
}

async fn read_error_body(
    response: Response,
    cancel: Option<&CancelSignal>,
) -> Result<String, ChatApiError> {
    Ok(await_or_cancel(response.text(), cancel)
        .await?
        .unwrap_or_default())
}

fn summarize(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= REPLY_SUMMARY_LIMIT {
        return text;
    }
    let truncated: String = text.chars().take(REPLY_SUMMARY_LIMIT).collect();
    format!("{truncated}...")
}
