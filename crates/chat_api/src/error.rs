use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Why the final attempt of a retried call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// No response was received (connect, DNS, timeout or body read failure).
    Transport(String),
    /// The server answered with a retryable status.
    Status { status: u16, body: String },
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "no response received: {message}"),
            Self::Status { status, body } => {
                write!(f, "HTTP {status} {}", parse_error_message(*status, body))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatApiError {
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("API request failed: HTTP {status} {}", status_message(.status, .body))]
    Fatal { status: u16, body: String },

    #[error("request failed after {attempts} attempts ({last_failure})")]
    ExhaustedRetries {
        attempts: u32,
        last_failure: AttemptFailure,
    },

    #[error("failed to read response stream: {0}")]
    Decode(String),

    #[error("response did not contain a reply: {0}")]
    MissingReply(String),

    #[error("request was cancelled")]
    Cancelled,

    #[error("failed to start async runtime: {0}")]
    Runtime(String),
}

impl ChatApiError {
    /// HTTP status attached to the error, if any response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Fatal { status, .. } => Some(*status),
            Self::ExhaustedRetries {
                last_failure: AttemptFailure::Status { status, .. },
                ..
            } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<ErrorPayloadFields>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayloadFields {
    message: Option<String>,
    code: Option<serde_json::Value>,
    #[serde(rename = "type")]
    type_: Option<String>,
}

fn status_message(status: &u16, body: &str) -> String {
    parse_error_message(*status, body)
}

/// Extracts a readable message from a vendor error body.
///
/// Vendors answer with `{"error": {"message", "code", "type"}}`; anything else
/// falls back to the raw body, or the canonical reason for an empty one.
pub fn parse_error_message(status: u16, body: &str) -> String {
    if let Ok(ErrorPayload { error: Some(error) }) = serde_json::from_str::<ErrorPayload>(body) {
        if let Some(message) = error.message.as_deref().filter(|value| !value.is_empty()) {
            let code = error
                .code
                .as_ref()
                .map(|code| match code {
                    serde_json::Value::String(code) => code.clone(),
                    other => other.to_string(),
                })
                .or(error.type_);
            return match code {
                Some(code) if !code.is_empty() => format!("{message} ({code})"),
                _ => message.to_string(),
            };
        }
    }

    if body.trim().is_empty() {
        reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.trim().to_string()
    }
}
