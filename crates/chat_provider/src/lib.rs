//! Provider-neutral contract for executing one chat run.
//!
//! A run is one request to one model. This crate defines the run lifecycle
//! events and the provider trait; transport details and fan-out across models
//! live elsewhere.

use std::sync::{atomic::AtomicBool, Arc};

use conversation::Message;
use thiserror::Error;

/// Identifier for one provider run.
pub type RunId = u64;

/// Shared cancellation flag for a run.
pub type CancelSignal = Arc<AtomicBool>;

/// Error returned while constructing a provider, before any run starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderInitError {
    message: String,
}

impl ProviderInitError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ProviderInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Input required to start a run.
///
/// Captured by value when the run is dispatched; later edits to the
/// conversation or to generation settings never reach an in-flight run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub run_id: RunId,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl RunRequest {
    #[must_use]
    pub fn new(run_id: RunId, messages: Vec<Message>) -> Self {
        Self {
            run_id,
            messages,
            stream: false,
            temperature: None,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Provider-emitted lifecycle event for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started { run_id: RunId },
    Chunk { run_id: RunId, text: String },
    Finished { run_id: RunId },
    Failed { run_id: RunId, error: String },
    Cancelled { run_id: RunId },
}

impl RunEvent {
    /// Returns the run identifier associated with this event.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Started { run_id }
            | Self::Chunk { run_id, .. }
            | Self::Finished { run_id }
            | Self::Failed { run_id, .. }
            | Self::Cancelled { run_id } => *run_id,
        }
    }

    /// Returns true when this event terminates the run lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// Immutable metadata describing a run provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
}

/// Provider interface for executing one run request.
pub trait RunProvider: Send + Sync + 'static {
    fn profile(&self) -> ProviderProfile;

    /// Executes a run request and emits lifecycle events in provider order.
    ///
    /// `Started` comes first and exactly one terminal event comes last.
    /// Chunks are emitted as soon as they are available. An `Err` return is
    /// reserved for failures outside the run lifecycle; the caller reports it
    /// as `Failed` if no terminal event was emitted.
    fn run(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Result<(), String>;

    /// Checks that the endpoint and credentials behind this provider work.
    ///
    /// Returns a one-line summary on success and the failure message
    /// otherwise. Providers without a remote endpoint report success.
    fn check_connection(&self, cancel: CancelSignal) -> Result<String, String> {
        let _ = cancel;
        Ok(format!("{} needs no connection", self.profile().provider_id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use conversation::Message;

    use super::{
        CancelSignal, ProviderInitError, ProviderProfile, RunEvent, RunProvider, RunRequest,
    };

    struct EchoProvider;

    impl RunProvider for EchoProvider {
        fn profile(&self) -> ProviderProfile {
            ProviderProfile {
                provider_id: "echo".to_string(),
                model_id: "echo-model".to_string(),
            }
        }

        fn run(
            &self,
            req: RunRequest,
            _cancel: CancelSignal,
            emit: &mut dyn FnMut(RunEvent),
        ) -> Result<(), String> {
            emit(RunEvent::Started { run_id: req.run_id });
            for message in &req.messages {
                emit(RunEvent::Chunk {
                    run_id: req.run_id,
                    text: message.content.clone(),
                });
            }
            emit(RunEvent::Finished { run_id: req.run_id });
            Ok(())
        }
    }

    #[test]
    fn only_finished_failed_and_cancelled_end_a_run() {
        let lifecycle = [
            (RunEvent::Started { run_id: 9 }, false),
            (
                RunEvent::Chunk {
                    run_id: 9,
                    text: "delta".to_string(),
                },
                false,
            ),
            (RunEvent::Finished { run_id: 9 }, true),
            (
                RunEvent::Failed {
                    run_id: 9,
                    error: "HTTP 401".to_string(),
                },
                true,
            ),
            (RunEvent::Cancelled { run_id: 9 }, true),
        ];

        for (event, terminal) in lifecycle {
            assert_eq!(event.run_id(), 9, "{event:?}");
            assert_eq!(event.is_terminal(), terminal, "{event:?}");
        }
    }

    #[test]
    fn provider_init_error_preserves_message() {
        let error = ProviderInitError::from(format!("unknown vendor '{}'", "openai"));
        assert_eq!(error.message(), "unknown vendor 'openai'");
        assert_eq!(error.to_string(), "unknown vendor 'openai'");
    }

    #[test]
    fn run_request_builders_capture_generation_settings() {
        let request = RunRequest::new(7, vec![Message::user("hi")])
            .with_stream(true)
            .with_temperature(Some(0.5))
            .with_max_tokens(None);

        assert_eq!(request.run_id, 7);
        assert!(request.stream);
        assert_eq!(request.temperature, Some(0.5));
        assert_eq!(request.max_tokens, None);
    }

    #[test]
    fn provider_emits_started_first_and_terminal_last() {
        let mut events = Vec::new();
        EchoProvider
            .run(
                RunRequest::new(3, vec![Message::user("a"), Message::user("b")]),
                Arc::new(AtomicBool::new(false)),
                &mut |event| events.push(event),
            )
            .expect("echo run");

        assert_eq!(events.first(), Some(&RunEvent::Started { run_id: 3 }));
        assert_eq!(events.last(), Some(&RunEvent::Finished { run_id: 3 }));
        assert_eq!(events.iter().filter(|event| event.is_terminal()).count(), 1);
        assert_eq!(EchoProvider.profile().model_id, "echo-model");
    }

    #[test]
    fn local_providers_pass_connection_check_by_default() {
        assert_eq!(
            EchoProvider.check_connection(Arc::new(AtomicBool::new(false))),
            Ok("echo needs no connection".to_string())
        );
    }
}
