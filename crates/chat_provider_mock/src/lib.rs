//! Deterministic scripted implementation of the `chat_provider` contract.
//!
//! No transport or protocol logic. Used by tests and for offline runs of the
//! host binary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chat_provider::{CancelSignal, ProviderProfile, RunEvent, RunProvider, RunRequest};
use conversation::Role;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// What a scripted run produces after `Started`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockScript {
    /// Emit each chunk in order, then `Finished`.
    Reply(Vec<String>),
    /// Emit the chunks, then `Failed` with the message.
    Fail {
        chunks: Vec<String>,
        error: String,
    },
    /// Echo the latest user message back, word by word.
    Echo,
}

#[derive(Debug)]
pub struct MockProvider {
    model_id: String,
    script: MockScript,
    chunk_delay: Duration,
    panic_on_run: AtomicBool,
    observed: Mutex<Vec<RunRequest>>,
}

impl MockProvider {
    #[must_use]
    pub fn new(model_id: impl Into<String>, script: MockScript) -> Self {
        Self {
            model_id: sanitize_model_id(model_id.into()),
            script,
            chunk_delay: Duration::ZERO,
            panic_on_run: AtomicBool::new(false),
            observed: Mutex::new(Vec::new()),
        }
    }

    /// Provider replying with `chunks` and finishing normally.
    #[must_use]
    pub fn replying(model_id: impl Into<String>, chunks: &[&str]) -> Self {
        Self::new(
            model_id,
            MockScript::Reply(chunks.iter().map(|chunk| chunk.to_string()).collect()),
        )
    }

    /// Provider failing every run with `error`.
    #[must_use]
    pub fn failing(model_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(
            model_id,
            MockScript::Fail {
                chunks: Vec::new(),
                error: error.into(),
            },
        )
    }

    /// Sleeps `delay` before each chunk, checking cancellation in between.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Makes every run panic after `Started`, for exercising host recovery.
    #[must_use]
    pub fn panicking(self) -> Self {
        self.panic_on_run.store(true, Ordering::Release);
        self
    }

    /// Requests seen so far, in arrival order.
    pub fn observed_requests(&self) -> Vec<RunRequest> {
        lock_unpoisoned(&self.observed).clone()
    }

    fn chunks_for(&self, req: &RunRequest) -> Vec<String> {
        match &self.script {
            MockScript::Reply(chunks) | MockScript::Fail { chunks, .. } => chunks.clone(),
            MockScript::Echo => {
                let last_user = req
                    .messages
                    .iter()
                    .rev()
                    .find(|message| message.role == Role::User)
                    .map(|message| message.content.clone())
                    .unwrap_or_default();
                split_words(&last_user)
            }
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(MOCK_PROVIDER_ID, MockScript::Echo).with_chunk_delay(Duration::from_millis(40))
    }
}

impl RunProvider for MockProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
        }
    }

    fn run(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Result<(), String> {
        let run_id = req.run_id;
        let chunks = self.chunks_for(&req);
        lock_unpoisoned(&self.observed).push(req);

        emit(RunEvent::Started { run_id });

        if self.panic_on_run.load(Ordering::Acquire) {
            panic!("mock provider scripted to panic");
        }

        for chunk in chunks {
            if !self.chunk_delay.is_zero() {
                thread::sleep(self.chunk_delay);
            }
            if cancel.load(Ordering::SeqCst) {
                emit(RunEvent::Cancelled { run_id });
                return Ok(());
            }
            emit(RunEvent::Chunk {
                run_id,
                text: chunk,
            });
        }

        if cancel.load(Ordering::SeqCst) {
            emit(RunEvent::Cancelled { run_id });
            return Ok(());
        }

        match &self.script {
            MockScript::Fail { error, .. } => emit(RunEvent::Failed {
                run_id,
                error: error.clone(),
            }),
            MockScript::Reply(_) | MockScript::Echo => emit(RunEvent::Finished { run_id }),
        }

        Ok(())
    }

    /// Scripted failures fail the check too, with the same message.
    fn check_connection(&self, cancel: CancelSignal) -> Result<String, String> {
        if cancel.load(Ordering::SeqCst) {
            return Err("connection check cancelled".to_string());
        }
        match &self.script {
            MockScript::Fail { error, .. } => Err(error.clone()),
            MockScript::Reply(_) | MockScript::Echo => {
                Ok(format!("mock endpoint ready for {}", self.model_id))
            }
        }
    }
}

fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut pending = String::new();
    for ch in text.chars() {
        pending.push(ch);
        if matches!(ch, ' ' | '\n') {
            words.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        words.push(pending);
    }
    words
}

fn sanitize_model_id(model_id: String) -> String {
    let trimmed = model_id.trim();
    if trimmed.is_empty() {
        MOCK_PROVIDER_ID.to_string()
    } else {
        trimmed.to_string()
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
