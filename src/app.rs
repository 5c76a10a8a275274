use std::collections::{BTreeMap, BTreeSet};

use chat_api::payload::{clamp_temperature, MAX_MAX_TOKENS, MIN_MAX_TOKENS};
use chat_provider::RunId;
use conversation::{Accumulator, Message};
use tracing::debug;

use crate::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use crate::config::{AppConfig, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};

/// Shown in place of a reply that finished without any text.
pub const NO_REPLY_PLACEHOLDER: &str = "[no reply]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Running,
    Exiting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speaker {
    User,
    Model(String),
    Notice,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub content: String,
    pub streaming: bool,
    pub run_id: Option<RunId>,
}

/// Generation settings captured by value for each dispatched run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub stream: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            stream: false,
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
        }
    }
}

pub trait HostOps {
    fn start_run(
        &mut self,
        model: &str,
        messages: Vec<Message>,
        settings: GenerationSettings,
    ) -> Result<RunId, String>;
    /// Starts a connection check for `model`. Checks share the run id space,
    /// so `cancel_run` stops them too.
    fn start_check(&mut self, model: &str) -> Result<RunId, String>;
    fn cancel_run(&mut self, run_id: RunId);
    fn request_render(&mut self);
    fn request_stop(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingReply {
    model: String,
    text: String,
}

/// Transcript and conversation owner. Only the UI thread touches it.
#[derive(Debug, Clone)]
pub struct App {
    pub mode: Mode,
    pub transcript: Vec<TranscriptEntry>,
    pub should_exit: bool,
    transcript_epoch: u64,
    accumulator: Accumulator,
    available_models: Vec<String>,
    settings: GenerationSettings,
    active_runs: BTreeMap<RunId, PendingReply>,
    cancelling_runs: BTreeSet<RunId>,
    pending_checks: BTreeMap<RunId, String>,
}

impl App {
    /// App chatting with every model in `models`.
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let available_models: Vec<String> = models.into_iter().map(Into::into).collect();
        Self {
            mode: Mode::Idle,
            transcript: Vec::new(),
            should_exit: false,
            transcript_epoch: 0,
            accumulator: Accumulator::new(available_models.clone()),
            available_models,
            settings: GenerationSettings::default(),
            active_runs: BTreeMap::new(),
            cancelling_runs: BTreeSet::new(),
            pending_checks: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut app = Self::new(config.model_names()).with_settings(GenerationSettings {
            stream: config.stream,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        });
        app.accumulator.set_max_turns(config.max_turns);
        if let Some(prompt) = &config.system_prompt {
            app.accumulator = app.accumulator.with_system_prompt(prompt.clone());
        }
        if let Some(window) = config.context_window {
            app.accumulator = app.accumulator.with_context_window(window);
        }
        app
    }

    #[must_use]
    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.accumulator.set_max_turns(max_turns);
        self
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn settings(&self) -> GenerationSettings {
        self.settings
    }

    pub fn available_models(&self) -> &[String] {
        &self.available_models
    }

    pub fn selected_models(&self) -> Vec<String> {
        self.accumulator
            .models()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn active_run_ids(&self) -> Vec<RunId> {
        self.active_runs.keys().copied().collect()
    }

    /// Bumped whenever the transcript is cleared.
    pub fn transcript_epoch(&self) -> u64 {
        self.transcript_epoch
    }

    pub fn has_active_runs(&self) -> bool {
        !self.active_runs.is_empty()
    }

    pub fn has_pending_checks(&self) -> bool {
        !self.pending_checks.is_empty()
    }

    pub fn push_notice(&mut self, content: impl Into<String>) {
        self.push_entry(Speaker::Notice, content.into());
    }

    pub fn on_submit(&mut self, text: &str, host: &mut dyn HostOps) {
        let prompt = text.trim();

        if prompt.is_empty() {
            host.request_render();
            return;
        }

        if let Some(command) = parse_slash_command(prompt) {
            self.on_command(command, host);
            return;
        }

        if self.has_active_runs() {
            self.push_notice("Replies still in progress. Use /cancel to stop them.");
            host.request_render();
            return;
        }

        if !self.accumulator.can_continue() {
            self.push_notice(format!(
                "Turn limit of {} reached. Use /new to start a new conversation.",
                self.accumulator.max_turns()
            ));
            host.request_render();
            return;
        }

        self.dispatch_turn(prompt, host);
        host.request_render();
    }

    fn on_command(&mut self, command: SlashCommand, host: &mut dyn HostOps) {
        match command {
            SlashCommand::Help => self.push_notice(HELP_TEXT),
            SlashCommand::New => {
                self.new_conversation(host);
                return;
            }
            SlashCommand::Models(selection) => {
                self.on_select_models(selection, host);
                return;
            }
            SlashCommand::Stream(stream) => {
                self.settings.stream = stream;
                self.push_notice(format!(
                    "Streaming {}",
                    if stream { "on" } else { "off" }
                ));
            }
            SlashCommand::Temperature(value) => {
                self.settings.temperature = clamp_temperature(value);
                match self.settings.temperature {
                    Some(temperature) => {
                        self.push_notice(format!("Temperature set to {temperature:.2}"))
                    }
                    None => self.push_notice("Temperature cleared"),
                }
            }
            SlashCommand::MaxTokens(value) => {
                let value = value.clamp(MIN_MAX_TOKENS, MAX_MAX_TOKENS);
                self.settings.max_tokens = Some(value);
                self.push_notice(format!("Max tokens set to {value}"));
            }
            SlashCommand::MaxTurns(value) => {
                self.accumulator.set_max_turns(value);
                if value == 0 {
                    self.push_notice("Turn limit removed");
                } else {
                    self.push_notice(format!("Turn limit set to {value}"));
                }
                if !self.accumulator.can_continue() {
                    self.push_notice("Turn limit already reached. Use /new to start a new conversation.");
                }
            }
            SlashCommand::TestConnections => self.on_test_connections(host),
            SlashCommand::Cancel => {
                self.on_cancel(host);
                return;
            }
            SlashCommand::Quit => {
                self.on_quit(host);
                return;
            }
            SlashCommand::Invalid { command, usage } => {
                self.push_error(format!("Invalid {command}. Usage: {usage}"));
            }
            SlashCommand::Unknown(command) => {
                self.push_error(format!("Unknown command: {command}"));
            }
        }

        host.request_render();
    }

    fn dispatch_turn(&mut self, prompt: &str, host: &mut dyn HostOps) {
        self.push_entry(Speaker::User, prompt.to_string());
        self.accumulator.append_user(prompt);

        for model in self.selected_models() {
            let payload = match self.accumulator.payload_for(Some(&model)) {
                Ok(payload) => payload,
                Err(error) => {
                    self.push_error(format!("[{model}] {error}"));
                    continue;
                }
            };

            match host.start_run(&model, payload.messages, self.settings) {
                Ok(run_id) => {
                    debug!(run_id, model = %model, "run dispatched");
                    self.active_runs.insert(
                        run_id,
                        PendingReply {
                            model,
                            text: String::new(),
                        },
                    );
                }
                Err(error) => self.push_error(format!("[{model}] failed to start: {error}")),
            }
        }

        self.refresh_mode();
    }

    fn on_select_models(&mut self, selection: Vec<String>, host: &mut dyn HostOps) {
        if selection.is_empty() {
            self.push_notice(format!(
                "Models: {} (available: {})",
                self.selected_models().join(", "),
                self.available_models.join(", ")
            ));
            host.request_render();
            return;
        }

        if let Some(unknown) = selection
            .iter()
            .find(|name| !self.available_models.contains(name))
        {
            self.push_error(format!(
                "Unknown model '{unknown}'. Available: {}",
                self.available_models.join(", ")
            ));
            host.request_render();
            return;
        }

        self.accumulator.reset_with_models(selection);
        self.new_conversation(host);
    }

    /// Checks every selected model. Runs in the background next to any replies.
    fn on_test_connections(&mut self, host: &mut dyn HostOps) {
        for model in self.selected_models() {
            if self.pending_checks.values().any(|pending| *pending == model) {
                self.push_notice(format!("[{model}] connection test already running"));
                continue;
            }
            match host.start_check(&model) {
                Ok(check_id) => {
                    debug!(check_id, model = %model, "connection check dispatched");
                    self.push_notice(format!("[{model}] testing connection..."));
                    self.pending_checks.insert(check_id, model);
                }
                Err(error) => {
                    self.push_error(format!("[{model}] failed to start connection test: {error}"))
                }
            }
        }
    }

    pub fn on_check_finished(&mut self, check_id: RunId, outcome: Result<String, String>) {
        if self.should_exit {
            return;
        }
        let Some(model) = self.pending_checks.remove(&check_id) else {
            return;
        };
        match outcome {
            Ok(summary) => self.push_notice(format!("[{model}] connection ok: {summary}")),
            Err(error) => self.push_error(format!("[{model}] connection failed: {error}")),
        }
    }

    /// Cancels in-flight runs and starts over with the current selection.
    pub fn new_conversation(&mut self, host: &mut dyn HostOps) {
        self.cancel_active_runs(host);
        self.accumulator.reset();
        self.transcript.clear();
        self.transcript_epoch += 1;
        self.push_notice(format!(
            "New conversation with {}",
            self.selected_models().join(", ")
        ));
        host.request_render();
    }

    pub fn on_cancel(&mut self, host: &mut dyn HostOps) {
        match self.cancel_active_runs(host) {
            0 => self.push_notice("No replies in progress"),
            1 => self.push_notice("Reply cancelled"),
            count => self.push_notice(format!("{count} replies cancelled")),
        }
        host.request_render();
    }

    pub fn on_quit(&mut self, host: &mut dyn HostOps) {
        self.cancel_active_runs(host);
        for check_id in std::mem::take(&mut self.pending_checks).into_keys() {
            host.cancel_run(check_id);
        }
        self.mode = Mode::Exiting;
        self.should_exit = true;
        host.request_stop();
        host.request_render();
    }

    pub fn on_run_started(&mut self, run_id: RunId) {
        if !self.should_apply_run_event(run_id) || self.has_entry_for_run(run_id) {
            return;
        }
        let Some(model) = self.active_runs.get(&run_id).map(|reply| reply.model.clone()) else {
            return;
        };

        self.transcript.push(TranscriptEntry {
            speaker: Speaker::Model(model),
            content: String::new(),
            streaming: true,
            run_id: Some(run_id),
        });
    }

    pub fn on_run_chunk(&mut self, run_id: RunId, chunk: &str) {
        if !self.should_apply_run_event(run_id) || chunk.is_empty() {
            return;
        }
        let Some(reply) = self.active_runs.get_mut(&run_id) else {
            return;
        };
        reply.text.push_str(chunk);
        let model = reply.model.clone();

        if let Some(entry) = self.entry_for_run_mut(run_id) {
            entry.content.push_str(chunk);
        } else {
            self.transcript.push(TranscriptEntry {
                speaker: Speaker::Model(model),
                content: chunk.to_string(),
                streaming: true,
                run_id: Some(run_id),
            });
        }
    }

    pub fn on_run_finished(&mut self, run_id: RunId, host: &mut dyn HostOps) {
        if self.finish_cancelling(run_id) || !self.should_apply_run_event(run_id) {
            return;
        }
        let Some(reply) = self.active_runs.remove(&run_id) else {
            return;
        };
        self.finalize_stream(run_id);

        if reply.text.trim().is_empty() {
            self.show_empty_reply(run_id, &reply.model);
        } else {
            match self
                .accumulator
                .append_assistant(&reply.text, Some(&reply.model))
            {
                Ok(()) => {
                    if !self.accumulator.can_continue() {
                        self.on_turn_limit_reached(host);
                    }
                }
                Err(error) => {
                    self.push_error(format!("[{}] reply not recorded: {error}", reply.model))
                }
            }
        }

        self.refresh_mode();
        host.request_render();
    }

    pub fn on_run_failed(&mut self, run_id: RunId, error: &str) {
        if self.finish_cancelling(run_id) || !self.should_apply_run_event(run_id) {
            return;
        }
        let Some(reply) = self.active_runs.remove(&run_id) else {
            return;
        };

        self.finalize_stream(run_id);
        self.push_error(format!("[{}] {error}", reply.model));
        self.refresh_mode();
    }

    pub fn on_run_cancelled(&mut self, run_id: RunId) {
        if self.finish_cancelling(run_id) || !self.should_apply_run_event(run_id) {
            return;
        }
        let Some(reply) = self.active_runs.remove(&run_id) else {
            return;
        };

        self.finalize_stream(run_id);
        self.push_notice(format!("[{}] reply cancelled", reply.model));
        self.refresh_mode();
    }

    fn on_turn_limit_reached(&mut self, host: &mut dyn HostOps) {
        self.push_notice(format!(
            "Turn limit of {} reached. Use /new to start a new conversation.",
            self.accumulator.max_turns()
        ));
        let cancelled = self.cancel_active_runs(host);
        if cancelled > 0 {
            debug!(cancelled, "cancelled remaining runs after turn limit");
        }
    }

    /// Moves every active run to cancelling; partial replies are never committed.
    fn cancel_active_runs(&mut self, host: &mut dyn HostOps) -> usize {
        let run_ids = self.active_run_ids();
        for run_id in &run_ids {
            self.active_runs.remove(run_id);
            self.cancelling_runs.insert(*run_id);
            self.finalize_stream(*run_id);
            host.cancel_run(*run_id);
        }
        self.refresh_mode();
        run_ids.len()
    }

    /// Consumes the terminal event of a run cancelled earlier.
    fn finish_cancelling(&mut self, run_id: RunId) -> bool {
        if !self.cancelling_runs.remove(&run_id) {
            return false;
        }
        self.finalize_stream(run_id);
        true
    }

    fn should_apply_run_event(&self, run_id: RunId) -> bool {
        !self.should_exit && self.active_runs.contains_key(&run_id)
    }

    fn refresh_mode(&mut self) {
        if self.mode == Mode::Exiting {
            return;
        }
        self.mode = if self.active_runs.is_empty() {
            Mode::Idle
        } else {
            Mode::Running
        };
    }

    fn show_empty_reply(&mut self, run_id: RunId, model: &str) {
        if let Some(entry) = self.entry_for_run_mut(run_id) {
            entry.content = NO_REPLY_PLACEHOLDER.to_string();
            return;
        }
        self.transcript.push(TranscriptEntry {
            speaker: Speaker::Model(model.to_string()),
            content: NO_REPLY_PLACEHOLDER.to_string(),
            streaming: false,
            run_id: Some(run_id),
        });
    }

    fn finalize_stream(&mut self, run_id: RunId) {
        if let Some(entry) = self.entry_for_run_mut(run_id) {
            entry.streaming = false;
        }
    }

    fn has_entry_for_run(&self, run_id: RunId) -> bool {
        self.transcript
            .iter()
            .any(|entry| entry.run_id == Some(run_id))
    }

    fn entry_for_run_mut(&mut self, run_id: RunId) -> Option<&mut TranscriptEntry> {
        self.transcript
            .iter_mut()
            .rev()
            .find(|entry| entry.run_id == Some(run_id))
    }

    fn push_error(&mut self, content: String) {
        self.push_entry(Speaker::Error, content);
    }

    fn push_entry(&mut self, speaker: Speaker, content: String) {
        self.transcript.push(TranscriptEntry {
            speaker,
            content,
            streaming: false,
            run_id: None,
        });
    }
}
