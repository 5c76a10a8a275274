use crate::conversation::Conversation;
use crate::error::ConversationError;
use crate::message::ChatPayload;

/// Per-model conversation state for single- and multi-model chats.
///
/// Every tracked model owns an independent [`Conversation`]. User turns are
/// replayed into all of them; assistant turns land only in the sequence of the
/// model that produced them. Models keep their selection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulator {
    sequences: Vec<Conversation>,
    max_turns: u32,
    system_prompt: Option<String>,
    context_window: Option<usize>,
}

impl Accumulator {
    #[must_use]
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut accumulator = Self {
            sequences: Vec::new(),
            max_turns: 0,
            system_prompt: None,
            context_window: None,
        };
        accumulator.reset_with_models(models);
        accumulator
    }

    #[must_use]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.set_max_turns(max_turns);
        self
    }

    /// Seeds every sequence with a system message, now and after each reset.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = if prompt.trim().is_empty() {
            None
        } else {
            Some(prompt)
        };
        self.reset();
        self
    }

    /// Limits payloads to the most recent `window` non-system messages.
    #[must_use]
    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = Some(window);
        self
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn set_max_turns(&mut self, max_turns: u32) {
        self.max_turns = max_turns;
        for sequence in &mut self.sequences {
            sequence.set_max_turns(max_turns);
        }
    }

    pub fn models(&self) -> Vec<&str> {
        self.sequences.iter().map(Conversation::model).collect()
    }

    pub fn is_multi_model(&self) -> bool {
        self.sequences.len() > 1
    }

    /// Clears every sequence and turn counter, keeping the tracked models.
    pub fn reset(&mut self) {
        for sequence in &mut self.sequences {
            sequence.reset(None);
            if let Some(prompt) = &self.system_prompt {
                sequence.append_system(prompt.clone());
            }
        }
    }

    /// Replaces the tracked models with fresh, empty sequences.
    ///
    /// Duplicate names are collapsed; the first occurrence keeps its position.
    pub fn reset_with_models<I, S>(&mut self, models: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sequences: Vec<Conversation> = Vec::new();
        for model in models {
            let model = model.into();
            let model = model.trim();
            if model.is_empty() || sequences.iter().any(|seq| seq.model() == model) {
                continue;
            }
            sequences.push(Conversation::new(model).with_max_turns(self.max_turns));
        }
        self.sequences = sequences;
        self.reset();
    }

    pub fn append_user(&mut self, text: &str) {
        for sequence in &mut self.sequences {
            sequence.append_user(text);
        }
    }

    /// Appends a reply to the named sequence, or the sole one when `model` is `None`.
    pub fn append_assistant(
        &mut self,
        text: &str,
        model: Option<&str>,
    ) -> Result<(), ConversationError> {
        self.sequence_mut(model)?.append_assistant(text);
        Ok(())
    }

    /// True while no tracked sequence has reached `max_turns`.
    pub fn can_continue(&self) -> bool {
        self.max_turns == 0 || self.highest_turn_count() < self.max_turns
    }

    pub fn highest_turn_count(&self) -> u32 {
        self.sequences
            .iter()
            .map(Conversation::turn_count)
            .max()
            .unwrap_or(0)
    }

    pub fn turn_count(&self, model: Option<&str>) -> Result<u32, ConversationError> {
        Ok(self.sequence(model)?.turn_count())
    }

    pub fn conversation(&self, model: Option<&str>) -> Result<&Conversation, ConversationError> {
        self.sequence(model)
    }

    /// Returns `{model, messages}` as an owned copy for one outgoing request.
    pub fn payload_for(&self, model: Option<&str>) -> Result<ChatPayload, ConversationError> {
        Ok(self.sequence(model)?.payload_with_window(self.context_window))
    }

    fn sequence(&self, model: Option<&str>) -> Result<&Conversation, ConversationError> {
        let index = self.resolve(model)?;
        Ok(&self.sequences[index])
    }

    fn sequence_mut(&mut self, model: Option<&str>) -> Result<&mut Conversation, ConversationError> {
        let index = self.resolve(model)?;
        Ok(&mut self.sequences[index])
    }

    fn resolve(&self, model: Option<&str>) -> Result<usize, ConversationError> {
        match (model, self.sequences.len()) {
            (_, 0) => Err(ConversationError::NoModels),
            (None, 1) => Ok(0),
            (None, count) => Err(ConversationError::AmbiguousModel { count }),
            (Some(model), _) => self
                .sequences
                .iter()
                .position(|sequence| sequence.model() == model)
                .ok_or_else(|| ConversationError::UnknownModel(model.to_string())),
        }
    }
}
