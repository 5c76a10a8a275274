use crate::message::{ChatPayload, Message, Role};

/// Default model used when a conversation is created without one.
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// One ordered message log for a single model.
///
/// `turn_count` counts assistant replies only. `max_turns == 0` means the
/// conversation is unlimited; enforcing the cap is the caller's job, this type
/// only reports it through [`Conversation::can_continue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    model: String,
    messages: Vec<Message>,
    turn_count: u32,
    max_turns: u32,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl Conversation {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            turn_count: 0,
            max_turns: 0,
        }
    }

    #[must_use]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn set_max_turns(&mut self, max_turns: u32) {
        self.max_turns = max_turns;
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Clears messages and the turn counter, optionally switching models.
    pub fn reset(&mut self, model: Option<&str>) {
        if let Some(model) = model {
            self.model = model.to_string();
        }
        self.messages.clear();
        self.turn_count = 0;
    }

    pub fn append_system(&mut self, text: impl Into<String>) {
        self.messages.push(Message::new(Role::System, text));
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::new(Role::User, text));
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::new(Role::Assistant, text));
        self.turn_count = self.turn_count.saturating_add(1);
    }

    pub fn can_continue(&self) -> bool {
        self.max_turns == 0 || self.turn_count < self.max_turns
    }

    /// Returns a deep copy of the full sequence.
    pub fn payload(&self) -> ChatPayload {
        self.payload_with_window(None)
    }

    /// Returns a copy keeping every system message plus at most `window` of the
    /// most recent other messages, in original order.
    pub fn payload_with_window(&self, window: Option<usize>) -> ChatPayload {
        let messages = match window {
            None => self.messages.clone(),
            Some(window) => {
                let conversational = self
                    .messages
                    .iter()
                    .filter(|message| message.role != Role::System)
                    .count();
                let mut skip = conversational.saturating_sub(window);
                self.messages
                    .iter()
                    .filter(|message| {
                        if message.role == Role::System {
                            return true;
                        }
                        if skip > 0 {
                            skip -= 1;
                            return false;
                        }
                        true
                    })
                    .cloned()
                    .collect()
            }
        };

        ChatPayload {
            model: self.model.clone(),
            messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Conversation;
    use crate::message::Message;

    #[test]
    fn user_then_assistant_counts_one_turn() {
        let mut conversation = Conversation::new("deepseek-chat");
        conversation.append_user("hello");
        conversation.append_assistant("hi there");

        assert_eq!(
            conversation.messages(),
            &[Message::user("hello"), Message::assistant("hi there")]
        );
        assert_eq!(conversation.turn_count(), 1);
    }

    #[test]
    fn can_continue_ignores_turn_count_when_unlimited() {
        let mut conversation = Conversation::new("m");
        for _ in 0..5 {
            conversation.append_assistant("reply");
        }
        assert!(conversation.can_continue());
    }

    #[test]
    fn can_continue_stops_exactly_at_cap() {
        let mut conversation = Conversation::new("m").with_max_turns(2);
        assert!(conversation.can_continue());
        conversation.append_assistant("one");
        assert!(conversation.can_continue());
        conversation.append_assistant("two");
        assert!(!conversation.can_continue());
    }

    #[test]
    fn payload_is_detached_from_later_mutation() {
        let mut conversation = Conversation::new("m");
        conversation.append_user("first");

        let mut payload = conversation.payload();
        payload.messages.push(Message::user("injected"));
        payload.messages[0].content.push_str(" edited");

        assert_eq!(conversation.payload().messages, vec![Message::user("first")]);
    }

    #[test]
    fn window_keeps_system_messages_and_most_recent_turns() {
        let mut conversation = Conversation::new("m");
        conversation.append_system("be brief");
        conversation.append_user("a");
        conversation.append_assistant("b");
        conversation.append_user("c");
        conversation.append_assistant("d");

        let payload = conversation.payload_with_window(Some(2));
        assert_eq!(
            payload.messages,
            vec![
                Message::system("be brief"),
                Message::user("c"),
                Message::assistant("d"),
            ]
        );
    }

    #[test]
    fn reset_clears_messages_and_turns_and_switches_model() {
        let mut conversation = Conversation::new("m").with_max_turns(1);
        conversation.append_user("a");
        conversation.append_assistant("b");

        conversation.reset(Some("other"));

        assert!(conversation.is_empty());
        assert_eq!(conversation.turn_count(), 0);
        assert_eq!(conversation.model(), "other");
        assert_eq!(conversation.max_turns(), 1);
    }
}
