//! Conversation state for chat-completion exchanges.
//!
//! Pure bookkeeping: an ordered, append-only message log per model plus the
//! turn counter used to cap a conversation. Nothing here performs network or
//! UI work; callers snapshot a [`ChatPayload`] for each outgoing request.

pub mod accumulator;
pub mod conversation;
pub mod error;
pub mod message;

pub use accumulator::Accumulator;
pub use conversation::Conversation;
pub use error::ConversationError;
pub use message::{ChatPayload, Message, Role};
