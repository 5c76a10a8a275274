use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("no model is tracked by this conversation")]
    NoModels,

    #[error("model '{0}' is not part of this conversation")]
    UnknownModel(String),

    #[error("a model name is required when {count} models are tracked")]
    AmbiguousModel { count: usize },
}
