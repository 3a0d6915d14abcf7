use thiserror::Error;

use crate::config::ConfigError;

pub type ProcessorResult<T> = Result<T, ProcessorError>;

#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Encode, decode or chat template failure, passed through unchanged
    #[error(transparent)]
    Tokenizer(#[from] anyhow::Error),

    #[error("Request '{0}' has none of input_ids, text or messages")]
    MissingPrompt(String),

    #[error("Request '{0}' carries chat messages but the tokenizer has no chat template")]
    ChatTemplateRequired(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
