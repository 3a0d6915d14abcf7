use std::sync::Arc;

use anyhow::Result;
use llm_tokenizer::{traits::Tokenizer, TokenIdType};
use tracing::debug;

use super::{DecodeMode, DecodeStrategy};

/// Decode state of one request under full re-decode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedecodeState {
    pub token_history: Vec<TokenIdType>,
    pub fragment_history: Vec<String>,
    /// Decoded text of the whole history as of the previous step
    pub last_full_text: String,
}

/// Re-decode the whole history each step and emit what grew past the last text.
///
/// When the new text does not extend the previous one (a later token changed
/// earlier characters) the step emits nothing; text already emitted is never
/// retracted.
pub struct FullRedecode {
    tokenizer: Arc<dyn Tokenizer>,
}

impl FullRedecode {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }
}

impl DecodeStrategy for FullRedecode {
    type State = RedecodeState;

    fn mode(&self) -> DecodeMode {
        DecodeMode::FullRedecode
    }

    fn step(&self, state: &mut RedecodeState, new_ids: &[TokenIdType]) -> Result<String> {
        let previous_len = state.token_history.len();
        state.token_history.extend_from_slice(new_ids);

        let full_text = match self.tokenizer.decode(&state.token_history, true) {
            Ok(text) => text,
            Err(e) => {
                state.token_history.truncate(previous_len);
                return Err(e);
            }
        };

        let fragment = match full_text.strip_prefix(state.last_full_text.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => {
                debug!(
                    previous_len = state.last_full_text.len(),
                    current_len = full_text.len(),
                    "Re-decoded text does not extend previous text"
                );
                String::new()
            }
        };

        state.last_full_text = full_text;
        state.fragment_history.push(fragment.clone());
        Ok(fragment)
    }

    fn reconstruct(&self, state: RedecodeState) -> String {
        state.fragment_history.concat()
    }
}
