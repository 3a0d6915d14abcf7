use std::sync::Arc;

use anyhow::Result;
use llm_tokenizer::{traits::Tokenizer, TokenIdType};

use super::{DecodeMode, DecodeStrategy};

/// Decode state of one request under offset tracking
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetState {
    /// Start of the context window re-decoded on the next step
    pub prefix_offset: usize,
    /// End of the already-emitted tokens
    pub read_offset: usize,
    pub token_history: Vec<TokenIdType>,
    /// Every fragment returned so far, empty ones included
    pub fragment_history: Vec<String>,
}

/// Incremental decode through the tokenizer's offset-aware primitive.
///
/// Text ending in an incomplete character is held back (empty fragment,
/// offsets unchanged) until a later slice completes it.
pub struct OffsetTracking {
    tokenizer: Arc<dyn Tokenizer>,
}

impl OffsetTracking {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }
}

impl DecodeStrategy for OffsetTracking {
    type State = OffsetState;

    fn mode(&self) -> DecodeMode {
        DecodeMode::OffsetTracking
    }

    fn step(&self, state: &mut OffsetState, new_ids: &[TokenIdType]) -> Result<String> {
        let previous_len = state.token_history.len();
        state.token_history.extend_from_slice(new_ids);

        let decoded = match self.tokenizer.decode_incremental(
            &state.token_history,
            state.prefix_offset,
            state.read_offset,
            true,
        ) {
            Ok(decoded) => decoded,
            Err(e) => {
                state.token_history.truncate(previous_len);
                return Err(e);
            }
        };

        state.prefix_offset = decoded.prefix_offset;
        state.read_offset = decoded.read_offset;
        state.fragment_history.push(decoded.text.clone());
        Ok(decoded.text)
    }

    fn reconstruct(&self, state: OffsetState) -> String {
        state.fragment_history.concat()
    }
}
