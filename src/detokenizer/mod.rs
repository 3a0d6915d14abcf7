//! Incremental detokenization
//!
//! Streaming generation hands the engine token ids a few at a time. Decoding
//! each slice on its own breaks multi-byte characters and tokenizer-specific
//! whitespace, so every request keeps a decode state and each call returns
//! only the text that became stable since the previous call.
//!
//! Two strategies are available, selected once at construction:
//!
//! - [`DecodeMode::OffsetTracking`] asks the tokenizer's offset-aware decode
//!   primitive for the delta and holds back text that ends in an incomplete
//!   character.
//! - [`DecodeMode::FullRedecode`] decodes the whole history on every call and
//!   emits the suffix past the previously decoded text.

mod decoder;
mod offset;
mod redecode;
mod store;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use llm_tokenizer::{traits::Tokenizer, TokenIdType};
use serde::{Deserialize, Serialize};

pub use decoder::IncrementalDecoder;
pub use offset::{OffsetState, OffsetTracking};
pub use redecode::{FullRedecode, RedecodeState};
pub use store::{DecodeStateStore, StoreStats};

/// Which incremental decode strategy an engine runs
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Offset-tracking decode with a prefix window
    #[default]
    OffsetTracking,
    /// Re-decode the full history and diff against the last text
    FullRedecode,
}

impl std::fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DecodeMode::OffsetTracking => "offset_tracking",
            DecodeMode::FullRedecode => "full_redecode",
        })
    }
}

/// One decode strategy: how a slice of new ids advances a request's state and
/// how the final text is rebuilt from it.
pub trait DecodeStrategy: Send + Sync + 'static {
    type State: Default + Send + 'static;

    fn mode(&self) -> DecodeMode;

    /// Advance `state` by `new_ids` (never empty) and return the new fragment.
    ///
    /// On error `state` must be left as it was before the call.
    fn step(&self, state: &mut Self::State, new_ids: &[TokenIdType]) -> Result<String>;

    /// Full decoded text of a finished request
    fn reconstruct(&self, state: Self::State) -> String;
}

/// Request-keyed incremental detokenizer, independent of strategy
pub trait Detokenize: Send + Sync {
    fn mode(&self) -> DecodeMode;

    /// Decode the next slice of `request_id`'s output.
    ///
    /// The first call for an id creates its state; an empty slice returns an
    /// empty fragment without touching the state.
    fn decode(&self, request_id: &str, new_ids: &[TokenIdType]) -> Result<String>;

    /// Return the full text of `request_id` and drop its state.
    ///
    /// Unknown ids yield an empty string.
    fn finalize(&self, request_id: &str) -> String;

    /// Drop the state of `request_id` without reconstructing its text
    fn cancel(&self, request_id: &str) -> bool;

    /// Drop states untouched for at least `ttl`; returns the evicted ids
    fn evict_idle(&self, ttl: Duration) -> Vec<String>;

    fn stats(&self) -> StoreStats;
}

/// Build the detokenizer for `mode` over a shared tokenizer
pub fn create_detokenizer(mode: DecodeMode, tokenizer: Arc<dyn Tokenizer>) -> Arc<dyn Detokenize> {
    match mode {
        DecodeMode::OffsetTracking => Arc::new(IncrementalDecoder::new(OffsetTracking::new(tokenizer))),
        DecodeMode::FullRedecode => Arc::new(IncrementalDecoder::new(FullRedecode::new(tokenizer))),
    }
}

#[cfg(test)]
mod tests {
    use llm_tokenizer::mock::MockTokenizer;

    use super::*;

    #[test]
    fn test_factory_selects_mode() {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(MockTokenizer::new());
        for mode in [DecodeMode::OffsetTracking, DecodeMode::FullRedecode] {
            let detokenizer = create_detokenizer(mode, Arc::clone(&tokenizer));
            assert_eq!(detokenizer.mode(), mode);
        }
    }

    #[test]
    fn test_mode_serde_names() {
        let mode: DecodeMode = serde_json::from_str("\"full_redecode\"").unwrap();
        assert_eq!(mode, DecodeMode::FullRedecode);
        assert_eq!(
            serde_json::to_string(&DecodeMode::OffsetTracking).unwrap(),
            "\"offset_tracking\""
        );
        assert_eq!(DecodeMode::FullRedecode.to_string(), "full_redecode");
        assert_eq!(DecodeMode::default(), DecodeMode::OffsetTracking);
    }
}
