use std::time::Duration;

use anyhow::Result;
use llm_tokenizer::TokenIdType;
use tracing::{debug, trace};

use super::{DecodeMode, DecodeStateStore, DecodeStrategy, Detokenize, StoreStats};

/// A decode strategy plus the per-request states it advances
pub struct IncrementalDecoder<S: DecodeStrategy> {
    strategy: S,
    store: DecodeStateStore<S::State>,
}

impl<S: DecodeStrategy> IncrementalDecoder<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            store: DecodeStateStore::new(),
        }
    }

    pub fn store(&self) -> &DecodeStateStore<S::State> {
        &self.store
    }
}

impl<S: DecodeStrategy> Detokenize for IncrementalDecoder<S> {
    fn mode(&self) -> DecodeMode {
        self.strategy.mode()
    }

    fn decode(&self, request_id: &str, new_ids: &[TokenIdType]) -> Result<String> {
        self.store.with_state(request_id, |state| {
            if new_ids.is_empty() {
                return Ok(String::new());
            }
            let fragment = self.strategy.step(state, new_ids)?;
            trace!(request_id, new_tokens = new_ids.len(), fragment = %fragment, "Decoded slice");
            Ok(fragment)
        })
    }

    fn finalize(&self, request_id: &str) -> String {
        match self.store.remove(request_id) {
            Some(state) => {
                let text = self.strategy.reconstruct(state);
                debug!(request_id, chars = text.chars().count(), "Finalized request");
                text
            }
            None => String::new(),
        }
    }

    fn cancel(&self, request_id: &str) -> bool {
        let cancelled = self.store.remove(request_id).is_some();
        if cancelled {
            debug!(request_id, "Cancelled request");
        }
        cancelled
    }

    fn evict_idle(&self, ttl: Duration) -> Vec<String> {
        self.store.evict_idle(ttl)
    }

    fn stats(&self) -> StoreStats {
        self.store.stats()
    }
}
