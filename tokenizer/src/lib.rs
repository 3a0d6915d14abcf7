use std::{ops::Deref, sync::Arc};

use anyhow::Result;

pub mod chat_template;
pub mod factory;
pub mod huggingface;
pub mod mock;
pub mod stream;
pub mod traits;

#[cfg(test)]
mod tests;

pub use factory::{create_tokenizer, create_tokenizer_with_chat_template};
pub use stream::{decode_with_offsets, IncrementalDecode};
pub use traits::{Decoder, Encoder, Encoding, SpecialTokens, TokenIdType};

/// Cheaply cloneable handle over any tokenizer implementation
#[derive(Clone)]
pub struct Tokenizer(Arc<dyn traits::Tokenizer>);

impl Tokenizer {
    /// Load a tokenizer from a `tokenizer.json` file or model directory
    pub fn from_file(file_path: &str) -> Result<Tokenizer> {
        Ok(Tokenizer(create_tokenizer(file_path)?))
    }

    pub fn from_arc(tokenizer: Arc<dyn traits::Tokenizer>) -> Self {
        Tokenizer(tokenizer)
    }
}

impl Deref for Tokenizer {
    type Target = Arc<dyn traits::Tokenizer>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
