use anyhow::Result;

use crate::{
    chat_template::{ChatTemplateError, ChatTemplateParams},
    stream::{decode_with_offsets, IncrementalDecode},
};

/// Type alias for token IDs
pub type TokenIdType = u32;

/// Result of an encode call.
#[derive(Debug, Clone)]
pub enum Encoding {
    /// Plain token id vector (mock and test tokenizers)
    Plain(Vec<TokenIdType>),
    /// Full HuggingFace encoding (ids, offsets, attention mask, ...)
    Hf(Box<tokenizers::tokenizer::Encoding>),
}

impl Encoding {
    /// Token ids of this encoding
    pub fn token_ids(&self) -> &[TokenIdType] {
        match self {
            Encoding::Plain(ids) => ids,
            Encoding::Hf(encoding) => encoding.get_ids(),
        }
    }

    /// Consume the encoding, returning the owned id vector
    pub fn into_token_ids(self) -> Vec<TokenIdType> {
        match self {
            Encoding::Plain(ids) => ids,
            Encoding::Hf(encoding) => encoding.get_ids().to_vec(),
        }
    }
}

/// Text to token ids
pub trait Encoder: Send + Sync {
    fn encode(&self, input: &str, add_special_tokens: bool) -> Result<Encoding>;

    fn encode_batch(&self, inputs: &[&str], add_special_tokens: bool) -> Result<Vec<Encoding>> {
        inputs
            .iter()
            .map(|input| self.encode(input, add_special_tokens))
            .collect()
    }
}

/// Token ids to text
pub trait Decoder: Send + Sync {
    fn decode(&self, token_ids: &[TokenIdType], skip_special_tokens: bool) -> Result<String>;

    /// Offset-tracking incremental decode over the whole token history.
    ///
    /// `prefix_offset..read_offset` marks the tokens whose text was already
    /// emitted; the returned offsets must be passed back unmodified on the next
    /// call. Tokenizers with a native primitive can override this.
    fn decode_incremental(
        &self,
        token_ids: &[TokenIdType],
        prefix_offset: usize,
        read_offset: usize,
        skip_special_tokens: bool,
    ) -> Result<IncrementalDecode> {
        decode_with_offsets(
            |ids| self.decode(ids, skip_special_tokens),
            token_ids,
            prefix_offset,
            read_offset,
        )
    }
}

/// Named special tokens of a tokenizer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialTokens {
    pub bos_token: Option<String>,
    pub eos_token: Option<String>,
    pub unk_token: Option<String>,
    pub sep_token: Option<String>,
    pub pad_token: Option<String>,
    pub cls_token: Option<String>,
    pub mask_token: Option<String>,
    pub additional_special_tokens: Vec<String>,
}

/// Full tokenizer capability consumed by the detokenization engine
pub trait Tokenizer: Encoder + Decoder {
    fn vocab_size(&self) -> usize;
    fn get_special_tokens(&self) -> &SpecialTokens;
    fn token_to_id(&self, token: &str) -> Option<TokenIdType>;
    fn id_to_token(&self, id: TokenIdType) -> Option<String>;

    /// Id of the end-of-sequence token, if the tokenizer defines one
    fn eos_token_id(&self) -> Option<TokenIdType> {
        self.get_special_tokens()
            .eos_token
            .as_deref()
            .and_then(|token| self.token_to_id(token))
    }

    /// Id of the padding token, falling back to the end-of-sequence id
    fn pad_token_id(&self) -> Option<TokenIdType> {
        self.get_special_tokens()
            .pad_token
            .as_deref()
            .and_then(|token| self.token_to_id(token))
            .or_else(|| self.eos_token_id())
    }

    fn has_chat_template(&self) -> bool {
        false
    }

    /// Render messages into a prompt string
    fn apply_chat_template(
        &self,
        _messages: &[serde_json::Value],
        _params: ChatTemplateParams,
    ) -> Result<String> {
        Err(ChatTemplateError::NotConfigured.into())
    }

    fn set_chat_template(&mut self, _template: String) {}
}
