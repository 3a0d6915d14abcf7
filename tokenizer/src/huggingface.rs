use std::{collections::HashMap, path::Path};

use anyhow::{Error, Result};
use serde_json::Value;
use tokenizers::tokenizer::Tokenizer as HfTokenizer;
use tracing::{debug, info};

use crate::{
    chat_template::{
        chat_template_from_config, load_chat_template_from_file, ChatTemplateParams,
        ChatTemplateState,
    },
    traits::{Decoder, Encoder, Encoding, SpecialTokens, TokenIdType, Tokenizer as TokenizerTrait},
};

/// HuggingFace tokenizer wrapper
pub struct HuggingFaceTokenizer {
    tokenizer: HfTokenizer,
    special_tokens: SpecialTokens,
    vocab: HashMap<String, TokenIdType>,
    reverse_vocab: HashMap<TokenIdType, String>,
    chat_template: ChatTemplateState,
}

impl HuggingFaceTokenizer {
    /// Create a tokenizer from a `tokenizer.json` file.
    ///
    /// `tokenizer_config.json` next to it, when present, supplies the named
    /// special tokens and the chat template.
    pub fn from_file(file_path: &str) -> Result<Self> {
        Self::from_file_with_chat_template(file_path, None)
    }

    /// Same as [`Self::from_file`], with an explicit chat template file that
    /// overrides the one from `tokenizer_config.json`.
    pub fn from_file_with_chat_template(
        file_path: &str,
        chat_template_path: Option<&str>,
    ) -> Result<Self> {
        let tokenizer = HfTokenizer::from_file(file_path)
            .map_err(|e| Error::msg(format!("Failed to load tokenizer '{}': {}", file_path, e)))?;

        let config = load_tokenizer_config(Path::new(file_path));

        let mut chat_template = config.as_ref().and_then(chat_template_from_config);
        if let Some(template_path) = chat_template_path {
            chat_template = load_chat_template_from_file(template_path)?;
        }

        let mut hf = Self::from_tokenizer(tokenizer);
        if let Some(config) = &config {
            hf.special_tokens = merge_special_tokens(parse_special_tokens(config), hf.special_tokens);
        }
        hf.chat_template = ChatTemplateState::new(chat_template);

        info!(
            path = file_path,
            vocab_size = hf.vocab_size(),
            bos_token = ?hf.special_tokens.bos_token,
            bos_token_id = ?hf.special_tokens.bos_token.as_deref().and_then(|t| hf.token_to_id(t)),
            eos_token = ?hf.special_tokens.eos_token,
            eos_token_id = ?hf.eos_token_id(),
            chat_template = hf.chat_template.is_configured(),
            "Loaded HuggingFace tokenizer"
        );

        Ok(hf)
    }

    /// Create from an existing HuggingFace tokenizer
    pub fn from_tokenizer(tokenizer: HfTokenizer) -> Self {
        let special_tokens = Self::extract_special_tokens(&tokenizer);
        // true = include special tokens and added_tokens
        let vocab = tokenizer.get_vocab(true);
        let reverse_vocab: HashMap<TokenIdType, String> = vocab
            .iter()
            .map(|(token, &id)| (id, token.clone()))
            .collect();

        HuggingFaceTokenizer {
            tokenizer,
            special_tokens,
            vocab,
            reverse_vocab,
            chat_template: ChatTemplateState::new(None),
        }
    }

    /// Guess special tokens from well-known spellings present in the vocab
    fn extract_special_tokens(tokenizer: &HfTokenizer) -> SpecialTokens {
        let vocab = tokenizer.get_vocab(true);

        let find_token = |patterns: &[&str]| -> Option<String> {
            patterns
                .iter()
                .find(|pattern| vocab.contains_key(**pattern))
                .map(|pattern| pattern.to_string())
        };

        let additional_special_tokens: Vec<String> = tokenizer
            .get_added_tokens_decoder()
            .values()
            .filter(|token| token.special)
            .map(|token| token.content.clone())
            .collect();

        SpecialTokens {
            bos_token: find_token(&["<s>", "<|startoftext|>", "<|begin_of_text|>", "<BOS>", "[CLS]"]),
            eos_token: find_token(&["</s>", "<|endoftext|>", "<|end_of_text|>", "<EOS>", "[SEP]"]),
            unk_token: find_token(&["<unk>", "<UNK>", "[UNK]"]),
            sep_token: find_token(&["[SEP]", "<sep>", "<SEP>"]),
            pad_token: find_token(&["<pad>", "<PAD>", "[PAD]"]),
            cls_token: find_token(&["[CLS]", "<cls>", "<CLS>"]),
            mask_token: find_token(&["[MASK]", "<mask>", "<MASK>"]),
            additional_special_tokens,
        }
    }
}

/// Read `tokenizer_config.json` from the directory holding `tokenizer_path`
fn load_tokenizer_config(tokenizer_path: &Path) -> Option<Value> {
    let config_path = tokenizer_path.parent()?.join("tokenizer_config.json");
    let content = std::fs::read_to_string(&config_path).ok()?;
    match serde_json::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            debug!(path = %config_path.display(), error = %e, "Ignoring unparsable tokenizer_config.json");
            None
        }
    }
}

/// Named special tokens from `tokenizer_config.json`.
///
/// Values are either plain strings (`"eos_token": "</s>"`) or AddedToken
/// objects (`"eos_token": {"content": "</s>", ...}`).
fn parse_special_tokens(config: &Value) -> SpecialTokens {
    let as_token = |v: &Value| {
        v.as_str()
            .map(String::from)
            .or_else(|| v.get("content").and_then(Value::as_str).map(String::from))
    };
    let get = |key: &str| config.get(key).and_then(as_token);

    SpecialTokens {
        bos_token: get("bos_token"),
        eos_token: get("eos_token"),
        unk_token: get("unk_token"),
        sep_token: get("sep_token"),
        pad_token: get("pad_token"),
        cls_token: get("cls_token"),
        mask_token: get("mask_token"),
        additional_special_tokens: config
            .get("additional_special_tokens")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(as_token).collect())
            .unwrap_or_default(),
    }
}

/// Config values win; vocab guesses fill the gaps
fn merge_special_tokens(config: SpecialTokens, guessed: SpecialTokens) -> SpecialTokens {
    SpecialTokens {
        bos_token: config.bos_token.or(guessed.bos_token),
        eos_token: config.eos_token.or(guessed.eos_token),
        unk_token: config.unk_token.or(guessed.unk_token),
        sep_token: config.sep_token.or(guessed.sep_token),
        pad_token: config.pad_token.or(guessed.pad_token),
        cls_token: config.cls_token.or(guessed.cls_token),
        mask_token: config.mask_token.or(guessed.mask_token),
        additional_special_tokens: if config.additional_special_tokens.is_empty() {
            guessed.additional_special_tokens
        } else {
            config.additional_special_tokens
        },
    }
}

impl Encoder for HuggingFaceTokenizer {
    fn encode(&self, input: &str, add_special_tokens: bool) -> Result<Encoding> {
        self.tokenizer
            .encode(input, add_special_tokens)
            .map_err(|e| Error::msg(format!("Encoding failed: {}", e)))
            .map(|encoding| Encoding::Hf(Box::new(encoding)))
    }

    fn encode_batch(&self, inputs: &[&str], add_special_tokens: bool) -> Result<Vec<Encoding>> {
        self.tokenizer
            .encode_batch(inputs.to_vec(), add_special_tokens)
            .map_err(|e| Error::msg(format!("Batch encoding failed: {}", e)))
            .map(|encodings| {
                encodings
                    .into_iter()
                    .map(|e| Encoding::Hf(Box::new(e)))
                    .collect()
            })
    }
}

impl Decoder for HuggingFaceTokenizer {
    fn decode(&self, token_ids: &[TokenIdType], skip_special_tokens: bool) -> Result<String> {
        self.tokenizer
            .decode(token_ids, skip_special_tokens)
            .map_err(|e| Error::msg(format!("Decoding failed: {}", e)))
    }
}

impl TokenizerTrait for HuggingFaceTokenizer {
    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    fn get_special_tokens(&self) -> &SpecialTokens {
        &self.special_tokens
    }

    fn token_to_id(&self, token: &str) -> Option<TokenIdType> {
        self.vocab.get(token).copied()
    }

    fn id_to_token(&self, id: TokenIdType) -> Option<String> {
        self.reverse_vocab.get(&id).cloned()
    }

    fn has_chat_template(&self) -> bool {
        self.chat_template.is_configured()
    }

    fn apply_chat_template(&self, messages: &[Value], params: ChatTemplateParams) -> Result<String> {
        self.chat_template.apply(messages, params)
    }

    fn set_chat_template(&mut self, template: String) {
        self.chat_template.set(template);
    }
}
