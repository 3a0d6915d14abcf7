//! Mock tokenizer for testing
//!
//! Behaves like a small SentencePiece/Llama vocabulary: word pieces carry a
//! `▁` whitespace marker, unknown text falls back to `<0xNN>` byte tokens, and
//! decode strips the single leading space SentencePiece inserts. Decoding token
//! by token therefore gives different text than decoding a sequence at once,
//! which is exactly what incremental detokenization has to handle.

use std::collections::HashMap;

use anyhow::{Error, Result};

use crate::{
    chat_template::{ChatTemplateParams, ChatTemplateState},
    traits::{Decoder, Encoder, Encoding, SpecialTokens, TokenIdType, Tokenizer as TokenizerTrait},
};

pub const UNK_ID: TokenIdType = 0;
pub const BOS_ID: TokenIdType = 1;
pub const EOS_ID: TokenIdType = 2;
/// Id of byte token `<0x00>`; byte `b` maps to `BYTE_OFFSET + b`
pub const BYTE_OFFSET: TokenIdType = 3;

const VOCAB_SIZE: usize = 32000;
const WORD_MARKER: char = '\u{2581}';

const PIECES: &[(&str, TokenIdType)] = &[
    ("<unk>", UNK_ID),
    ("<s>", BOS_ID),
    ("</s>", EOS_ID),
    ("\u{2581}", 29871),
    ("\u{2581}Hello", 15043),
    (",", 29892),
    ("\u{2581}world", 3186),
    ("!", 29991),
    (".", 29889),
    ("\u{2581}test", 1243),
    ("\u{2581}The", 450),
    ("\u{2581}quick", 4996),
    ("\u{2581}brown", 17354),
    ("\u{2581}fox", 1701),
];

const SPECIAL_IDS: &[TokenIdType] = &[UNK_ID, BOS_ID, EOS_ID];

pub struct MockTokenizer {
    vocab: HashMap<String, TokenIdType>,
    reverse_vocab: HashMap<TokenIdType, String>,
    special_tokens: SpecialTokens,
    chat_template: ChatTemplateState,
}

impl Default for MockTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTokenizer {
    pub fn new() -> Self {
        let mut vocab = HashMap::new();
        let mut reverse_vocab = HashMap::new();

        for &(piece, id) in PIECES {
            vocab.insert(piece.to_string(), id);
            reverse_vocab.insert(id, piece.to_string());
        }
        for byte in 0..=u8::MAX {
            let piece = format!("<0x{:02X}>", byte);
            let id = BYTE_OFFSET + byte as TokenIdType;
            vocab.insert(piece.clone(), id);
            reverse_vocab.insert(id, piece);
        }

        let special_tokens = SpecialTokens {
            bos_token: Some("<s>".to_string()),
            eos_token: Some("</s>".to_string()),
            unk_token: Some("<unk>".to_string()),
            ..Default::default()
        };

        Self {
            vocab,
            reverse_vocab,
            special_tokens,
            chat_template: ChatTemplateState::new(None),
        }
    }

    pub fn with_chat_template(template: &str) -> Self {
        let mut tokenizer = Self::new();
        tokenizer.set_chat_template(template.to_string());
        tokenizer
    }

    fn push_bytes(ids: &mut Vec<TokenIdType>, text: &str) {
        ids.extend(text.bytes().map(|b| BYTE_OFFSET + b as TokenIdType));
    }

    fn encode_word(&self, word: &str, ids: &mut Vec<TokenIdType>) {
        if let Some(&id) = self.vocab.get(word).filter(|id| SPECIAL_IDS.contains(*id)) {
            ids.push(id);
            return;
        }

        let stem = word.trim_end_matches([',', '!', '.']);
        let marked = format!("{}{}", WORD_MARKER, stem);
        match self.vocab.get(&marked) {
            Some(&id) if !stem.is_empty() => ids.push(id),
            _ => Self::push_bytes(ids, &format!(" {}", stem)),
        }

        for c in word[stem.len()..].chars() {
            match self.vocab.get(c.to_string().as_str()) {
                Some(&id) => ids.push(id),
                None => Self::push_bytes(ids, c.encode_utf8(&mut [0; 4])),
            }
        }
    }
}

impl Encoder for MockTokenizer {
    fn encode(&self, input: &str, add_special_tokens: bool) -> Result<Encoding> {
        let mut ids = Vec::new();
        if add_special_tokens {
            ids.push(BOS_ID);
        }
        for word in input.split_whitespace() {
            self.encode_word(word, &mut ids);
        }
        Ok(Encoding::Plain(ids))
    }
}

impl Decoder for MockTokenizer {
    fn decode(&self, token_ids: &[TokenIdType], skip_special_tokens: bool) -> Result<String> {
        let mut bytes = Vec::new();
        for &id in token_ids {
            if skip_special_tokens && SPECIAL_IDS.contains(&id) {
                continue;
            }
            if (BYTE_OFFSET..BYTE_OFFSET + 256).contains(&id) {
                bytes.push((id - BYTE_OFFSET) as u8);
                continue;
            }
            let piece = self
                .reverse_vocab
                .get(&id)
                .ok_or_else(|| Error::msg(format!("Unknown token id: {}", id)))?;
            bytes.extend(piece.replace(WORD_MARKER, " ").into_bytes());
        }

        let text = String::from_utf8_lossy(&bytes);
        Ok(text.strip_prefix(' ').unwrap_or(&text).to_string())
    }
}

impl TokenizerTrait for MockTokenizer {
    fn vocab_size(&self) -> usize {
        VOCAB_SIZE
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

    fn apply_chat_template(
        &self,
        messages: &[serde_json::Value],
        params: ChatTemplateParams,
    ) -> Result<String> {
        self.chat_template.apply(messages, params)
    }

    fn set_chat_template(&mut self, template: String) {
        self.chat_template.set(template);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_words_and_punctuation() {
        let tokenizer = MockTokenizer::new();
        let encoding = tokenizer.encode("Hello, world", false).unwrap();
        assert_eq!(encoding.token_ids(), &[15043, 29892, 3186]);

        let encoding = tokenizer.encode("Hello", true).unwrap();
        assert_eq!(encoding.token_ids(), &[BOS_ID, 15043]);
    }

    #[test]
    fn test_unknown_words_fall_back_to_bytes() {
        let tokenizer = MockTokenizer::new();
        let ids = tokenizer.encode("Hi", false).unwrap().into_token_ids();
        let expected: Vec<TokenIdType> = " Hi".bytes().map(|b| BYTE_OFFSET + b as u32).collect();
        assert_eq!(ids, expected);
        assert_eq!(tokenizer.decode(&ids, true).unwrap(), "Hi");
    }

    #[test]
    fn test_decode_is_context_sensitive() {
        let tokenizer = MockTokenizer::new();
        let whole = tokenizer.decode(&[15043, 29892, 3186], true).unwrap();
        assert_eq!(whole, "Hello, world");

        let piecewise: String = [15043, 29892, 3186]
            .iter()
            .map(|&id| tokenizer.decode(&[id], true).unwrap())
            .collect();
        assert_eq!(piecewise, "Hello,world");
    }

    #[test]
    fn test_skip_special_tokens() {
        let tokenizer = MockTokenizer::new();
        assert_eq!(
            tokenizer.decode(&[BOS_ID, 15043, EOS_ID], true).unwrap(),
            "Hello"
        );
        assert_eq!(
            tokenizer.decode(&[BOS_ID, 15043, EOS_ID], false).unwrap(),
            "<s> Hello</s>"
        );
    }

    #[test]
    fn test_incomplete_utf8_decodes_lossy() {
        let tokenizer = MockTokenizer::new();
        let party: Vec<TokenIdType> = "\u{1F389}"
            .bytes()
            .map(|b| BYTE_OFFSET + b as TokenIdType)
            .collect();
        assert!(tokenizer.decode(&party[..2], true).unwrap().ends_with('\u{FFFD}'));
        assert_eq!(tokenizer.decode(&party, true).unwrap(), "\u{1F389}");
    }

    #[test]
    fn test_unknown_id_is_an_error() {
        let tokenizer = MockTokenizer::new();
        assert!(tokenizer.decode(&[31999], true).is_err());
    }

    #[test]
    fn test_eos_and_pad_ids() {
        let tokenizer = MockTokenizer::new();
        assert_eq!(tokenizer.eos_token_id(), Some(EOS_ID));
        // No pad token defined: falls back to EOS
        assert_eq!(tokenizer.pad_token_id(), Some(EOS_ID));
    }
}
