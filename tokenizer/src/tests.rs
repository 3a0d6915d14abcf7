use std::sync::Arc;

use crate::{
    mock::{self, BYTE_OFFSET, EOS_ID},
    traits::{Decoder, Encoder},
    Tokenizer,
};

fn mock_tokenizer() -> Tokenizer {
    Tokenizer::from_arc(Arc::new(mock::MockTokenizer::new()))
}

#[test]
fn test_tokenizer_wrapper() {
    let tokenizer = mock_tokenizer();

    let encoding = tokenizer.encode("Hello, world", false).unwrap();
    assert_eq!(encoding.token_ids(), &[15043, 29892, 3186]);

    let text = tokenizer.decode(&[15043, 29892, 3186], true).unwrap();
    assert_eq!(text, "Hello, world");

    assert_eq!(tokenizer.vocab_size(), 32000);
    assert_eq!(tokenizer.token_to_id("\u{2581}Hello"), Some(15043));
    assert_eq!(tokenizer.token_to_id("unknown"), None);
    assert_eq!(tokenizer.id_to_token(29892), Some(",".to_string()));
    assert_eq!(tokenizer.id_to_token(31999), None);
}

#[test]
fn test_decode_incremental_single_steps() {
    let tokenizer = mock_tokenizer();
    let history = [15043, 29892, 3186];

    // First step: nothing emitted yet, the whole decode is new text
    let step = tokenizer.decode_incremental(&history[..1], 0, 0, true).unwrap();
    assert_eq!(step.text, "Hello");
    assert_eq!((step.prefix_offset, step.read_offset), (0, 1));

    // prefix_text = decode([15043]) = "Hello", new_text = "Hello,"
    let step = tokenizer
        .decode_incremental(&history[..2], step.prefix_offset, step.read_offset, true)
        .unwrap();
    assert_eq!(step.text, ",");
    assert_eq!((step.prefix_offset, step.read_offset), (1, 2));

    // prefix_text = decode([29892]) = ",", new_text = ", world"
    let step = tokenizer
        .decode_incremental(&history, step.prefix_offset, step.read_offset, true)
        .unwrap();
    assert_eq!(step.text, " world");
    assert_eq!((step.prefix_offset, step.read_offset), (2, 3));
}

#[test]
fn test_decode_incremental_skips_special_tokens() {
    let tokenizer = mock_tokenizer();
    let step = tokenizer.decode_incremental(&[15043], 0, 0, true).unwrap();
    let step = tokenizer
        .decode_incremental(&[15043, EOS_ID], step.prefix_offset, step.read_offset, true)
        .unwrap();
    assert_eq!(step.text, "");
    assert_eq!((step.prefix_offset, step.read_offset), (0, 1));
}

#[test]
fn test_decode_incremental_holds_back_partial_utf8() {
    let tokenizer = mock_tokenizer();
    let mut history = vec![15043];

    let first = tokenizer.decode_incremental(&history, 0, 0, true).unwrap();
    let mut emitted = first.text;
    let mut offsets = (first.prefix_offset, first.read_offset);

    for b in " \u{1F389}".bytes() {
        history.push(BYTE_OFFSET + b as u32);
        let step = tokenizer
            .decode_incremental(&history, offsets.0, offsets.1, true)
            .unwrap();
        assert!(!step.text.contains('\u{FFFD}'));
        emitted.push_str(&step.text);
        offsets = (step.prefix_offset, step.read_offset);
    }

    assert_eq!(emitted, "Hello \u{1F389}");
    assert_eq!(offsets.1, history.len());
}

#[test]
fn test_special_tokens() {
    let tokenizer = mock_tokenizer();

    let special_tokens = tokenizer.get_special_tokens();
    assert_eq!(special_tokens.bos_token, Some("<s>".to_string()));
    assert_eq!(special_tokens.eos_token, Some("</s>".to_string()));
    assert_eq!(special_tokens.unk_token, Some("<unk>".to_string()));
    assert!(special_tokens.sep_token.is_none());
    assert!(special_tokens.pad_token.is_none());
}

#[test]
fn test_batch_encode() {
    let tokenizer = mock::MockTokenizer::new();
    let inputs = vec!["Hello", "world", "test"];
    let encodings = tokenizer.encode_batch(&inputs, false).unwrap();

    assert_eq!(encodings.len(), 3);
    assert_eq!(encodings[0].token_ids(), &[15043]);
    assert_eq!(encodings[1].token_ids(), &[3186]);
    assert_eq!(encodings[2].token_ids(), &[1243]);
}

#[test]
fn test_thread_safety() {
    use std::thread;

    let tokenizer = mock_tokenizer();

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let tokenizer_clone = tokenizer.clone();
            thread::spawn(move || {
                let encoding = tokenizer_clone.encode("Hello test", false).unwrap();
                let decoded = tokenizer_clone.decode(encoding.token_ids(), true).unwrap();
                assert_eq!(decoded, "Hello test");
                i
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

/// Regression test: the offset primitive must not panic when prefix_text.len()
/// falls mid-codepoint in new_text. Byte-fallback tokenizers produce this when
/// partial byte tokens merge into a multi-byte character once more context
/// arrives, changing the byte length of the prefix portion.
#[test]
fn test_decode_incremental_multibyte_char_boundary() {
    use anyhow::Result;

    use crate::traits::{Encoding, SpecialTokens, Tokenizer as TokenizerTrait};

    /// decode([1, 2])    -> "abc" (3 bytes, incomplete byte rendered as ASCII)
    /// decode([1, 2, 3]) -> "ab🎉" (6 bytes, merged into a 4-byte emoji)
    struct MultiByteTokenizer {
        special_tokens: SpecialTokens,
    }

    impl Encoder for MultiByteTokenizer {
        fn encode(&self, _input: &str, _add_special_tokens: bool) -> Result<Encoding> {
            Ok(Encoding::Plain(vec![]))
        }
    }

    impl Decoder for MultiByteTokenizer {
        fn decode(&self, token_ids: &[u32], _skip_special_tokens: bool) -> Result<String> {
            Ok(match token_ids {
                [1, 2] => "abc".into(),
                [1, 2, 3] => "ab\u{1F389}".into(),
                _ => String::new(),
            })
        }
    }

    impl TokenizerTrait for MultiByteTokenizer {
        fn vocab_size(&self) -> usize {
            10
        }
        fn get_special_tokens(&self) -> &SpecialTokens {
            &self.special_tokens
        }
        fn token_to_id(&self, _token: &str) -> Option<u32> {
            None
        }
        fn id_to_token(&self, _id: u32) -> Option<String> {
            None
        }
    }

    let tokenizer: Arc<dyn TokenizerTrait> = Arc::new(MultiByteTokenizer {
        special_tokens: SpecialTokens::default(),
    });

    let step = tokenizer.decode_incremental(&[1, 2, 3], 0, 2, false).unwrap();
    assert_eq!(step.text, "\u{1F389}");
    assert_eq!((step.prefix_offset, step.read_offset), (2, 3));
}
