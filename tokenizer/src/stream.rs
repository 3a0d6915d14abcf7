// Offset-tracking incremental decode

use anyhow::Result;

use crate::traits::TokenIdType;

/// Replacement character produced by lossy decoding of an incomplete UTF-8 sequence
const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Output of one offset-tracking decode step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementalDecode {
    /// Newly stable text; empty when the tail is still unstable
    pub text: String,
    pub prefix_offset: usize,
    pub read_offset: usize,
}

/// Decode the stable suffix of `token_ids` given the previous offsets.
///
/// `prefix_offset..read_offset` is the window whose text was already emitted.
/// Decoding it again alongside the new tokens gives the context the tokenizer
/// needs to place whitespace and merge bytes correctly; only the text past the
/// window is returned. When nothing new is stable yet (the decode still ends in
/// U+FFFD, or did not grow), the offsets are returned unchanged so the pending
/// tokens are retried on the next call.
pub fn decode_with_offsets<F>(
    decode: F,
    token_ids: &[TokenIdType],
    prefix_offset: usize,
    read_offset: usize,
) -> Result<IncrementalDecode>
where
    F: Fn(&[TokenIdType]) -> Result<String>,
{
    let read_offset = read_offset.min(token_ids.len());
    let prefix_offset = prefix_offset.min(read_offset);

    let prefix_text = decode(&token_ids[prefix_offset..read_offset])?;
    let new_text = decode(&token_ids[prefix_offset..])?;

    if new_text.len() > prefix_text.len() && !new_text.ends_with(REPLACEMENT_CHAR) {
        // Byte-fallback merges can change the byte length of the prefix
        // portion, so the split point may land inside a codepoint.
        let mut split_at = prefix_text.len();
        while !new_text.is_char_boundary(split_at) {
            split_at -= 1;
        }

        Ok(IncrementalDecode {
            text: new_text[split_at..].to_string(),
            prefix_offset: read_offset,
            read_offset: token_ids.len(),
        })
    } else {
        Ok(IncrementalDecode {
            text: String::new(),
            prefix_offset,
            read_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(ids: &[TokenIdType]) -> Result<String> {
        Ok(ids
            .iter()
            .map(|id| format!("w{}", id))
            .collect::<Vec<_>>()
            .join(" "))
    }

    #[test]
    fn test_first_step_emits_everything() {
        let out = decode_with_offsets(words, &[1, 2], 0, 0).unwrap();
        assert_eq!(out.text, "w1 w2");
        assert_eq!((out.prefix_offset, out.read_offset), (0, 2));
    }

    #[test]
    fn test_step_emits_only_suffix_with_leading_space() {
        let out = decode_with_offsets(words, &[1, 2, 3], 0, 2).unwrap();
        assert_eq!(out.text, " w3");
        assert_eq!((out.prefix_offset, out.read_offset), (2, 3));
    }

    #[test]
    fn test_unstable_tail_is_held_back() {
        let lossy = |ids: &[TokenIdType]| -> Result<String> {
            Ok(if ids.last() == Some(&9) {
                "ab\u{FFFD}".to_string()
            } else {
                "ab".to_string()
            })
        };
        let out = decode_with_offsets(lossy, &[1, 9], 0, 1).unwrap();
        assert_eq!(out.text, "");
        assert_eq!((out.prefix_offset, out.read_offset), (0, 1));
    }

    #[test]
    fn test_split_point_inside_codepoint_is_floored() {
        let merging = |ids: &[TokenIdType]| -> Result<String> {
            Ok(match ids {
                [1, 2] => "abc".into(),
                [1, 2, 3] => "ab\u{1F389}".into(),
                _ => String::new(),
            })
        };
        let out = decode_with_offsets(merging, &[1, 2, 3], 0, 2).unwrap();
        assert_eq!(out.text, "\u{1F389}");
    }

    #[test]
    fn test_out_of_range_offsets_are_clamped() {
        let out = decode_with_offsets(words, &[1], 4, 7).unwrap();
        assert_eq!(out.text, "");
        assert_eq!((out.prefix_offset, out.read_offset), (1, 1));
    }
}
