//! Byte-level BPE tokenizer built from GGUF metadata
//!
//! Text is split with the Llama 3 pre-tokenization pattern, each chunk's
//! UTF-8 bytes are mapped through the GPT-2 byte alphabet, and adjacent
//! tokens are merged by rank until no ranked pair remains.

mod bytes;
pub mod chat;

pub use chat::{ChatFormat, Message, Role};

use crate::gguf::Metadata;
use crate::{Error, Result};
use fancy_regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Llama 3 pre-tokenization pattern
pub const LLAMA_3_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// First id of the special token range
pub const SPECIAL_TOKEN_BASE: u32 = 128_000;

pub const MODEL_KEY: &str = "tokenizer.ggml.model";
pub const TOKENS_KEY: &str = "tokenizer.ggml.tokens";
pub const MERGES_KEY: &str = "tokenizer.ggml.merges";

#[derive(Debug, Clone, Copy)]
struct Merge {
    rank: usize,
    merged: u32,
}

/// GPT-2 style byte-level BPE tokenizer
#[derive(Debug, Clone)]
pub struct Tokenizer {
    /// Token strings by id
    vocab: Vec<String>,
    token_to_id: HashMap<String, u32>,
    /// Adjacent pair to its merge rule
    merges: HashMap<(u32, u32), Merge>,
    /// Ids at or above [`SPECIAL_TOKEN_BASE`], keyed by text
    special_tokens: HashMap<String, u32>,
    /// Single-byte token per byte value
    byte_tokens: [Option<u32>; 256],
    pattern: Regex,
}

impl Tokenizer {
    /// Build from `tokenizer.ggml.*` metadata
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        match metadata.get_str(MODEL_KEY) {
            Some("gpt2") => {}
            other => {
                return Err(Error::Tokenizer(format!(
                    "expected gpt2 tokenizer model, got {:?}",
                    other
                )))
            }
        }

        let tokens = metadata
            .get_string_array(TOKENS_KEY)
            .ok_or_else(|| Error::Tokenizer(format!("missing or malformed {}", TOKENS_KEY)))?;
        let merges = metadata
            .get_string_array(MERGES_KEY)
            .ok_or_else(|| Error::Tokenizer(format!("missing or malformed {}", MERGES_KEY)))?;

        Self::new(
            tokens.into_iter().map(str::to_string).collect(),
            &merges,
        )
    }

    /// Build from a vocabulary (index is id) and `"left right"` merge rules
    /// in priority order
    pub fn new<S: AsRef<str>>(vocab: Vec<String>, merges: &[S]) -> Result<Self> {
        if vocab.len() > u32::MAX as usize {
            return Err(Error::Tokenizer(format!(
                "vocabulary of {} tokens does not fit u32 ids",
                vocab.len()
            )));
        }

        let mut token_to_id = HashMap::with_capacity(vocab.len());
        for (id, token) in vocab.iter().enumerate() {
            token_to_id.insert(token.clone(), id as u32);
        }

        let mut merge_table = HashMap::with_capacity(merges.len());
        let mut skipped = 0usize;
        for (rank, rule) in merges.iter().enumerate() {
            let Some((left, right)) = rule.as_ref().split_once(' ') else {
                skipped += 1;
                continue;
            };
            let merged = format!("{}{}", left, right);
            match (
                token_to_id.get(left),
                token_to_id.get(right),
                token_to_id.get(&merged),
            ) {
                (Some(&l), Some(&r), Some(&m)) => {
                    merge_table.insert((l, r), Merge { rank, merged: m });
                }
                _ => skipped += 1,
            }
        }

        let special_tokens = vocab
            .iter()
            .enumerate()
            .skip(SPECIAL_TOKEN_BASE as usize)
            .map(|(id, token)| (token.clone(), id as u32))
            .collect();

        let mut byte_tokens = [None; 256];
        for (b, slot) in byte_tokens.iter_mut().enumerate() {
            let mut buf = [0u8; 4];
            let symbol: &str = bytes::byte_to_char(b as u8).encode_utf8(&mut buf);
            *slot = token_to_id.get(symbol).copied();
        }

        let pattern = Regex::new(LLAMA_3_PATTERN)
            .map_err(|e| Error::Tokenizer(format!("invalid pre-tokenization pattern: {}", e)))?;

        debug!(
            vocab = vocab.len(),
            merges = merge_table.len(),
            skipped,
            "tokenizer ready"
        );

        Ok(Self {
            vocab,
            token_to_id,
            merges: merge_table,
            special_tokens,
            byte_tokens,
            pattern,
        })
    }

    /// Encode text to token ids
    ///
    /// Special token text is not recognized; it is encoded as ordinary bytes.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for chunk in self.pattern.find_iter(text) {
            let chunk = chunk.map_err(|e| Error::Tokenizer(format!("pre-tokenization failed: {}", e)))?;
            ids.extend(self.encode_chunk(chunk.as_str()));
        }
        Ok(ids)
    }

    fn encode_chunk(&self, chunk: &str) -> Vec<u32> {
        let mut ids: Vec<u32> = chunk
            .bytes()
            .filter_map(|b| self.byte_tokens[b as usize])
            .collect();

        while ids.len() >= 2 {
            // Lowest rank wins; the first occurrence breaks ties
            let best = ids
                .windows(2)
                .filter_map(|w| self.merges.get(&(w[0], w[1])).map(|m| ((w[0], w[1]), *m)))
                .min_by_key(|(_, m)| m.rank);
            let Some(((left, right), merge)) = best else {
                break;
            };

            let mut merged = Vec::with_capacity(ids.len());
            let mut i = 0;
            while i < ids.len() {
                if i + 1 < ids.len() && ids[i] == left && ids[i + 1] == right {
                    merged.push(merge.merged);
                    i += 2;
                } else {
                    merged.push(ids[i]);
                    i += 1;
                }
            }
            ids = merged;
        }
        ids
    }

    /// Decode token ids to text; unknown ids are skipped and invalid UTF-8
    /// becomes U+FFFD
    pub fn decode(&self, ids: &[u32]) -> String {
        let mut out = Vec::new();
        for token in ids.iter().filter_map(|&id| self.id_to_token(id)) {
            bytes::decode_str(token, &mut out);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    pub fn decode_token(&self, id: u32) -> String {
        self.decode(&[id])
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.vocab.get(id as usize).map(String::as_str)
    }

    pub fn is_special(&self, id: u32) -> bool {
        id >= SPECIAL_TOKEN_BASE && (id as usize) < self.vocab.len()
    }

    /// Special tokens keyed by their text
    pub fn special_tokens(&self) -> &HashMap<String, u32> {
        &self.special_tokens
    }

    pub fn special_token(&self, token: &str) -> Option<u32> {
        self.special_tokens.get(token).copied()
    }

    /// Number of registered merge rules
    pub fn merge_count(&self) -> usize {
        self.merges.len()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::gguf::{MetadataValue, ValueType};
    use proptest::prelude::*;

    #[test]
    fn test_merges_apply_by_rank() {
        let tok = small_tokenizer();
        let ids = tok.encode("hello").unwrap();
        assert_eq!(ids, vec![tok.token_to_id("hello").unwrap()]);

        // "Ġwor" is in the vocab but unreachable without "Ġwo"
        let ids = tok.encode(" world").unwrap();
        let pieces: Vec<&str> = ids.iter().map(|&id| tok.id_to_token(id).unwrap()).collect();
        assert_eq!(pieces, vec!["Ġw", "o", "r", "l", "d"]);
    }

    #[test]
    fn test_unregistered_merges_are_skipped() {
        let tok = small_tokenizer();
        // "Ġw o", "o r" and "Ġwo r" lack merged tokens or parts
        assert_eq!(tok.merge_count(), 5);
    }

    #[test]
    fn test_non_overlapping_replacement() {
        let mut vocab = byte_vocab();
        vocab.push("aa".to_string());
        let tok = Tokenizer::new(vocab, &["a a"]).unwrap();
        let aa = tok.token_to_id("aa").unwrap();
        let a = tok.token_to_id("a").unwrap();
        assert_eq!(tok.encode("aaa").unwrap(), vec![aa, a]);
        assert_eq!(tok.encode("aaaa").unwrap(), vec![aa, aa]);
    }

    #[test]
    fn test_pre_tokenization_chunks() {
        let pattern = Regex::new(LLAMA_3_PATTERN).unwrap();
        let chunks: Vec<&str> = pattern
            .find_iter("I'm 12345 ok!!\n\n  x")
            .map(|m| m.unwrap().as_str())
            .collect();
        assert_eq!(chunks, vec!["I", "'m", " ", "123", "45", " ok", "!!\n\n", " ", " x"]);
    }

    #[test]
    fn test_decode_skips_unknown_ids() {
        let tok = small_tokenizer();
        let mut ids = tok.encode("hi").unwrap();
        ids.push(999_999);
        assert_eq!(tok.decode(&ids), "hi");
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let tok = small_tokenizer();
        // a lone continuation byte
        let id = tok.token_to_id(&bytes::byte_to_char(0x80).to_string()).unwrap();
        assert_eq!(tok.decode(&[id]), "\u{FFFD}");
    }

    #[test]
    fn test_special_tokens() {
        let tok = chat_tokenizer();
        let bot = tok.special_token("<|begin_of_text|>").unwrap();
        assert_eq!(bot, SPECIAL_TOKEN_BASE);
        assert!(tok.is_special(bot));
        assert!(!tok.is_special(5));
        assert_eq!(tok.special_tokens().len(), 5);
        assert_eq!(tok.decode_token(bot), "<|begin_of_text|>");
    }

    #[test]
    fn test_from_metadata() {
        let mut metadata = Metadata::new();
        let strings = |items: &[&str]| {
            MetadataValue::Array(
                ValueType::String,
                items.iter().map(|s| MetadataValue::String(s.to_string())).collect(),
            )
        };
        metadata.insert(MODEL_KEY.into(), MetadataValue::String("gpt2".into()));
        metadata.insert(TOKENS_KEY.into(), strings(&["a", "b", "ab"]));
        metadata.insert(MERGES_KEY.into(), strings(&["a b"]));

        let tok = Tokenizer::from_metadata(&metadata).unwrap();
        assert_eq!(tok.vocab_size(), 3);
        assert_eq!(tok.encode("ab").unwrap(), vec![2]);

        metadata.insert(MODEL_KEY.into(), MetadataValue::String("llama".into()));
        assert!(matches!(
            Tokenizer::from_metadata(&metadata),
            Err(Error::Tokenizer(_))
        ));
    }

    #[test]
    fn test_missing_vocab() {
        let mut metadata = Metadata::new();
        metadata.insert(MODEL_KEY.into(), MetadataValue::String("gpt2".into()));
        assert!(matches!(
            Tokenizer::from_metadata(&metadata),
            Err(Error::Tokenizer(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(s in any::<String>()) {
            let tok = small_tokenizer();
            let ids = tok.encode(&s).unwrap();
            prop_assert_eq!(tok.decode(&ids), s);
        }
    }
}
