use std::path::Path;

use crate::error::{Result, TokenizerError};
use crate::vocab::Vocab;

pub const BOS: &str = "<BOS>";
pub const EOS: &str = "<EOS>";
pub const SEP: &str = "<SEP>";
pub const UNK: &str = "<UNK>";
pub const PAD: &str = "<PAD>";

/// Special tokens in the order they occupy the first ids of a fresh vocabulary.
pub const SPECIAL_TOKENS: [&str; 5] = [PAD, UNK, BOS, EOS, SEP];

/// One token per Unicode scalar value, plus framing specials.
#[derive(Debug, Clone)]
pub struct CharTokenizer {
    vocab: Vocab,
    bos: u32,
    eos: u32,
    unk: u32,
    pad: u32,
}

impl CharTokenizer {
    pub fn new(vocab: Vocab) -> Result<Self> {
        let id = |token: &str| {
            vocab
                .get_id(token)
                .ok_or_else(|| TokenizerError::UnknownSpecialToken(token.to_string()))
        };
        let (bos, eos, unk, pad) = (id(BOS)?, id(EOS)?, id(UNK)?, id(PAD)?);
        id(SEP)?;

        Ok(Self {
            vocab,
            bos,
            eos,
            unk,
            pad,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(Vocab::load(path)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.vocab.save(path)
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn pad_id(&self) -> u32 {
        self.pad
    }

    /// Characters only, unknown characters mapped to `<UNK>`.
    pub fn encode_raw(&self, text: &str) -> Vec<u32> {
        let mut buf = [0u8; 4];
        text.chars()
            .map(|c| self.vocab.get_id(c.encode_utf8(&mut buf)).unwrap_or(self.unk))
            .collect()
    }

    /// `<BOS> text <EOS>`, cut to `max_len` ids and right-padded with `<PAD>`.
    pub fn encode(&self, text: &str, max_len: usize) -> Vec<u32> {
        let mut ids = Vec::with_capacity(max_len.max(text.len() + 2));
        ids.push(self.bos);
        ids.extend(self.encode_raw(text));
        ids.push(self.eos);
        ids.truncate(max_len);
        ids.resize(max_len, self.pad);
        ids
    }

    /// Concatenates the characters for `ids`, skipping specials and unknown ids.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter_map(|&id| self.vocab.get_token(id))
            .filter(|token| !SPECIAL_TOKENS.contains(token))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> CharTokenizer {
        let mut vocab = Vocab::new();
        for token in SPECIAL_TOKENS {
            vocab.push(token);
        }
        for c in ["a", "b", "c"] {
            vocab.push(c);
        }
        CharTokenizer::new(vocab).unwrap()
    }

    #[test]
    fn encode_frames_and_pads() {
        let tok = tokenizer();
        // PAD=0 UNK=1 BOS=2 EOS=3 SEP=4 a=5 b=6 c=7
        assert_eq!(tok.encode("ab", 6), vec![2, 5, 6, 3, 0, 0]);
    }

    #[test]
    fn encode_truncates_long_text() {
        let tok = tokenizer();
        assert_eq!(tok.encode("abcabc", 4), vec![2, 5, 6, 7]);
    }

    #[test]
    fn unknown_characters_map_to_unk() {
        let tok = tokenizer();
        assert_eq!(tok.encode_raw("az"), vec![5, 1]);
    }

    #[test]
    fn decode_skips_specials() {
        let tok = tokenizer();
        let ids = tok.encode("cab", 8);
        assert_eq!(tok.decode(&ids), "cab");
    }

    #[test]
    fn missing_special_is_an_error() {
        let mut vocab = Vocab::new();
        vocab.push("a");
        let err = CharTokenizer::new(vocab).unwrap_err();
        assert!(matches!(err, TokenizerError::UnknownSpecialToken(_)));
    }
}
