use log::info;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::char_tokenizer::SPECIAL_TOKENS;
use crate::error::{Result, TokenizerError};
use crate::vocab::Vocab;

/// Builds a character vocabulary from a corpus.
pub struct VocabBuilder {
    min_frequency: u32,
}

impl VocabBuilder {
    pub fn new(min_frequency: u32) -> Self {
        Self { min_frequency }
    }

    fn count_chars(lines: &[String]) -> HashMap<char, u32> {
        lines
            .par_iter()
            .fold(HashMap::new, |mut counts, line| {
                for c in line.chars() {
                    *counts.entry(c).or_insert(0) += 1;
                }
                counts
            })
            .reduce(HashMap::new, |mut left, right| {
                for (c, n) in right {
                    *left.entry(c).or_insert(0) += n;
                }
                left
            })
    }

    /// Specials first, then characters by descending frequency (ties by code point).
    pub fn build_from_lines(&self, lines: &[String]) -> Result<Vocab> {
        let mut counts: Vec<(char, u32)> = Self::count_chars(lines)
            .into_iter()
            .filter(|&(_, n)| n >= self.min_frequency)
            .collect();
        if counts.is_empty() {
            return Err(TokenizerError::EmptyCorpus);
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut vocab = Vocab::new();
        for token in SPECIAL_TOKENS {
            vocab.push(token);
        }
        for (c, _) in &counts {
            vocab.push(&c.to_string());
        }

        info!(
            "Built vocab: {} characters + {} specials",
            counts.len(),
            SPECIAL_TOKENS.len()
        );
        Ok(vocab)
    }

    pub fn build_from_files<P: AsRef<Path>>(&self, files: &[P]) -> Result<Vocab> {
        let mut lines = Vec::new();
        for path in files {
            let content = fs::read_to_string(path)?;
            lines.extend(content.lines().map(str::to_string));
        }
        self.build_from_lines(&lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn most_frequent_characters_come_first() {
        let vocab = VocabBuilder::new(1)
            .build_from_lines(&lines(&["abb", "bcc", "c"]))
            .unwrap();
        let base = SPECIAL_TOKENS.len() as u32;
        // b and c tie at 3, a has 1
        assert_eq!(vocab.get_id("b"), Some(base));
        assert_eq!(vocab.get_id("c"), Some(base + 1));
        assert_eq!(vocab.get_id("a"), Some(base + 2));
    }

    #[test]
    fn frequency_floor_drops_rare_characters() {
        let vocab = VocabBuilder::new(2)
            .build_from_lines(&lines(&["aab", "a"]))
            .unwrap();
        assert!(vocab.get_id("a").is_some());
        assert!(vocab.get_id("b").is_none());
    }

    #[test]
    fn empty_corpus_is_an_error() {
        let err = VocabBuilder::new(1).build_from_lines(&[]).unwrap_err();
        assert!(matches!(err, TokenizerError::EmptyCorpus));
    }
}
