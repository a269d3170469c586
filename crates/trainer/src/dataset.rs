use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::fs;
use std::path::Path;
use tch::{Device, Tensor};

use rwkv_core::IGNORE_INDEX;
use tokenizer::CharTokenizer;

use crate::error::Result;
use crate::runtime::{Batch, BatchSource};

/// Non-blank lines of a text file.
pub fn read_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Shuffles with a fixed seed and holds out `ceil(len * valid_fraction)` lines.
///
/// Returns `(train, valid)`.
pub fn split_train_valid(
    mut lines: Vec<String>,
    valid_fraction: f64,
    seed: u64,
) -> (Vec<String>, Vec<String>) {
    let mut rng = StdRng::seed_from_u64(seed);
    lines.shuffle(&mut rng);

    let fraction = valid_fraction.clamp(0.0, 1.0);
    let n_valid = ((lines.len() as f64) * fraction).ceil() as usize;
    let train = lines.split_off(n_valid.min(lines.len()));
    (train, lines)
}

/// One example per line, served in file order.
///
/// Each line is encoded to `ctx_len + 1` ids; inputs are the first `ctx_len`,
/// labels the last `ctx_len` with padding replaced by [`IGNORE_INDEX`].
pub struct LineDataset {
    examples: Vec<Vec<i64>>,
    pad_id: i64,
    batch_size: usize,
    ctx_len: usize,
    device: Device,
    cursor: usize,
}

impl LineDataset {
    pub fn new(
        lines: &[String],
        tokenizer: &CharTokenizer,
        ctx_len: usize,
        batch_size: usize,
        device: Device,
    ) -> Self {
        let examples = lines
            .iter()
            .map(|line| {
                tokenizer
                    .encode(line, ctx_len + 1)
                    .into_iter()
                    .map(i64::from)
                    .collect()
            })
            .collect();

        Self {
            examples,
            pad_id: tokenizer.pad_id() as i64,
            batch_size,
            ctx_len,
            device,
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Keeps every `world_size`-th example starting at `rank`.
    pub fn shard(mut self, rank: usize, world_size: usize) -> Self {
        if world_size > 1 {
            self.examples = self
                .examples
                .into_iter()
                .skip(rank)
                .step_by(world_size)
                .collect();
        }
        self
    }
}

impl BatchSource for LineDataset {
    fn num_batches(&self) -> usize {
        self.examples.len().div_ceil(self.batch_size)
    }

    fn begin_pass(&mut self, _pass_index: usize) {
        self.cursor = 0;
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.cursor >= self.examples.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.examples.len());
        let chunk = &self.examples[self.cursor..end];
        self.cursor = end;

        let b = chunk.len();
        let t = self.ctx_len;
        let mut inputs = Vec::with_capacity(b * t);
        let mut labels = Vec::with_capacity(b * t);

        for ids in chunk {
            inputs.extend_from_slice(&ids[..t]);
            labels.extend(ids[1..].iter().map(|&id| {
                if id == self.pad_id {
                    IGNORE_INDEX
                } else {
                    id
                }
            }));
        }

        let shape = [b as i64, t as i64];
        Ok(Some(Batch {
            input_ids: Tensor::from_slice(&inputs).view(shape).to(self.device),
            labels: Tensor::from_slice(&labels).view(shape).to(self.device),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenizer::char_tokenizer::SPECIAL_TOKENS;
    use tokenizer::Vocab;

    fn tokenizer() -> CharTokenizer {
        let mut vocab = Vocab::new();
        for token in SPECIAL_TOKENS.iter().copied().chain(["a", "b", "c"]) {
            vocab.push(token);
        }
        CharTokenizer::new(vocab).unwrap()
    }

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn labels_are_shifted_and_padding_is_ignored() {
        // PAD=0 UNK=1 BOS=2 EOS=3 SEP=4 a=5 b=6 c=7
        let mut ds = LineDataset::new(&lines(&["ab"]), &tokenizer(), 5, 4, Device::Cpu);
        ds.begin_pass(0);
        let batch = ds.next_batch().unwrap().unwrap();

        let inputs = Vec::<i64>::try_from(&batch.input_ids.view([-1])).unwrap();
        let labels = Vec::<i64>::try_from(&batch.labels.view([-1])).unwrap();
        assert_eq!(inputs, vec![2, 5, 6, 3, 0]);
        assert_eq!(labels, vec![5, 6, 3, IGNORE_INDEX, IGNORE_INDEX]);
        assert_eq!(batch.token_count().unwrap(), 3);
    }

    #[test]
    fn last_short_batch_is_kept_and_passes_restart() {
        let mut ds = LineDataset::new(&lines(&["a", "b", "c"]), &tokenizer(), 4, 2, Device::Cpu);
        assert_eq!(ds.num_batches(), 2);

        for pass in 0..2 {
            ds.begin_pass(pass);
            assert_eq!(ds.next_batch().unwrap().unwrap().input_ids.size(), vec![2, 4]);
            assert_eq!(ds.next_batch().unwrap().unwrap().input_ids.size(), vec![1, 4]);
            assert!(ds.next_batch().unwrap().is_none());
        }
    }

    #[test]
    fn split_is_seeded_and_holds_out_the_fraction() {
        let all: Vec<String> = (0..16).map(|i| i.to_string()).collect();
        let (train, valid) = split_train_valid(all.clone(), 0.125, 42);
        assert_eq!(valid.len(), 2);
        assert_eq!(train.len(), 14);

        let (train_again, valid_again) = split_train_valid(all, 0.125, 42);
        assert_eq!(train, train_again);
        assert_eq!(valid, valid_again);
    }

    #[test]
    fn shards_are_disjoint() {
        let text = lines(&["a", "b", "c", "ab", "bc"]);
        let tok = tokenizer();
        let even = LineDataset::new(&text, &tok, 3, 1, Device::Cpu).shard(0, 2);
        let odd = LineDataset::new(&text, &tok, 3, 1, Device::Cpu).shard(1, 2);
        assert_eq!(even.len(), 3);
        assert_eq!(odd.len(), 2);
    }
}
