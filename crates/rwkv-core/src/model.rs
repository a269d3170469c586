use tch::{nn, Reduction, Tensor};

use crate::channel_mix::ChannelMix;
use crate::config::{ModelConfig, ModelType};
use crate::error::Result;
use crate::state::{LayerState, RecurrentState};
use crate::time_mix::TimeMix;

/// Label value excluded from the loss (padding and masked positions).
pub const IGNORE_INDEX: i64 = -100;

/// First half of a block.
enum Mixer {
    Time(TimeMix),
    ChannelPre(ChannelMix),
}

/// RWKV block: pre-norm residual mixer followed by a pre-norm residual channel-mix.
pub struct Block {
    ln1: nn::LayerNorm,
    ln2: nn::LayerNorm,
    mixer: Mixer,
    ffn: ChannelMix,
}

impl Block {
    pub fn new(vs: &nn::Path, config: &ModelConfig, layer_id: i64) -> Self {
        let ln_config = nn::LayerNormConfig {
            eps: config.layer_norm_epsilon,
            ..Default::default()
        };
        let mixer = if layer_id == 0 && config.model_type == ModelType::RwkvFfnPre {
            Mixer::ChannelPre(ChannelMix::new(&(vs / "ffn_pre"), config, layer_id))
        } else {
            Mixer::Time(TimeMix::new(&(vs / "att"), config, layer_id))
        };

        Self {
            ln1: nn::layer_norm(vs / "ln1", vec![config.n_embd], ln_config),
            ln2: nn::layer_norm(vs / "ln2", vec![config.n_embd], ln_config),
            mixer,
            ffn: ChannelMix::new(&(vs / "ffn"), config, layer_id),
        }
    }

    pub fn forward(&self, x: &Tensor, state: &mut LayerState) -> Result<Tensor> {
        let h = x.apply(&self.ln1);
        let mixed = match &self.mixer {
            Mixer::Time(att) => att.forward(&h, state)?,
            Mixer::ChannelPre(ffn_pre) => ffn_pre.forward(&h, &mut state.att_x)?,
        };
        let x = x + mixed;

        let h = x.apply(&self.ln2);
        let out = self.ffn.forward(&h, &mut state.ffn_x)?;
        Ok(x + out)
    }
}

/// Full RWKV language model.
///
/// Recurrent state survives between `forward` calls so a long sequence can be
/// fed in chunks; call [`RwkvLm::reset_state`] before an unrelated batch.
pub struct RwkvLm {
    emb: nn::Embedding,
    ln0: nn::LayerNorm,
    blocks: Vec<Block>,
    ln_out: nn::LayerNorm,
    head: nn::Linear,
    train: bool,
    state: Option<RecurrentState>,
    pub config: ModelConfig,
}

impl RwkvLm {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let ln_config = nn::LayerNormConfig {
            eps: config.layer_norm_epsilon,
            ..Default::default()
        };
        let emb = nn::embedding(vs / "emb", config.vocab_size, config.n_embd, Default::default());
        let ln0 = nn::layer_norm(vs / "ln0", vec![config.n_embd], ln_config);

        let blocks = (0..config.n_layer)
            .map(|i| Block::new(&(vs / "blocks" / i), config, i))
            .collect();

        let ln_out = nn::layer_norm(vs / "ln_out", vec![config.n_embd], ln_config);
        let head = nn::linear(
            vs / "head",
            config.n_embd,
            config.vocab_size,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );

        Self {
            emb,
            ln0,
            blocks,
            ln_out,
            head,
            train: true,
            state: None,
            config: config.clone(),
        }
    }

    /// Toggles dropout.
    pub fn set_train(&mut self, train: bool) {
        self.train = train;
    }

    pub fn is_train(&self) -> bool {
        self.train
    }

    pub fn state(&self) -> Option<&RecurrentState> {
        self.state.as_ref()
    }

    /// Drops the carried recurrent state.
    pub fn reset_state(&mut self) {
        self.state = None;
    }

    /// idx: [batch, seq_len] token ids. Returns logits [batch, seq_len, vocab_size].
    pub fn forward(&mut self, idx: &Tensor) -> Result<Tensor> {
        let (b, _) = idx.size2()?;
        let mut state = match self.state.take() {
            Some(state) if state.batch_size() == b => state,
            _ => RecurrentState::new(self.config.n_layer, b, self.config.n_embd, idx.device()),
        };

        let mut x = idx
            .apply(&self.emb)
            .apply(&self.ln0)
            .dropout(self.config.dropout, self.train);

        for (block, layer_state) in self.blocks.iter().zip(state.layers.iter_mut()) {
            x = block.forward(&x, layer_state)?;
        }

        self.state = Some(state.detach());
        Ok(x.apply(&self.ln_out).apply(&self.head))
    }

    /// Mean next-token cross-entropy, skipping labels equal to [`IGNORE_INDEX`].
    pub fn loss(&mut self, idx: &Tensor, targets: &Tensor) -> Result<Tensor> {
        let logits = self.forward(idx)?;
        let (b, t, v) = logits.size3()?;
        let loss = logits.reshape([b * t, v]).f_cross_entropy_loss::<Tensor>(
            &targets.reshape([b * t]),
            None,
            Reduction::Mean,
            IGNORE_INDEX,
            0.0,
        )?;
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn tiny_config(model_type: ModelType) -> ModelConfig {
        ModelConfig {
            vocab_size: 11,
            ctx_len: 6,
            n_layer: 2,
            n_embd: 8,
            ffn_multiplier: 2,
            model_type,
            ..Default::default()
        }
    }

    fn tokens(b: i64, t: i64) -> Tensor {
        Tensor::arange(b * t, (Kind::Int64, Device::Cpu))
            .remainder(11)
            .reshape([b, t])
    }

    #[test]
    fn forward_produces_logits_per_position() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut model = RwkvLm::new(&vs.root(), &tiny_config(ModelType::Rwkv));
        let logits = model.forward(&tokens(3, 6)).unwrap();
        assert_eq!(logits.size(), vec![3, 6, 11]);
    }

    #[test]
    fn chunked_forward_matches_full_sequence() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut model = RwkvLm::new(&vs.root(), &tiny_config(ModelType::Rwkv));
        model.set_train(false);
        let idx = tokens(2, 6);

        let full = tch::no_grad(|| model.forward(&idx)).unwrap();
        model.reset_state();

        let first = tch::no_grad(|| model.forward(&idx.narrow(1, 0, 4))).unwrap();
        let second = tch::no_grad(|| model.forward(&idx.narrow(1, 4, 2))).unwrap();
        let chunked = Tensor::cat(&[first, second], 1);

        assert!(full.allclose(&chunked, 1e-4, 1e-5, false));
    }

    #[test]
    fn reset_clears_carried_state() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut model = RwkvLm::new(&vs.root(), &tiny_config(ModelType::RwkvFfnPre));
        model.forward(&tokens(2, 6)).unwrap();
        assert!(model.state().is_some());
        model.reset_state();
        assert!(model.state().is_none());
    }

    #[test]
    fn loss_ignores_masked_labels_and_backpropagates() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut model = RwkvLm::new(&vs.root(), &tiny_config(ModelType::Rwkv));
        let idx = tokens(2, 6);
        let targets = tokens(2, 6).roll([1], [1]);
        let _ = targets.narrow(1, 4, 2).fill_(IGNORE_INDEX);

        let loss = model.loss(&idx, &targets).unwrap();
        assert_eq!(loss.size(), Vec::<i64>::new());
        assert!(loss.double_value(&[]).is_finite());

        loss.backward();
        let head = vs.variables()["head.weight"].grad();
        assert!(head.defined());
    }
}
