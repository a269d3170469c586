use tch::{nn, Tensor};

use crate::config::ModelConfig;
use crate::error::Result;
use crate::time_mix::{interpolate, mix_init, token_shift};

/// RWKV channel-mixing (the feed-forward half of a block).
pub struct ChannelMix {
    time_mix_k: Tensor,
    time_mix_r: Tensor,
    key: nn::Linear,
    receptance: nn::Linear,
    value: nn::Linear,
}

impl ChannelMix {
    pub fn new(vs: &nn::Path, config: &ModelConfig, layer_id: i64) -> Self {
        let n_embd = config.n_embd;
        let hidden = config.ffn_hidden();
        let shallowness = 1.0 - layer_id as f64 / config.n_layer as f64;
        let no_bias = nn::LinearConfig {
            bias: false,
            ..Default::default()
        };

        Self {
            time_mix_k: mix_init(vs, "time_mix_k", n_embd, shallowness),
            time_mix_r: mix_init(vs, "time_mix_r", n_embd, shallowness),
            key: nn::linear(vs / "key", n_embd, hidden, no_bias),
            receptance: nn::linear(vs / "receptance", n_embd, n_embd, no_bias),
            value: nn::linear(vs / "value", hidden, n_embd, no_bias),
        }
    }

    /// x: [batch, seq_len, n_embd]; `last` is replaced by the final time step of `x`.
    pub fn forward(&self, x: &Tensor, last: &mut Tensor) -> Result<Tensor> {
        let (_, t, _) = x.size3()?;
        let xx = token_shift(x, last)?;

        let k = interpolate(x, &xx, &self.time_mix_k)
            .apply(&self.key)
            .relu()
            .square();
        let kv = k.apply(&self.value);
        let r = interpolate(x, &xx, &self.time_mix_r)
            .apply(&self.receptance)
            .sigmoid();

        *last = x.select(1, t - 1);
        Ok(r * kv)
    }
}
