use tch::{nn, Tensor};

use crate::config::ModelConfig;
use crate::error::Result;
use crate::state::LayerState;

/// Shifts `x` one step along time, filling the first slot from `last`.
///
/// x: [batch, seq_len, n_embd], last: [batch, n_embd]
pub(crate) fn token_shift(x: &Tensor, last: &Tensor) -> Result<Tensor> {
    let (_, t, _) = x.size3()?;
    let prev = last.unsqueeze(1);
    if t == 1 {
        return Ok(prev);
    }
    Ok(Tensor::cat(&[prev, x.narrow(1, 0, t - 1)], 1))
}

/// `x * mix + shifted * (1 - mix)`
pub(crate) fn interpolate(x: &Tensor, shifted: &Tensor, mix: &Tensor) -> Tensor {
    shifted + (x - shifted) * mix
}

/// Per-channel `(i / n)^power`, the usual initial token-shift mix.
pub(crate) fn mix_init(vs: &nn::Path, name: &str, n_embd: i64, power: f64) -> Tensor {
    let values: Vec<f32> = (0..n_embd)
        .map(|i| (i as f64 / n_embd as f64).powf(power) as f32)
        .collect();
    vs.var_copy(name, &Tensor::from_slice(&values))
}

/// RWKV time-mixing: the recurrent replacement for attention.
pub struct TimeMix {
    time_decay: Tensor,
    time_first: Tensor,
    time_mix_k: Tensor,
    time_mix_v: Tensor,
    time_mix_r: Tensor,
    key: nn::Linear,
    value: nn::Linear,
    receptance: nn::Linear,
    output: nn::Linear,
}

impl TimeMix {
    pub fn new(vs: &nn::Path, config: &ModelConfig, layer_id: i64) -> Self {
        let n_embd = config.n_embd;
        let depth = if config.n_layer > 1 {
            layer_id as f64 / (config.n_layer - 1) as f64
        } else {
            0.0
        };
        let shallowness = 1.0 - layer_id as f64 / config.n_layer as f64;

        // Decay speeds spread from -5 to 3 across channels, steeper in deeper layers.
        let decay: Vec<f32> = (0..n_embd)
            .map(|h| {
                let frac = h as f64 / (n_embd - 1).max(1) as f64;
                (-5.0 + 8.0 * frac.powf(0.7 + 1.3 * depth)) as f32
            })
            .collect();
        let first: Vec<f32> = (0..n_embd)
            .map(|h| (0.3f64.ln() + ((h + 1) % 3) as f64 * 0.5 - 0.5) as f32)
            .collect();

        let no_bias = nn::LinearConfig {
            bias: false,
            ..Default::default()
        };

        Self {
            time_decay: vs.var_copy("time_decay", &Tensor::from_slice(&decay)),
            time_first: vs.var_copy("time_first", &Tensor::from_slice(&first)),
            time_mix_k: mix_init(vs, "time_mix_k", n_embd, shallowness),
            time_mix_v: mix_init(vs, "time_mix_v", n_embd, shallowness),
            time_mix_r: mix_init(vs, "time_mix_r", n_embd, 0.5 * shallowness),
            key: nn::linear(vs / "key", n_embd, n_embd, no_bias),
            value: nn::linear(vs / "value", n_embd, n_embd, no_bias),
            receptance: nn::linear(vs / "receptance", n_embd, n_embd, no_bias),
            output: nn::linear(vs / "output", n_embd, n_embd, no_bias),
        }
    }

    /// Forward pass over a full sequence, advancing `state`.
    /// x: [batch, seq_len, n_embd]
    pub fn forward(&self, x: &Tensor, state: &mut LayerState) -> Result<Tensor> {
        let (_, t, _) = x.size3()?;
        let xx = token_shift(x, &state.att_x)?;

        let k = interpolate(x, &xx, &self.time_mix_k).apply(&self.key);
        let v = interpolate(x, &xx, &self.time_mix_v).apply(&self.value);
        let r = interpolate(x, &xx, &self.time_mix_r)
            .apply(&self.receptance)
            .sigmoid();

        let w = self.time_decay.exp().neg();
        let u = &self.time_first;

        let mut aa = state.aa.shallow_clone();
        let mut bb = state.bb.shallow_clone();
        let mut pp = state.pp.shallow_clone();
        let mut steps = Vec::with_capacity(t as usize);

        for i in 0..t {
            let kt = k.select(1, i);
            let vt = v.select(1, i);

            // Emit with the bonus `u` applied to the current token.
            let ww = u + &kt;
            let p = pp.maximum(&ww);
            let e1 = (&pp - &p).exp();
            let e2 = (&ww - &p).exp();
            steps.push((&e1 * &aa + &e2 * &vt) / (&e1 * &bb + &e2));

            // Decay the past and fold the current token in.
            let ww = &pp + &w;
            let p = ww.maximum(&kt);
            let e1 = (&ww - &p).exp();
            let e2 = (&kt - &p).exp();
            aa = &e1 * &aa + &e2 * &vt;
            bb = &e1 * &bb + e2;
            pp = p;
        }

        state.att_x = x.select(1, t - 1);
        state.aa = aa;
        state.bb = bb;
        state.pp = pp;

        let wkv = Tensor::stack(&steps, 1);
        Ok((r * wkv).apply(&self.output))
    }
}
