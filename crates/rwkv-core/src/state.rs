use tch::{Device, Kind, Tensor};

/// Floor for the running max exponent of the WKV recurrence.
const NEG_BIG: f64 = -1e38;

/// Recurrent state carried by one block between forward calls.
///
/// All tensors are `[batch, n_embd]`.
pub struct LayerState {
    /// Last input seen by the time-mix (or the pre channel-mix in `RWKV-ffnPre`).
    pub att_x: Tensor,
    /// WKV numerator.
    pub aa: Tensor,
    /// WKV denominator.
    pub bb: Tensor,
    /// Max exponent folded out of `aa` and `bb`.
    pub pp: Tensor,
    /// Last input seen by the channel-mix.
    pub ffn_x: Tensor,
}

impl LayerState {
    pub fn zeros(batch_size: i64, n_embd: i64, device: Device) -> Self {
        let zeros = || Tensor::zeros([batch_size, n_embd], (Kind::Float, device));
        Self {
            att_x: zeros(),
            aa: zeros(),
            bb: zeros(),
            pp: Tensor::full([batch_size, n_embd], NEG_BIG, (Kind::Float, device)),
            ffn_x: zeros(),
        }
    }

    fn detach(&self) -> Self {
        Self {
            att_x: self.att_x.detach(),
            aa: self.aa.detach(),
            bb: self.bb.detach(),
            pp: self.pp.detach(),
            ffn_x: self.ffn_x.detach(),
        }
    }
}

/// Per-layer recurrent state for a whole batch.
pub struct RecurrentState {
    pub layers: Vec<LayerState>,
    batch_size: i64,
}

impl RecurrentState {
    pub fn new(n_layer: i64, batch_size: i64, n_embd: i64, device: Device) -> Self {
        let layers = (0..n_layer)
            .map(|_| LayerState::zeros(batch_size, n_embd, device))
            .collect();
        Self { layers, batch_size }
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    /// Cuts the autograd history so the state can outlive the graph that produced it.
    pub fn detach(&self) -> Self {
        Self {
            layers: self.layers.iter().map(LayerState::detach).collect(),
            batch_size: self.batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_one_entry_per_layer() {
        let state = RecurrentState::new(3, 2, 8, Device::Cpu);
        assert_eq!(state.layers.len(), 3);
        assert_eq!(state.batch_size(), 2);
        assert_eq!(state.layers[0].aa.size(), vec![2, 8]);
        assert!(state.layers[2].pp.max().double_value(&[]) < -1e37);
    }
}
