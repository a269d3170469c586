use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{ModelError, Result};

/// Block layout of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    /// Time-mix followed by channel-mix in every layer.
    #[serde(rename = "RWKV")]
    Rwkv,
    /// Layer 0 swaps its time-mix for a second channel-mix.
    #[serde(rename = "RWKV-ffnPre")]
    RwkvFfnPre,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Rwkv => write!(f, "RWKV"),
            ModelType::RwkvFfnPre => write!(f, "RWKV-ffnPre"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Size of the vocabulary.
    pub vocab_size: i64,
    /// Training context length (tokens per example).
    pub ctx_len: i64,
    /// Number of RWKV blocks.
    pub n_layer: i64,
    /// Width of the residual stream.
    pub n_embd: i64,
    /// Hidden width of the channel-mix, as a multiple of `n_embd`.
    pub ffn_multiplier: i64,
    /// Dropout probability on the embedding output.
    pub dropout: f64,
    /// LayerNorm epsilon.
    pub layer_norm_epsilon: f64,
    pub model_type: ModelType,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 256,
            ctx_len: 32,
            n_layer: 12,
            n_embd: 384,
            ffn_multiplier: 4,
            dropout: 0.0,
            layer_norm_epsilon: 1e-5,
            model_type: ModelType::Rwkv,
        }
    }
}

impl ModelConfig {
    pub fn ffn_hidden(&self) -> i64 {
        self.ffn_multiplier * self.n_embd
    }

    /// `{vocab}-{ctx}-{model_type}-{n_layer}-{n_embd}`
    pub fn run_name(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.vocab_size, self.ctx_len, self.model_type, self.n_layer, self.n_embd
        )
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Rejects sizes the model cannot be built or run with.
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("vocab_size", self.vocab_size),
            ("ctx_len", self.ctx_len),
            ("n_layer", self.n_layer),
            ("n_embd", self.n_embd),
            ("ffn_multiplier", self.ffn_multiplier),
        ];
        if let Some((name, value)) = dims.iter().find(|(_, value)| *value <= 0) {
            return Err(ModelError::InvalidConfig(format!(
                "{} must be positive, got {}",
                name, value
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(self.layer_norm_epsilon.is_finite() && self.layer_norm_epsilon > 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "layer_norm_epsilon must be positive, got {}",
                self.layer_norm_epsilon
            )));
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_name_matches_layout() {
        let config = ModelConfig {
            vocab_size: 100,
            ctx_len: 32,
            n_layer: 12,
            n_embd: 384,
            ..Default::default()
        };
        assert_eq!(config.run_name(), "100-32-RWKV-12-384");
    }

    #[test]
    fn model_type_uses_original_names() {
        let json = serde_json::to_string(&ModelType::RwkvFfnPre).unwrap();
        assert_eq!(json, "\"RWKV-ffnPre\"");
        let parsed: ModelType = serde_json::from_str("\"RWKV\"").unwrap();
        assert_eq!(parsed, ModelType::Rwkv);
    }

    #[test]
    fn zero_sizes_fail_validation() {
        ModelConfig::default().validate().unwrap();

        let empty_context = ModelConfig {
            ctx_len: 0,
            ..Default::default()
        };
        assert!(matches!(
            empty_context.validate(),
            Err(ModelError::InvalidConfig(msg)) if msg.contains("ctx_len")
        ));

        let no_layers = ModelConfig {
            n_layer: 0,
            ..Default::default()
        };
        assert!(no_layers.validate().is_err());

        let bad_dropout = ModelConfig {
            dropout: 1.0,
            ..Default::default()
        };
        assert!(bad_dropout.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: std::result::Result<ModelConfig, _> =
            serde_json::from_str(r#"{"n_layer": 2, "n_head": 4}"#);
        assert!(parsed.is_err());
    }
}
