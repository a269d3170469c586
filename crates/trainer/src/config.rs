use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TrainError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Number of mini-epochs (full passes over the training source).
    pub max_passes: usize,
    pub batch_size: usize,
    pub initial_learning_rate: f64,
    /// Floor of the warmup ramp and target of the cosine decay.
    pub final_learning_rate: f64,
    /// Tokens over which the rate ramps up; 0 skips warmup.
    pub warmup_token_threshold: u64,
    /// Token count at which the cosine reaches `final_learning_rate`.
    pub final_token_threshold: u64,
    /// Global gradient-norm bound; 0 disables clipping.
    pub gradient_norm_clip: f64,
    /// Warmup + cosine when set, constant `initial_learning_rate` otherwise.
    pub decay_enabled: bool,
    /// 0 = only the last pass, N = every N passes (counting from pass 0) plus the last.
    pub checkpoint_cadence: usize,
    pub checkpoint_path_prefix: String,
    pub adam_beta1: f64,
    pub adam_beta2: f64,
    pub adam_eps: f64,
    /// Append-only per-pass log.
    pub run_log_path: PathBuf,
    /// Run the validation source after every training pass when one is supplied.
    pub evaluate_each_pass: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_passes: 10,
            batch_size: 64,
            initial_learning_rate: 4e-4,
            final_learning_rate: 1e-5,
            warmup_token_threshold: 0,
            final_token_threshold: 0,
            gradient_norm_clip: 1.0,
            decay_enabled: true,
            checkpoint_cadence: 0,
            checkpoint_path_prefix: "trained-".to_string(),
            adam_beta1: 0.9,
            adam_beta2: 0.99,
            adam_eps: 1e-8,
            run_log_path: PathBuf::from("train_log.txt"),
            evaluate_each_pass: false,
        }
    }
}

impl TrainingConfig {
    /// Parses YAML, rejecting unknown keys, and validates the result.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| TrainError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(TrainError::Configuration(msg));

        if self.max_passes == 0 {
            return fail("max_passes must be at least 1".into());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".into());
        }
        if !(self.initial_learning_rate.is_finite() && self.initial_learning_rate > 0.0) {
            return fail(format!(
                "initial_learning_rate must be positive, got {}",
                self.initial_learning_rate
            ));
        }
        if !(self.final_learning_rate.is_finite() && self.final_learning_rate >= 0.0) {
            return fail(format!(
                "final_learning_rate must be non-negative, got {}",
                self.final_learning_rate
            ));
        }
        if self.final_token_threshold < self.warmup_token_threshold {
            return fail(format!(
                "final_token_threshold ({}) is below warmup_token_threshold ({})",
                self.final_token_threshold, self.warmup_token_threshold
            ));
        }
        if !(self.gradient_norm_clip >= 0.0) {
            return fail(format!(
                "gradient_norm_clip must be >= 0, got {}",
                self.gradient_norm_clip
            ));
        }
        Ok(())
    }

    /// Copy with the decay horizon replaced.
    pub fn with_token_horizon(&self, final_token_threshold: u64) -> Self {
        Self {
            final_token_threshold,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TrainingConfig::default().validate().unwrap();
    }

    #[test]
    fn yaml_overrides_defaults() {
        let config = TrainingConfig::from_yaml_str(
            "max_passes: 30\ninitial_learning_rate: 6.0e-4\ncheckpoint_cadence: 1\n",
        )
        .unwrap();
        assert_eq!(config.max_passes, 30);
        assert_eq!(config.checkpoint_cadence, 1);
        assert_eq!(config.batch_size, 64);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = TrainingConfig::from_yaml_str("lr_decay: true\n").unwrap_err();
        assert!(matches!(err, TrainError::Configuration(_)));
    }

    #[test]
    fn negative_thresholds_are_rejected() {
        let err = TrainingConfig::from_yaml_str("warmup_token_threshold: -5\n").unwrap_err();
        assert!(matches!(err, TrainError::Configuration(_)));
    }

    #[test]
    fn horizon_below_warmup_is_rejected() {
        let config = TrainingConfig {
            warmup_token_threshold: 100,
            final_token_threshold: 50,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TrainError::Configuration(_))));
    }

    #[test]
    fn non_positive_initial_rate_is_rejected() {
        let config = TrainingConfig {
            initial_learning_rate: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
