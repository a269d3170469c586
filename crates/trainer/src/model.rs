use std::path::Path;
use tch::{nn, nn::OptimizerConfig, Device, Tensor};

use rwkv_core::{safetensors_util, ModelConfig, RwkvLm};

use crate::config::TrainingConfig;
use crate::error::Result;
use crate::runtime::LanguageModel;

/// [`RwkvLm`] together with the store that owns its parameters.
pub struct RwkvModel {
    vs: nn::VarStore,
    lm: RwkvLm,
}

impl RwkvModel {
    pub fn new(config: &ModelConfig, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let lm = RwkvLm::new(&vs.root(), config);
        Self { vs, lm }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.lm.config
    }

    /// Overwrites parameters from a safetensors file.
    pub fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        Ok(safetensors_util::load_safetensors(&mut self.vs, path)?)
    }
}

impl LanguageModel for RwkvModel {
    type Optimizer = nn::Optimizer;

    fn loss(&mut self, input_ids: &Tensor, labels: &Tensor) -> Result<Tensor> {
        Ok(self.lm.loss(input_ids, labels)?)
    }

    fn reset_transient_state(&mut self) {
        self.lm.reset_state();
    }

    fn set_train(&mut self, train: bool) {
        self.lm.set_train(train);
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn configure_optimizer(&self, config: &TrainingConfig) -> Result<nn::Optimizer> {
        let adam = nn::Adam {
            beta1: config.adam_beta1,
            beta2: config.adam_beta2,
            wd: 0.0,
            eps: config.adam_eps,
            amsgrad: false,
        };
        Ok(adam.build(&self.vs, config.initial_learning_rate)?)
    }
}
