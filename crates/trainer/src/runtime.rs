//! Seams between the training loop and the runtime it drives.

use tch::{nn, Kind, Tensor};

use rwkv_core::IGNORE_INDEX;

use crate::config::TrainingConfig;
use crate::error::Result;

/// One collated batch. `labels` marks padding with [`IGNORE_INDEX`].
pub struct Batch {
    pub input_ids: Tensor,
    pub labels: Tensor,
}

impl Batch {
    /// Labels that count toward the loss (and the rate schedule).
    pub fn token_count(&self) -> Result<u64> {
        let count = self
            .labels
            .f_ne(IGNORE_INDEX)?
            .f_sum(Kind::Int64)?
            .f_int64_value(&[])?;
        Ok(count.max(0) as u64)
    }
}

/// Fixed-length, restartable sequence of batches.
pub trait BatchSource {
    /// Batches per pass, known before the pass starts.
    fn num_batches(&self) -> usize;
    /// Rewinds to the first batch.
    fn begin_pass(&mut self, pass_index: usize);
    /// `Ok(None)` once the source is exhausted.
    fn next_batch(&mut self) -> Result<Option<Batch>>;
}

/// Gradient bookkeeping and parameter updates.
pub trait OptimizerRuntime {
    fn zero_grad(&mut self);
    fn backward(&mut self, loss: &Tensor) -> Result<()>;
    /// Rescales gradients so their global L2 norm is at most `max_norm`.
    fn clip_grad_norm(&mut self, max_norm: f64);
    /// Applies `lr` to every parameter group.
    fn set_lr(&mut self, lr: f64);
    fn step(&mut self);
}

impl OptimizerRuntime for nn::Optimizer {
    fn zero_grad(&mut self) {
        nn::Optimizer::zero_grad(self)
    }

    fn backward(&mut self, loss: &Tensor) -> Result<()> {
        loss.f_backward()?;
        Ok(())
    }

    fn clip_grad_norm(&mut self, max_norm: f64) {
        nn::Optimizer::clip_grad_norm(self, max_norm)
    }

    fn set_lr(&mut self, lr: f64) {
        nn::Optimizer::set_lr(self, lr)
    }

    fn step(&mut self) {
        nn::Optimizer::step(self)
    }
}

/// A model the loop can train.
pub trait LanguageModel {
    type Optimizer: OptimizerRuntime;

    /// Scalar loss for one batch.
    fn loss(&mut self, input_ids: &Tensor, labels: &Tensor) -> Result<Tensor>;
    /// Clears activations or recurrent state kept between calls.
    fn reset_transient_state(&mut self);
    fn set_train(&mut self, train: bool);
    /// Canonical parameter store.
    fn var_store(&self) -> &nn::VarStore;
    fn configure_optimizer(&self, config: &TrainingConfig) -> Result<Self::Optimizer>;
}

/// Process-group view of a run.
///
/// Learning rates are computed from each worker's own token count; nothing
/// here synchronizes that count, so rates can drift slightly between workers
/// whose shards differ in padding.
pub trait Distributed {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    /// Only gates console output.
    fn is_primary_worker(&self) -> bool {
        self.rank() == 0
    }

    /// Called once before the first pass, e.g. to broadcast rank 0's parameters
    /// into every replica.
    fn prepare(&self, _store: &nn::VarStore) -> Result<()> {
        Ok(())
    }

    /// Returns once every worker has arrived.
    fn wait_for_all_workers(&self) -> Result<()>;

    /// The canonical store behind a (possibly replicated) one. Implementations
    /// that keep their own canonical copy may return it instead of `replica`.
    fn unwrap<'a>(&'a self, replica: &'a nn::VarStore) -> &'a nn::VarStore {
        replica
    }
}

/// The only worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Distributed for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn wait_for_all_workers(&self) -> Result<()> {
        Ok(())
    }
}
