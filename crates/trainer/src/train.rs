use log::{debug, info};
use std::path::PathBuf;

use crate::checkpoint::{checkpoint_path, should_checkpoint, CheckpointSink, TrainingProgress};
use crate::config::TrainingConfig;
use crate::error::{Result, TrainError};
use crate::loss::LossEstimate;
use crate::progress::{PassSummary, ProgressBarObserver, StepReport, TrainingObserver};
use crate::run_log::{PassRecord, RunLog};
use crate::runtime::{Batch, BatchSource, Distributed, LanguageModel, OptimizerRuntime, SingleProcess};
use crate::scheduler::LrSchedule;

/// Drives `max_passes` mini-epochs over a batch source.
///
/// Owns the cumulative token counter that feeds the rate schedule and the
/// per-pass running loss. Per step: forward, reset transient state, zero
/// grads, backward, clip, count tokens, set the scheduled rate, step.
pub struct TrainingLoop<M: LanguageModel> {
    config: TrainingConfig,
    schedule: LrSchedule,
    model: M,
    optimizer: M::Optimizer,
    dist: Box<dyn Distributed>,
    sink: Box<dyn CheckpointSink>,
    observer: Option<Box<dyn TrainingObserver>>,
    run_log: RunLog,
    tokens_seen: u64,
    loss: LossEstimate,
    last_rate: f64,
    next_pass: usize,
    min_dev_loss: Option<f64>,
}

impl<M: LanguageModel> TrainingLoop<M> {
    pub fn new(
        config: TrainingConfig,
        model: M,
        sink: Box<dyn CheckpointSink>,
        run_log: RunLog,
    ) -> Result<Self> {
        config.validate()?;
        let optimizer = model.configure_optimizer(&config)?;
        let schedule = LrSchedule::new(&config);

        Ok(Self {
            last_rate: config.initial_learning_rate,
            config,
            schedule,
            model,
            optimizer,
            dist: Box::new(SingleProcess),
            sink,
            observer: None,
            run_log,
            tokens_seen: 0,
            loss: LossEstimate::new(),
            next_pass: 0,
            min_dev_loss: None,
        })
    }

    pub fn with_distributed(mut self, dist: Box<dyn Distributed>) -> Self {
        self.dist = dist;
        self
    }

    /// Replaces the default progress bar.
    pub fn with_observer(mut self, observer: Box<dyn TrainingObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Restores counters saved next to a checkpoint; training continues with the following pass.
    pub fn resume(&mut self, progress: TrainingProgress) {
        info!(
            "Resuming after mini-epoch {} with {} tokens seen",
            progress.pass_index + 1,
            progress.tokens_seen
        );
        self.tokens_seen = progress.tokens_seen;
        self.last_rate = progress.last_rate;
        self.next_pass = progress.pass_index + 1;
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn tokens_seen(&self) -> u64 {
        self.tokens_seen
    }

    pub fn last_rate(&self) -> f64 {
        self.last_rate
    }

    /// Running loss of the current (or last finished) pass.
    pub fn running_loss(&self) -> Option<f64> {
        self.loss.value()
    }

    pub fn min_dev_loss(&self) -> Option<f64> {
        self.min_dev_loss
    }

    fn observer(&mut self) -> &mut dyn TrainingObserver {
        let visible = self.dist.is_primary_worker();
        self.observer
            .get_or_insert_with(|| -> Box<dyn TrainingObserver> {
                Box::new(ProgressBarObserver::new(visible))
            })
            .as_mut()
    }

    /// Runs every remaining pass. After each: one run-log line for the training
    /// pass, optional evaluation (reported through the observer and the
    /// summary only), checkpoint when the cadence (or the final pass) calls for one.
    pub fn run(
        &mut self,
        train: &mut dyn BatchSource,
        mut valid: Option<&mut dyn BatchSource>,
    ) -> Result<Vec<PassSummary>> {
        info!("Starting training with configuration: {:?}", self.config);
        self.dist.prepare(self.model.var_store())?;
        let mut summaries = Vec::with_capacity(self.config.max_passes.saturating_sub(self.next_pass));

        for pass_index in self.next_pass..self.config.max_passes {
            let mut summary = self.train_pass(train, pass_index)?;
            self.run_log.append(&PassRecord::now(
                pass_index,
                summary.running_loss,
                summary.last_rate,
            ))?;

            if self.config.evaluate_each_pass {
                if let Some(valid) = valid.as_deref_mut() {
                    summary.dev_loss = Some(self.evaluate(valid, pass_index)?);
                }
            }

            if should_checkpoint(
                self.config.checkpoint_cadence,
                pass_index,
                self.config.max_passes,
            ) {
                summary.checkpoint = Some(self.checkpoint(pass_index)?);
            }

            self.next_pass = pass_index + 1;
            self.observer().on_pass_end(&summary);
            summaries.push(summary);
        }

        Ok(summaries)
    }

    /// One full pass in training mode. The running loss restarts with the pass.
    pub fn train_pass(
        &mut self,
        data: &mut dyn BatchSource,
        pass_index: usize,
    ) -> Result<PassSummary> {
        let declared = data.num_batches();
        if declared == 0 {
            return Err(TrainError::EmptyPass { pass_index });
        }

        data.begin_pass(pass_index);
        self.model.set_train(true);
        self.loss.reset();
        self.observer().on_pass_start(pass_index, declared);

        for step_index in 0..declared {
            let batch = data.next_batch()?.ok_or(TrainError::DataExhausted {
                pass_index,
                declared,
                produced: step_index,
            })?;
            let report = self.train_step(&batch, pass_index, step_index)?;
            self.observer().on_step(&report);
        }

        let running_loss = self.loss.value().unwrap_or(f64::NAN);
        Ok(PassSummary {
            pass_index,
            steps: declared,
            running_loss,
            perplexity: running_loss.exp(),
            last_rate: self.last_rate,
            tokens_seen: self.tokens_seen,
            dev_loss: None,
            checkpoint: None,
        })
    }

    fn train_step(
        &mut self,
        batch: &Batch,
        pass_index: usize,
        step_index: usize,
    ) -> Result<StepReport> {
        let loss = self.model.loss(&batch.input_ids, &batch.labels)?;
        self.model.reset_transient_state();

        let loss_value = loss.f_double_value(&[])?;
        if !loss_value.is_finite() {
            return Err(TrainError::NumericInstability {
                pass_index,
                step_index,
                loss: loss_value,
            });
        }

        self.optimizer.zero_grad();
        self.optimizer.backward(&loss)?;
        if self.config.gradient_norm_clip > 0.0 {
            self.optimizer.clip_grad_norm(self.config.gradient_norm_clip);
        }

        self.tokens_seen += batch.token_count()?;
        let scheduled = self.schedule.rate_at(self.tokens_seen);
        self.optimizer.set_lr(scheduled.rate);
        self.optimizer.step();
        self.last_rate = scheduled.rate;

        let running_loss = self.loss.update(loss_value);
        Ok(StepReport {
            pass_index,
            progress: scheduled.progress,
            step_index,
            running_loss,
            perplexity: running_loss.exp(),
            rate: scheduled.rate,
            tokens_seen: self.tokens_seen,
        })
    }

    /// Mean loss over one pass of `data` without gradients or parameter updates.
    pub fn evaluate(&mut self, data: &mut dyn BatchSource, pass_index: usize) -> Result<f64> {
        let declared = data.num_batches();
        if declared == 0 {
            return Err(TrainError::EmptyPass { pass_index });
        }

        data.begin_pass(pass_index);
        self.model.set_train(false);
        let total = self.sum_eval_losses(data, pass_index, declared);
        self.model.set_train(true);

        let dev_loss = total? / declared as f64;
        if !dev_loss.is_finite() {
            return Err(TrainError::NumericInstability {
                pass_index,
                step_index: declared,
                loss: dev_loss,
            });
        }

        self.min_dev_loss = Some(self.min_dev_loss.map_or(dev_loss, |best| best.min(dev_loss)));
        self.observer().on_evaluation(pass_index, dev_loss);
        Ok(dev_loss)
    }

    fn sum_eval_losses(
        &mut self,
        data: &mut dyn BatchSource,
        pass_index: usize,
        declared: usize,
    ) -> Result<f64> {
        let mut total = 0.0;
        for step_index in 0..declared {
            let batch = data.next_batch()?.ok_or(TrainError::DataExhausted {
                pass_index,
                declared,
                produced: step_index,
            })?;
            let model = &mut self.model;
            let loss = tch::no_grad(|| model.loss(&batch.input_ids, &batch.labels));
            self.model.reset_transient_state();
            total += loss?.f_double_value(&[])?;
        }
        Ok(total)
    }

    /// Barrier, then save the canonical store and the progress sidecar.
    fn checkpoint(&mut self, pass_index: usize) -> Result<PathBuf> {
        self.dist.wait_for_all_workers()?;

        let path = checkpoint_path(&self.config.checkpoint_path_prefix, pass_index);
        let canonical = self.dist.unwrap(self.model.var_store());
        self.sink.save(canonical, &path)?;

        TrainingProgress {
            pass_index,
            tokens_seen: self.tokens_seen,
            last_rate: self.last_rate,
        }
        .save(TrainingProgress::sidecar_path(&path))?;

        debug!("Checkpoint for mini-epoch {} at {:?}", pass_index + 1, path);
        Ok(path)
    }
}
