use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::PathBuf;

/// Snapshot after one optimizer step.
#[derive(Debug, Clone, Copy)]
pub struct StepReport {
    pub pass_index: usize,
    /// Decay progress from the rate schedule.
    pub progress: f64,
    /// 0-based index within the pass.
    pub step_index: usize,
    pub running_loss: f64,
    pub perplexity: f64,
    pub rate: f64,
    pub tokens_seen: u64,
}

/// Outcome of one training pass.
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub pass_index: usize,
    pub steps: usize,
    pub running_loss: f64,
    pub perplexity: f64,
    pub last_rate: f64,
    pub tokens_seen: u64,
    pub dev_loss: Option<f64>,
    pub checkpoint: Option<PathBuf>,
}

/// Side-channel for progress. Never influences control flow.
pub trait TrainingObserver {
    fn on_pass_start(&mut self, _pass_index: usize, _num_batches: usize) {}
    fn on_step(&mut self, report: &StepReport);
    fn on_evaluation(&mut self, _pass_index: usize, _dev_loss: f64) {}
    fn on_pass_end(&mut self, _summary: &PassSummary) {}
}

/// One progress bar per pass, shown on the primary worker only.
pub struct ProgressBarObserver {
    visible: bool,
    bar: Option<ProgressBar>,
}

impl ProgressBarObserver {
    pub fn new(visible: bool) -> Self {
        Self { visible, bar: None }
    }
}

pub(crate) fn step_message(report: &StepReport) -> String {
    format!(
        "mini-epoch {} prog {:.2}% iter {}: ppl {:.2} loss {:.4} lr {:e}",
        report.pass_index + 1,
        report.progress * 100.0,
        report.step_index,
        report.perplexity,
        report.running_loss,
        report.rate
    )
}

impl TrainingObserver for ProgressBarObserver {
    fn on_pass_start(&mut self, _pass_index: usize, num_batches: usize) {
        if !self.visible {
            return;
        }
        let bar = ProgressBar::new(num_batches as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} {bar:10} {pos}/{len} [{elapsed_precise}<{eta_precise}]")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.bar = Some(bar);
    }

    fn on_step(&mut self, report: &StepReport) {
        if let Some(bar) = &self.bar {
            bar.set_message(step_message(report));
            bar.inc(1);
        }
    }

    fn on_evaluation(&mut self, pass_index: usize, dev_loss: f64) {
        info!(
            "mini-epoch {} dev loss {:.4} ppl {:.2}",
            pass_index + 1,
            dev_loss,
            dev_loss.exp()
        );
    }

    fn on_pass_end(&mut self, summary: &PassSummary) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
        info!(
            "mini-epoch {} done: {} steps, loss {:.4}, ppl {:.2}, lr {:e}, {} tokens",
            summary.pass_index + 1,
            summary.steps,
            summary.running_loss,
            summary.perplexity,
            summary.last_rate,
            summary.tokens_seen
        );
    }
}
