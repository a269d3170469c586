//! Token-driven learning-rate policy: linear warmup, then cosine decay.
//!
//! Progress is measured in non-ignored label tokens rather than optimizer
//! steps, so batches with heavy padding advance the schedule less.

use std::f64::consts::PI;

use crate::config::TrainingConfig;

/// Rate for one step plus the decay progress it was computed at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledRate {
    pub rate: f64,
    /// 0 during warmup and when decay is disabled; unclamped past the horizon.
    pub progress: f64,
}

/// Stateless warmup + cosine policy over cumulative tokens.
#[derive(Debug, Clone, Copy)]
pub struct LrSchedule {
    initial: f64,
    final_ratio: f64,
    warmup_tokens: u64,
    final_tokens: u64,
    decay: bool,
}

impl LrSchedule {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            initial: config.initial_learning_rate,
            final_ratio: config.final_learning_rate / config.initial_learning_rate,
            warmup_tokens: config.warmup_token_threshold,
            final_tokens: config.final_token_threshold,
            decay: config.decay_enabled,
        }
    }

    pub fn rate_at(&self, tokens_seen: u64) -> ScheduledRate {
        if !self.decay {
            return ScheduledRate {
                rate: self.initial,
                progress: 0.0,
            };
        }

        let ratio = self.final_ratio;

        // Warmup: ramp from `ratio` up to 1. A zero threshold means no warmup at all.
        if self.warmup_tokens > 0 && tokens_seen < self.warmup_tokens {
            let multiplier =
                ratio + (1.0 - ratio) * tokens_seen as f64 / self.warmup_tokens as f64;
            return ScheduledRate {
                rate: self.initial * multiplier,
                progress: 0.0,
            };
        }

        let span = self.final_tokens.saturating_sub(self.warmup_tokens).max(1);
        let progress = (tokens_seen - self.warmup_tokens) as f64 / span as f64;
        let multiplier = (0.5 + ratio / 2.0) + (0.5 - ratio / 2.0) * (PI * progress).cos();

        ScheduledRate {
            rate: self.initial * multiplier,
            progress,
        }
    }
}

/// Convenience wrapper over [`LrSchedule::rate_at`].
pub fn compute_rate(config: &TrainingConfig, tokens_seen: u64) -> ScheduledRate {
    LrSchedule::new(config).rate_at(tokens_seen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(warmup: u64, horizon: u64) -> TrainingConfig {
        TrainingConfig {
            initial_learning_rate: 6e-4,
            final_learning_rate: 1e-5,
            warmup_token_threshold: warmup,
            final_token_threshold: horizon,
            decay_enabled: true,
            ..Default::default()
        }
    }

    fn close(a: f64, b: f64, rel: f64) -> bool {
        (a - b).abs() <= rel * b.abs()
    }

    #[test]
    fn constant_when_decay_disabled() {
        let cfg = TrainingConfig {
            decay_enabled: false,
            ..config(100, 1000)
        };
        for tokens in [0, 50, 100, 999, 1_000_000] {
            let r = compute_rate(&cfg, tokens);
            assert_eq!(r.rate, 6e-4);
            assert_eq!(r.progress, 0.0);
        }
    }

    #[test]
    fn warmup_starts_at_final_rate() {
        let r = compute_rate(&config(100, 1000), 0);
        assert!(close(r.rate, 1e-5, 1e-9));
        assert_eq!(r.progress, 0.0);
    }

    #[test]
    fn warmup_is_linear() {
        let cfg = config(100, 1000);
        let ratio = 1e-5 / 6e-4;
        let r = compute_rate(&cfg, 25);
        assert!(close(r.rate, 6e-4 * (ratio + (1.0 - ratio) * 0.25), 1e-9));
    }

    #[test]
    fn warmup_and_decay_agree_at_boundary() {
        let cfg = config(100, 1000);
        let before = compute_rate(&cfg, 99).rate;
        let at = compute_rate(&cfg, 100);
        assert_eq!(at.progress, 0.0);
        assert!(close(at.rate, 6e-4, 1e-12));
        // one token short of the boundary is within one warmup increment
        assert!((at.rate - before).abs() < 6e-4 / 100.0);
    }

    #[test]
    fn reaches_final_rate_at_horizon() {
        let r = compute_rate(&config(100, 1000), 1000);
        assert!((r.progress - 1.0).abs() < 1e-12);
        assert!(close(r.rate, 1e-5, 1e-6));
    }

    #[test]
    fn monotone_over_decay_window() {
        let cfg = config(100, 1000);
        let mut last = f64::INFINITY;
        for tokens in (100..=1000).step_by(10) {
            let rate = compute_rate(&cfg, tokens).rate;
            assert!(rate <= last);
            last = rate;
        }
    }

    #[test]
    fn zero_warmup_goes_straight_to_decay() {
        let cfg = config(0, 1000);
        let ratio = 1e-5 / 6e-4;

        let end = compute_rate(&cfg, 1000);
        assert!(close(end.rate, 1e-5, 0.01));

        let mid = compute_rate(&cfg, 500);
        assert!((mid.progress - 0.5).abs() < 1e-12);
        assert!(close(mid.rate, 6e-4 * (0.5 + ratio / 2.0), 0.01));

        let start = compute_rate(&cfg, 0);
        assert!(close(start.rate, 6e-4, 1e-12));
    }

    #[test]
    fn progress_runs_past_horizon() {
        let cfg = config(0, 1000);
        let r = compute_rate(&cfg, 1500);
        assert!((r.progress - 1.5).abs() < 1e-12);
        // past one half-cycle the cosine turns back up
        assert!(r.rate > compute_rate(&cfg, 1000).rate);
        assert!(r.rate > 0.0);
    }

    #[test]
    fn equal_thresholds_do_not_divide_by_zero() {
        let r = compute_rate(&config(0, 0), 0);
        assert!(r.rate.is_finite());
        assert_eq!(r.progress, 0.0);
    }
}
