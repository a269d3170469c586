/// Running loss for the current pass.
///
/// The weight of each new sample is `1 / n` for the n-th update since the last
/// [`reset`](LossEstimate::reset), so within a pass this is the mean of the
/// losses seen so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossEstimate {
    running_average: Option<f64>,
    sample_count: usize,
}

impl LossEstimate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, loss: f64) -> f64 {
        self.sample_count += 1;
        let next = match self.running_average {
            None => loss,
            Some(avg) => {
                let factor = 1.0 / self.sample_count as f64;
                avg * (1.0 - factor) + loss * factor
            }
        };
        self.running_average = Some(next);
        next
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// `None` until the first update.
    pub fn value(&self) -> Option<f64> {
        self.running_average
    }

    pub fn perplexity(&self) -> Option<f64> {
        self.running_average.map(f64::exp)
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_takes_the_loss() {
        let mut est = LossEstimate::new();
        assert_eq!(est.value(), None);
        assert_eq!(est.update(3.5), 3.5);
        assert_eq!(est.sample_count(), 1);
    }

    #[test]
    fn constant_input_is_stable() {
        let mut est = LossEstimate::new();
        for _ in 0..50 {
            est.update(1.25);
        }
        assert!((est.value().unwrap() - 1.25).abs() < 1e-12);
    }

    #[test]
    fn tracks_the_mean_within_a_pass() {
        let mut est = LossEstimate::new();
        for loss in [4.0, 2.0, 3.0] {
            est.update(loss);
        }
        assert!((est.value().unwrap() - 3.0).abs() < 1e-12);
        assert!((est.perplexity().unwrap() - 3.0f64.exp()).abs() < 1e-9);
    }

    #[test]
    fn reset_starts_over() {
        let mut est = LossEstimate::new();
        est.update(10.0);
        est.update(20.0);
        est.reset();
        assert_eq!(est.value(), None);
        assert_eq!(est.update(2.0), 2.0);
        assert_eq!(est.sample_count(), 1);
    }
}
