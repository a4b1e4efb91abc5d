//! Root sampling policy.

use rand::Rng;

/// Decides whether a new root trace is sampled. Children never consult it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    rate: f64,
}

impl Sampler {
    /// `rate` is clamped to `[0.0, 1.0]`.
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self { rate }
    }

    pub fn always() -> Self {
        Self::new(1.0)
    }

    pub fn never() -> Self {
        Self::new(0.0)
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn sample(&self) -> bool {
        if self.rate >= 1.0 {
            true
        } else if self.rate <= 0.0 {
            false
        } else {
            rand::thread_rng().gen_bool(self.rate)
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::always()
    }
}
