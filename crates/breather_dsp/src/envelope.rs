//! Envelope Estimation
//!
//! Two building blocks shared by every per-band stage:
//!
//! - [`RmsEnvelope`]: sliding-window RMS over a ring of squared samples with
//!   a running sum. Window length changes ramp by one sample per processed
//!   sample so the estimate never jumps.
//! - [`follow`]: one-pole attack/release smoothing written as a pure
//!   state-update function `(state, target, coefficients) -> state`.

/// Sliding-window RMS estimator
///
/// # Real-time Safety
/// The ring is allocated once for the largest window; [`RmsEnvelope::set_window`]
/// only moves the target length.
#[derive(Debug, Clone)]
pub struct RmsEnvelope {
    /// Squared input samples
    ring: Vec<f32>,
    head: usize,
    /// Number of samples currently inside the window
    length: usize,
    /// Length the window is ramping toward
    target: usize,
    /// f64 keeps the running sum from drifting over long sessions
    sum: f64,
}

impl RmsEnvelope {
    /// Create an estimator that supports windows up to `max_window` samples
    pub fn new(max_window: usize) -> Self {
        let capacity = max_window.max(1);
        Self {
            ring: vec![0.0; capacity],
            head: 0,
            length: 1,
            target: 1,
            sum: 0.0,
        }
    }

    /// Set the target window length in samples
    pub fn set_window(&mut self, samples: usize) {
        self.target = samples.clamp(1, self.ring.len());
    }

    /// Jump straight to a window length (used right after construction)
    pub fn set_window_immediate(&mut self, samples: usize) {
        self.set_window(samples);
        self.length = self.target;
        self.recompute_sum();
    }

    /// Current (possibly still ramping) window length
    pub fn window(&self) -> usize {
        self.length
    }

    #[inline]
    fn remove_oldest(&mut self) {
        let cap = self.ring.len();
        let oldest = (self.head + cap - self.length) % cap;
        self.sum -= self.ring[oldest] as f64;
        self.length -= 1;
    }

    /// Push one sample and return the RMS over the current window
    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        if self.length >= self.target {
            // Steady state drops one, shrinking drops a second one
            self.remove_oldest();
            if self.length >= self.target && self.length > 0 {
                self.remove_oldest();
            }
        }

        let squared = sample * sample;
        self.ring[self.head] = squared;
        self.sum += squared as f64;
        self.head = (self.head + 1) % self.ring.len();
        self.length += 1;

        if !self.sum.is_finite() {
            self.reset();
            return 0.0;
        }
        if self.sum < 0.0 {
            self.sum = 0.0;
        }

        ((self.sum / self.length as f64) as f32).sqrt()
    }

    /// Mean square over the current window
    pub fn mean_square(&self) -> f32 {
        (self.sum.max(0.0) / self.length as f64) as f32
    }

    /// Clear accumulated energy, keeping the target window
    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.head = 0;
        self.length = self.target;
        self.sum = 0.0;
    }

    fn recompute_sum(&mut self) {
        let cap = self.ring.len();
        self.sum = (0..self.length)
            .map(|i| self.ring[(self.head + cap - 1 - i) % cap] as f64)
            .sum();
    }
}

/// One attack/release smoothing step
///
/// `rise_coeff` is used while the state moves up toward `target`,
/// `fall_coeff` while it moves down. Coefficients come from
/// [`crate::time_constant_coeff`]; 0.0 means "jump immediately".
#[inline]
pub fn follow(state: f32, target: f32, rise_coeff: f32, fall_coeff: f32) -> f32 {
    let coeff = if target > state { rise_coeff } else { fall_coeff };
    target + coeff * (state - target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_constant() {
        let mut env = RmsEnvelope::new(64);
        env.set_window_immediate(16);
        let mut rms = 0.0;
        for _ in 0..32 {
            rms = env.process(0.5);
        }
        assert!((rms - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_window_fills_gradually() {
        let mut env = RmsEnvelope::new(64);
        env.set_window_immediate(16);
        let first = env.process(1.0);
        // One sample of energy averaged over the full window
        assert!((first - (1.0_f32 / 16.0).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_window_change_ramps() {
        let mut env = RmsEnvelope::new(128);
        env.set_window_immediate(100);
        for _ in 0..200 {
            env.process(1.0);
        }

        env.set_window(10);
        env.process(1.0);
        assert_eq!(env.window(), 99);

        for _ in 0..200 {
            env.process(1.0);
        }
        assert_eq!(env.window(), 10);

        env.set_window(20);
        env.process(1.0);
        assert_eq!(env.window(), 11);
    }

    #[test]
    fn test_window_ramp_is_smooth() {
        let mut env = RmsEnvelope::new(1024);
        env.set_window_immediate(1000);
        // Decaying signal so that long and short windows disagree
        let mut last = 0.0;
        for i in 0..2000 {
            last = env.process((-(i as f32) / 400.0).exp());
        }
        env.set_window(10);
        let next = env.process((-2000.0_f32 / 400.0).exp());
        assert!((next - last).abs() < 0.01, "estimate jumped: {} -> {}", last, next);
    }

    #[test]
    fn test_non_finite_resets() {
        let mut env = RmsEnvelope::new(16);
        env.set_window_immediate(8);
        env.process(f32::INFINITY);
        assert_eq!(env.mean_square(), 0.0);
        let rms = env.process(0.0);
        assert!(rms.is_finite());
    }

    #[test]
    fn test_follow_attack_release() {
        let rise = 0.5;
        let fall = 0.9;
        let up = follow(0.0, 1.0, rise, fall);
        assert!((up - 0.5).abs() < 1e-6);
        let down = follow(1.0, 0.0, rise, fall);
        assert!((down - 0.9).abs() < 1e-6);
        // Zero coefficient jumps
        assert_eq!(follow(0.3, 0.8, 0.0, 0.0), 0.8);
    }
}
