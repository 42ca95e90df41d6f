//! Learning-rate cell and per-epoch polynomial decay.

/// Floor the decay converges to on the last epoch.
pub const END_LEARNING_RATE: f64 = 1e-9;
pub const DECAY_POWER: f64 = 0.9;

/// Mutable learning rate read by every optimizer step and rewritten once per epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRate(f64);

impl LearningRate {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> f64 {
        self.0
    }

    pub fn set(&mut self, value: f64) {
        self.0 = value;
    }
}

/// `(init - end) * (1 - epoch / total)^power + end`.
///
/// `total == 0` (a single-epoch run) holds `init`.
pub fn poly_decay(init: f64, end: f64, epoch: usize, total: usize, power: f64) -> f64 {
    if total == 0 {
        return init;
    }
    let progress = (epoch as f64 / total as f64).min(1.0);
    (init - end) * (1.0 - progress).powf(power) + end
}

/// Decay schedule for epoch `epoch` of `epochs`, written into `lr`.
pub fn lr_decay(lr: &mut LearningRate, init: f64, end: f64, epoch: usize, epochs: usize) {
    let total = epochs.saturating_sub(1);
    lr.set(poly_decay(init, end, epoch, total, DECAY_POWER));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_init_and_ends_at_floor() {
        let mut lr = LearningRate::new(0.0);
        lr_decay(&mut lr, 1e-4, END_LEARNING_RATE, 0, 10);
        assert!((lr.get() - 1e-4).abs() < 1e-15);
        lr_decay(&mut lr, 1e-4, END_LEARNING_RATE, 9, 10);
        assert!((lr.get() - END_LEARNING_RATE).abs() < 1e-15);
    }

    #[test]
    fn decay_is_monotonic() {
        let values: Vec<f64> = (0..20)
            .map(|e| poly_decay(1e-3, 1e-9, e, 19, DECAY_POWER))
            .collect();
        assert!(values.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn single_epoch_keeps_initial_rate() {
        let mut lr = LearningRate::new(0.0);
        lr_decay(&mut lr, 5e-4, END_LEARNING_RATE, 0, 1);
        assert_eq!(lr.get(), 5e-4);
    }

    #[test]
    fn midpoint_matches_closed_form() {
        let v = poly_decay(1.0, 0.0, 1, 2, 0.9);
        assert!((v - 0.5f64.powf(0.9)).abs() < 1e-12);
    }
}
