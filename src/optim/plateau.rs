//! Plateau-triggered learning rate reduction

use super::Optimizer;

/// Cuts the learning rate by `factor` when a maximized metric stops
/// improving for `patience` consecutive steps.
///
/// An improvement means exceeding the best seen value by the relative
/// `threshold`. A `cooldown` suppresses bad-step counting right after a
/// reduction.
pub struct ReduceLrOnPlateau {
    factor: f32,
    patience: usize,
    threshold: f32,
    cooldown: usize,
    min_lr: f32,
    best: Option<f32>,
    num_bad: usize,
    cooldown_left: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f32, patience: usize, threshold: f32, cooldown: usize, min_lr: f32) -> Self {
        Self {
            factor,
            patience,
            threshold,
            cooldown,
            min_lr,
            best: None,
            num_bad: 0,
            cooldown_left: 0,
        }
    }

    fn is_better(&self, metric: f32) -> bool {
        match self.best {
            None => true,
            Some(best) => metric > best * (1.0 + self.threshold),
        }
    }

    /// Record a metric observation and reduce the optimizer lr on plateau.
    /// Returns true when a reduction happened.
    pub fn step(&mut self, metric: f32, optimizer: &mut dyn Optimizer) -> bool {
        if self.is_better(metric) {
            self.best = Some(metric);
            self.num_bad = 0;
        } else if self.cooldown_left > 0 {
            self.cooldown_left -= 1;
        } else {
            self.num_bad += 1;
        }

        if self.num_bad > self.patience {
            self.num_bad = 0;
            self.cooldown_left = self.cooldown;
            let new_lr = (optimizer.lr() * self.factor).max(self.min_lr);
            if new_lr < optimizer.lr() {
                optimizer.set_lr(new_lr);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::Adam;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_plateau_reduces_after_patience() {
        let mut opt = Adam::default_params(0.1);
        let mut sch = ReduceLrOnPlateau::new(0.5, 2, 0.01, 0, 0.0);

        sch.step(1.0, &mut opt);
        // three non-improving observations exceed patience = 2
        assert!(!sch.step(1.0, &mut opt));
        assert!(!sch.step(1.0, &mut opt));
        assert!(sch.step(1.0, &mut opt));
        assert_abs_diff_eq!(opt.lr(), 0.05, epsilon = 1e-8);
    }

    #[test]
    fn test_plateau_improvement_resets_counter() {
        let mut opt = Adam::default_params(0.1);
        let mut sch = ReduceLrOnPlateau::new(0.5, 1, 0.01, 0, 0.0);

        sch.step(1.0, &mut opt);
        sch.step(1.0, &mut opt);
        // clear improvement resets the bad-step count
        sch.step(1.5, &mut opt);
        sch.step(1.5, &mut opt);
        assert_abs_diff_eq!(opt.lr(), 0.1, epsilon = 1e-8);
    }

    #[test]
    fn test_plateau_relative_threshold() {
        let mut opt = Adam::default_params(0.1);
        let mut sch = ReduceLrOnPlateau::new(0.5, 0, 0.01, 0, 0.0);

        sch.step(1.0, &mut opt);
        // +0.5% is below the 1% relative threshold, counts as bad
        assert!(sch.step(1.005, &mut opt));
    }

    #[test]
    fn test_plateau_respects_min_lr() {
        let mut opt = Adam::default_params(0.1);
        let mut sch = ReduceLrOnPlateau::new(0.1, 0, 0.01, 0, 0.05);

        sch.step(1.0, &mut opt);
        sch.step(1.0, &mut opt);
        assert_abs_diff_eq!(opt.lr(), 0.05, epsilon = 1e-8);
        // already at the floor, no further reduction reported
        assert!(!sch.step(1.0, &mut opt));
    }
}
