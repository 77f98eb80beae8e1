//! Optimizer trait

use crate::Tensor;

/// Trait for optimization algorithms
///
/// Parameter slices act as persistent groups: moment buffers are keyed by
/// position, so a group must keep the same tensors in the same order across
/// steps. Tensors without a gradient are skipped.
pub trait Optimizer {
    /// Perform a single optimization step
    fn step(&mut self, params: &mut [Tensor]);

    /// Zero out all gradients
    fn zero_grad(&mut self, params: &mut [Tensor]) {
        for param in params {
            param.zero_grad();
        }
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);
}
