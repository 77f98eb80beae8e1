//! Gradient reversal gate
//!
//! Identity in the forward direction. In the backward direction the gradient
//! is negated and scaled by `beta`, or passed through unchanged when `beta`
//! is `None`. A single discriminator loss therefore pushes the discriminator
//! toward separating real from fake while pushing the upstream encoder in
//! the opposite direction.

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// Forward identity, backward negate-and-scale by `beta`
pub fn grad_reverse(a: &Tensor, beta: Option<f32>) -> Tensor {
    let data = a.to_array();
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(GradReverseBackward {
            a: a.clone(),
            beta,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct GradReverseBackward {
    a: Tensor,
    beta: Option<f32>,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for GradReverseBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let g = match self.beta {
                    Some(beta) => grad * (-beta),
                    None => grad.clone(),
                };
                self.a.accumulate_grad(g);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use ndarray::arr1;

    #[test]
    fn test_forward_is_identity() {
        let a = Tensor::from_vec(vec![1.5, -2.5, 0.0], true);
        for beta in [None, Some(0.0), Some(1.0), Some(100.0)] {
            let y = grad_reverse(&a, beta);
            assert_eq!(y.to_vec(), a.to_vec());
        }
    }

    #[test]
    fn test_backward_negates_and_scales() {
        let a = Tensor::from_vec(vec![1.0, 1.0], true);
        let y = grad_reverse(&a, Some(2.0));
        y.set_grad(arr1(&[3.0, -1.0]));
        backward(&y);
        assert_eq!(a.grad().unwrap(), arr1(&[-6.0, 2.0]));
    }

    #[test]
    fn test_backward_passthrough_without_beta() {
        let a = Tensor::from_vec(vec![1.0], true);
        let y = grad_reverse(&a, None);
        y.set_grad(arr1(&[5.0]));
        backward(&y);
        assert_eq!(a.grad().unwrap(), arr1(&[5.0]));
    }
}
