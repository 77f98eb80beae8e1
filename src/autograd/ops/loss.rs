//! Loss functions as graph ops

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// Mean squared error between prediction and target, as a length-1 tensor
pub fn mse(pred: &Tensor, target: &Tensor) -> Tensor {
    let diff = &*pred.data() - &*target.data();
    let n = pred.len() as f32;
    let value = diff.mapv(|d| d * d).sum() / n;
    let requires_grad = pred.requires_grad() || target.requires_grad();

    let mut result = Tensor::new(Array1::from(vec![value]), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(MseBackward {
            pred: pred.clone(),
            target: target.clone(),
            diff,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct MseBackward {
    pred: Tensor,
    target: Tensor,
    diff: Array1<f32>,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for MseBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let n = self.diff.len() as f32;
            let g = grad[0] * 2.0 / n;
            if self.pred.requires_grad() {
                self.pred.accumulate_grad(&self.diff * g);
            }
            if self.target.requires_grad() {
                self.target.accumulate_grad(&self.diff * (-g));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.pred.clone(), self.target.clone()]
    }
}

/// Mean negative log-likelihood over rows of log-probabilities.
///
/// `log_probs` is `(rows, cols)` flat; `targets[r]` is the class index of
/// row `r`. Gradient flows only into the picked entries.
pub fn nll(log_probs: &Tensor, targets: &[usize], rows: usize, cols: usize) -> Tensor {
    debug_assert_eq!(targets.len(), rows);
    let lp = log_probs.data();
    let value = -targets
        .iter()
        .enumerate()
        .map(|(r, &t)| lp[r * cols + t])
        .sum::<f32>()
        / rows as f32;
    drop(lp);
    let requires_grad = log_probs.requires_grad();

    let mut result = Tensor::new(Array1::from(vec![value]), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(NllBackward {
            log_probs: log_probs.clone(),
            targets: targets.to_vec(),
            rows,
            cols,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct NllBackward {
    log_probs: Tensor,
    targets: Vec<usize>,
    rows: usize,
    cols: usize,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for NllBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.log_probs.requires_grad() {
                let mut g = Array1::zeros(self.rows * self.cols);
                let scale = grad[0] / self.rows as f32;
                for (r, &t) in self.targets.iter().enumerate() {
                    g[r * self.cols + t] = -scale;
                }
                self.log_probs.accumulate_grad(g);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.log_probs.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use crate::autograd::ops::log_softmax;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_mse_value_and_grad() {
        let pred = Tensor::from_vec(vec![1.0, 2.0], true);
        let target = Tensor::from_vec(vec![0.0, 0.0], false);
        let loss = mse(&pred, &target);
        assert_abs_diff_eq!(loss.data()[0], 2.5, epsilon = 1e-6);
        backward(&loss);
        assert_eq!(pred.grad().unwrap(), arr1(&[1.0, 2.0]));
    }

    #[test]
    fn test_mse_zero_at_match() {
        let pred = Tensor::from_vec(vec![1.0, -1.0], true);
        let target = Tensor::from_vec(vec![1.0, -1.0], false);
        let loss = mse(&pred, &target);
        assert_abs_diff_eq!(loss.data()[0], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_nll_picks_target_entries() {
        // uniform log-probs over 2 classes: loss = ln 2
        let lp = Tensor::from_vec(vec![(0.5f32).ln(); 4], true);
        let loss = nll(&lp, &[0, 1], 2, 2);
        assert_abs_diff_eq!(loss.data()[0], std::f32::consts::LN_2, epsilon = 1e-6);
        backward(&loss);
        let g = lp.grad().unwrap();
        assert_abs_diff_eq!(g[0], -0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(g[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(g[2], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(g[3], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_nll_with_log_softmax_is_cross_entropy_grad() {
        // d(ce)/dlogits = softmax - onehot, averaged over rows
        let logits = Tensor::from_vec(vec![1.0, 0.0], true);
        let lp = log_softmax(&logits, 1, 2);
        let loss = nll(&lp, &[0], 1, 2);
        backward(&loss);
        let g = logits.grad().unwrap();
        let p0 = 1.0 / (1.0 + (-1.0f32).exp());
        assert_abs_diff_eq!(g[0], p0 - 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(g[1], 1.0 - p0, epsilon = 1e-5);
    }
}
