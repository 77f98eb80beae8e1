//! Batch normalization (non-affine)
//!
//! Per-channel normalization over a `(rows, channels, ch_len)` flat batch.
//! Training mode normalizes by the batch statistics and differentiates
//! through them; eval mode normalizes by externally supplied running
//! statistics, which are constants as far as the tape is concerned.

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// Normalize by batch statistics; returns `(output, mean, biased_var)` so the
/// caller can maintain running statistics.
pub fn batch_norm_train(
    x: &Tensor,
    rows: usize,
    channels: usize,
    ch_len: usize,
    eps: f32,
) -> (Tensor, Array1<f32>, Array1<f32>) {
    let n = (rows * ch_len) as f32;
    let xs = x.data();
    let mut mean = Array1::zeros(channels);
    let mut var = Array1::zeros(channels);
    for c in 0..channels {
        let mut acc = 0.0;
        for r in 0..rows {
            for t in 0..ch_len {
                acc += xs[(r * channels + c) * ch_len + t];
            }
        }
        mean[c] = acc / n;
    }
    for c in 0..channels {
        let mut acc = 0.0;
        for r in 0..rows {
            for t in 0..ch_len {
                let d = xs[(r * channels + c) * ch_len + t] - mean[c];
                acc += d * d;
            }
        }
        var[c] = acc / n;
    }
    let mut data = Array1::zeros(rows * channels * ch_len);
    for c in 0..channels {
        let inv_std = 1.0 / (var[c] + eps).sqrt();
        for r in 0..rows {
            for t in 0..ch_len {
                let i = (r * channels + c) * ch_len + t;
                data[i] = (xs[i] - mean[c]) * inv_std;
            }
        }
    }
    drop(xs);
    let requires_grad = x.requires_grad();

    let mut result = Tensor::new(data.clone(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(BatchNormTrainBackward {
            x: x.clone(),
            normed: data,
            var: var.clone(),
            rows,
            channels,
            ch_len,
            eps,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    (result, mean, var)
}

struct BatchNormTrainBackward {
    x: Tensor,
    normed: Array1<f32>,
    var: Array1<f32>,
    rows: usize,
    channels: usize,
    ch_len: usize,
    eps: f32,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for BatchNormTrainBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                let n = (self.rows * self.ch_len) as f32;
                let mut gx = Array1::zeros(self.rows * self.channels * self.ch_len);
                for c in 0..self.channels {
                    let inv_std = 1.0 / (self.var[c] + self.eps).sqrt();
                    let mut g_sum = 0.0;
                    let mut gx_sum = 0.0;
                    for r in 0..self.rows {
                        for t in 0..self.ch_len {
                            let i = (r * self.channels + c) * self.ch_len + t;
                            g_sum += grad[i];
                            gx_sum += grad[i] * self.normed[i];
                        }
                    }
                    // dx = (n*g - Σg - x̂ Σ(g x̂)) / (n * std)
                    for r in 0..self.rows {
                        for t in 0..self.ch_len {
                            let i = (r * self.channels + c) * self.ch_len + t;
                            gx[i] = (n * grad[i] - g_sum - self.normed[i] * gx_sum)
                                * inv_std
                                / n;
                        }
                    }
                }
                self.x.accumulate_grad(gx);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone()]
    }
}

/// Normalize by fixed running statistics (eval mode)
pub fn batch_norm_eval(
    x: &Tensor,
    rows: usize,
    channels: usize,
    ch_len: usize,
    mean: &Array1<f32>,
    var: &Array1<f32>,
    eps: f32,
) -> Tensor {
    let xs = x.data();
    let mut data = Array1::zeros(rows * channels * ch_len);
    let inv_std: Array1<f32> = var.mapv(|v| 1.0 / (v + eps).sqrt());
    for c in 0..channels {
        for r in 0..rows {
            for t in 0..ch_len {
                let i = (r * channels + c) * ch_len + t;
                data[i] = (xs[i] - mean[c]) * inv_std[c];
            }
        }
    }
    drop(xs);
    let requires_grad = x.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(BatchNormEvalBackward {
            x: x.clone(),
            inv_std,
            rows,
            channels,
            ch_len,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct BatchNormEvalBackward {
    x: Tensor,
    inv_std: Array1<f32>,
    rows: usize,
    channels: usize,
    ch_len: usize,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for BatchNormEvalBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                let mut gx = Array1::zeros(self.rows * self.channels * self.ch_len);
                for c in 0..self.channels {
                    for r in 0..self.rows {
                        for t in 0..self.ch_len {
                            let i = (r * self.channels + c) * self.ch_len + t;
                            gx[i] = grad[i] * self.inv_std[c];
                        }
                    }
                }
                self.x.accumulate_grad(gx);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone()]
    }
}
