//! Activation functions: ReLU, PReLU, softplus, exp, row-wise log-softmax

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// Rectified linear unit
pub fn relu(a: &Tensor) -> Tensor {
    let data = a.data().mapv(|v| v.max(0.0));
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ReluBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ReluBackward {
    a: Tensor,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for ReluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let mask = self.a.data().mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
                self.a.accumulate_grad(grad * &mask);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Parametric ReLU with one learned slope per channel.
///
/// The input is laid out `[rows][channels][seg_len]`; element `i` belongs to
/// channel `(i / seg_len) % alpha.len()`. With `seg_len == 1` this degenerates
/// to one slope per feature column, the layout a linear layer produces.
pub fn prelu(a: &Tensor, alpha: &Tensor, seg_len: usize) -> Tensor {
    let src = a.data();
    let slopes = alpha.data();
    let nch = slopes.len();
    let data: Array1<f32> = src
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if v >= 0.0 {
                v
            } else {
                v * slopes[(i / seg_len) % nch]
            }
        })
        .collect();
    drop(src);
    drop(slopes);
    let requires_grad = a.requires_grad() || alpha.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(PreluBackward {
            a: a.clone(),
            alpha: alpha.clone(),
            seg_len,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct PreluBackward {
    a: Tensor,
    alpha: Tensor,
    seg_len: usize,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for PreluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let src = self.a.data();
            let slopes = self.alpha.data();
            let nch = slopes.len();
            if self.a.requires_grad() {
                let ga: Array1<f32> = src
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| {
                        let s = if v >= 0.0 {
                            1.0
                        } else {
                            slopes[(i / self.seg_len) % nch]
                        };
                        grad[i] * s
                    })
                    .collect();
                drop(src);
                drop(slopes);
                self.a.accumulate_grad(ga);
            } else {
                drop(src);
                drop(slopes);
            }
            if self.alpha.requires_grad() {
                let src = self.a.data();
                let mut galpha = Array1::zeros(nch);
                for (i, &v) in src.iter().enumerate() {
                    if v < 0.0 {
                        galpha[(i / self.seg_len) % nch] += grad[i] * v;
                    }
                }
                drop(src);
                self.alpha.accumulate_grad(galpha);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.alpha.clone()]
    }
}

/// Softplus with sharpness `beta`: `ln(1 + exp(beta * x)) / beta`
pub fn softplus(a: &Tensor, beta: f32) -> Tensor {
    let data = a.data().mapv(|v| {
        let bv = beta * v;
        // large inputs: softplus(x) -> x, avoids exp overflow
        if bv > 20.0 {
            v
        } else {
            bv.exp().ln_1p() / beta
        }
    });
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SoftplusBackward {
            a: a.clone(),
            beta,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SoftplusBackward {
    a: Tensor,
    beta: f32,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for SoftplusBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // d/dx = sigmoid(beta * x)
                let sig = self
                    .a
                    .data()
                    .mapv(|v| 1.0 / (1.0 + (-self.beta * v).exp()));
                self.a.accumulate_grad(grad * &sig);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Element-wise exponential
pub fn exp(a: &Tensor) -> Tensor {
    let data = a.data().mapv(f32::exp);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data.clone(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ExpBackward {
            a: a.clone(),
            value: data,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ExpBackward {
    a: Tensor,
    value: Array1<f32>,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for ExpBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad * &self.value);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Row-wise log-softmax over a `(rows, cols)` batch
pub fn log_softmax(a: &Tensor, rows: usize, cols: usize) -> Tensor {
    let src = a.data();
    let mut data = Array1::zeros(rows * cols);
    for r in 0..rows {
        let row = &src.as_slice().unwrap()[r * cols..(r + 1) * cols];
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let log_sum: f32 = row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
        for c in 0..cols {
            data[r * cols + c] = row[c] - max - log_sum;
        }
    }
    drop(src);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data.clone(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(LogSoftmaxBackward {
            a: a.clone(),
            value: data,
            rows,
            cols,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct LogSoftmaxBackward {
    a: Tensor,
    value: Array1<f32>,
    rows: usize,
    cols: usize,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for LogSoftmaxBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // dx = g - softmax(x) * sum_row(g)
                let mut ga = Array1::zeros(self.rows * self.cols);
                for r in 0..self.rows {
                    let gsum: f32 = (0..self.cols).map(|c| grad[r * self.cols + c]).sum();
                    for c in 0..self.cols {
                        let i = r * self.cols + c;
                        ga[i] = grad[i] - self.value[i].exp() * gsum;
                    }
                }
                self.a.accumulate_grad(ga);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}
