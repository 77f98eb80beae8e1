//! Affine map over a row-major batch

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// `y[r, o] = sum_i x[r, i] * w[o, i] + b[o]`
///
/// `x` is `(rows, in_f)` flat, `w` is `(out_f, in_f)` flat, `b` is `out_f`.
pub fn linear(x: &Tensor, w: &Tensor, b: &Tensor, rows: usize, in_f: usize, out_f: usize) -> Tensor {
    let xs = x.data();
    let ws = w.data();
    let bs = b.data();
    let mut data = Array1::zeros(rows * out_f);
    for r in 0..rows {
        for o in 0..out_f {
            let mut acc = bs[o];
            for i in 0..in_f {
                acc += xs[r * in_f + i] * ws[o * in_f + i];
            }
            data[r * out_f + o] = acc;
        }
    }
    drop(xs);
    drop(ws);
    drop(bs);
    let requires_grad = x.requires_grad() || w.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(LinearBackward {
            x: x.clone(),
            w: w.clone(),
            b: b.clone(),
            rows,
            in_f,
            out_f,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct LinearBackward {
    x: Tensor,
    w: Tensor,
    b: Tensor,
    rows: usize,
    in_f: usize,
    out_f: usize,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for LinearBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let (rows, in_f, out_f) = (self.rows, self.in_f, self.out_f);
            if self.x.requires_grad() {
                let ws = self.w.data();
                let mut gx = Array1::zeros(rows * in_f);
                for r in 0..rows {
                    for o in 0..out_f {
                        let g = grad[r * out_f + o];
                        for i in 0..in_f {
                            gx[r * in_f + i] += g * ws[o * in_f + i];
                        }
                    }
                }
                drop(ws);
                self.x.accumulate_grad(gx);
            }
            if self.w.requires_grad() {
                let xs = self.x.data();
                let mut gw = Array1::zeros(out_f * in_f);
                for r in 0..rows {
                    for o in 0..out_f {
                        let g = grad[r * out_f + o];
                        for i in 0..in_f {
                            gw[o * in_f + i] += g * xs[r * in_f + i];
                        }
                    }
                }
                drop(xs);
                self.w.accumulate_grad(gw);
            }
            if self.b.requires_grad() {
                let mut gb = Array1::zeros(out_f);
                for r in 0..rows {
                    for o in 0..out_f {
                        gb[o] += grad[r * out_f + o];
                    }
                }
                self.b.accumulate_grad(gb);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.w.clone(), self.b.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_linear_forward() {
        // x = [[1, 2]], w = [[1, 0], [0, 1], [1, 1]], b = [0, 10, 100]
        let x = Tensor::from_vec(vec![1.0, 2.0], false);
        let w = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], false);
        let b = Tensor::from_vec(vec![0.0, 10.0, 100.0], false);
        let y = linear(&x, &w, &b, 1, 2, 3);
        assert_eq!(y.to_vec(), vec![1.0, 12.0, 103.0]);
    }

    #[test]
    fn test_linear_backward() {
        let x = Tensor::from_vec(vec![1.0, 2.0], true);
        let w = Tensor::from_vec(vec![3.0, 4.0], true);
        let b = Tensor::from_vec(vec![0.5], true);
        let y = linear(&x, &w, &b, 1, 2, 1);
        assert_abs_diff_eq!(y.data()[0], 11.5, epsilon = 1e-6);
        y.set_grad(arr1(&[2.0]));
        backward(&y);
        assert_eq!(x.grad().unwrap(), arr1(&[6.0, 8.0]));
        assert_eq!(w.grad().unwrap(), arr1(&[2.0, 4.0]));
        assert_eq!(b.grad().unwrap(), arr1(&[2.0]));
    }

    #[test]
    fn test_linear_batch_bias_grad_sums_rows() {
        let x = Tensor::from_vec(vec![1.0, 1.0, 1.0], false);
        let w = Tensor::from_vec(vec![1.0], false);
        let b = Tensor::from_vec(vec![0.0], true);
        let y = linear(&x, &w, &b, 3, 1, 1);
        backward(&y);
        assert_eq!(b.grad().unwrap(), arr1(&[3.0]));
    }
}
