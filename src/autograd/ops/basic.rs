//! Basic autograd operations: arithmetic, reductions, concatenation, dropout

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use rand::Rng;
use std::cell::RefCell;
use std::rc::Rc;

/// Add two tensors element-wise
pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
    let data = &*a.data() + &*b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct AddBackward {
    a: Tensor,
    b: Tensor,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for AddBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(grad.clone());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Subtract two tensors element-wise
pub fn sub(a: &Tensor, b: &Tensor) -> Tensor {
    let data = &*a.data() - &*b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SubBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SubBackward {
    a: Tensor,
    b: Tensor,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for SubBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(-grad.clone());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Multiply two tensors element-wise
pub fn mul(a: &Tensor, b: &Tensor) -> Tensor {
    let data = &*a.data() * &*b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(MulBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct MulBackward {
    a: Tensor,
    b: Tensor,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for MulBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * b
                self.a.accumulate_grad(grad * &*self.b.data());
            }
            if self.b.requires_grad() {
                // ∂L/∂b = ∂L/∂out * a
                self.b.accumulate_grad(grad * &*self.a.data());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Divide two tensors element-wise
pub fn div(a: &Tensor, b: &Tensor) -> Tensor {
    let data = &*a.data() / &*b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(DivBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct DivBackward {
    a: Tensor,
    b: Tensor,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for DivBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out / b
                self.a.accumulate_grad(grad / &*self.b.data());
            }
            if self.b.requires_grad() {
                // ∂L/∂b = -∂L/∂out * a / b²
                let b = self.b.data();
                let g = grad * &*self.a.data() / (&*b * &*b);
                self.b.accumulate_grad(-g);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Scale a tensor by a scalar
pub fn scale(a: &Tensor, factor: f32) -> Tensor {
    let data = &*a.data() * factor;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ScaleBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ScaleBackward {
    a: Tensor,
    factor: f32,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for ScaleBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad * self.factor);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Element-wise absolute value
pub fn abs(a: &Tensor) -> Tensor {
    let data = a.data().mapv(f32::abs);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AbsBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct AbsBackward {
    a: Tensor,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for AbsBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let sign = self.a.data().mapv(|v| if v >= 0.0 { 1.0 } else { -1.0 });
                self.a.accumulate_grad(grad * &sign);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Sum all elements into a length-1 tensor
pub fn sum(a: &Tensor) -> Tensor {
    let total: f32 = a.data().sum();
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(Array1::from(vec![total]), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SumBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SumBackward {
    a: Tensor,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for SumBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a
                    .accumulate_grad(Array1::from_elem(self.a.len(), grad[0]));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Mean of all elements as a length-1 tensor
pub fn mean(a: &Tensor) -> Tensor {
    let n = a.len() as f32;
    scale(&sum(a), 1.0 / n)
}

/// Per-row mean: `(rows * cols)` input collapses to a length-`rows` output
pub fn row_mean(a: &Tensor, rows: usize, cols: usize) -> Tensor {
    let src = a.data();
    let mut data = Array1::zeros(rows);
    for r in 0..rows {
        let mut acc = 0.0;
        for c in 0..cols {
            acc += src[r * cols + c];
        }
        data[r] = acc / cols as f32;
    }
    drop(src);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(RowMeanBackward {
            a: a.clone(),
            rows,
            cols,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct RowMeanBackward {
    a: Tensor,
    rows: usize,
    cols: usize,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for RowMeanBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let mut ga = Array1::zeros(self.rows * self.cols);
                for r in 0..self.rows {
                    let g = grad[r] / self.cols as f32;
                    for c in 0..self.cols {
                        ga[r * self.cols + c] = g;
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

/// Row-wise concatenation of two batches: `(rows, a_cols)` ++ `(rows, b_cols)`
/// → `(rows, a_cols + b_cols)`
pub fn concat_rows(a: &Tensor, b: &Tensor, rows: usize, a_cols: usize, b_cols: usize) -> Tensor {
    let sa = a.data();
    let sb = b.data();
    let cols = a_cols + b_cols;
    let mut data = Array1::zeros(rows * cols);
    for r in 0..rows {
        for c in 0..a_cols {
            data[r * cols + c] = sa[r * a_cols + c];
        }
        for c in 0..b_cols {
            data[r * cols + a_cols + c] = sb[r * b_cols + c];
        }
    }
    drop(sa);
    drop(sb);
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ConcatRowsBackward {
            a: a.clone(),
            b: b.clone(),
            rows,
            a_cols,
            b_cols,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ConcatRowsBackward {
    a: Tensor,
    b: Tensor,
    rows: usize,
    a_cols: usize,
    b_cols: usize,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for ConcatRowsBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let cols = self.a_cols + self.b_cols;
            if self.a.requires_grad() {
                let mut ga = Array1::zeros(self.rows * self.a_cols);
                for r in 0..self.rows {
                    for c in 0..self.a_cols {
                        ga[r * self.a_cols + c] = grad[r * cols + c];
                    }
                }
                self.a.accumulate_grad(ga);
            }
            if self.b.requires_grad() {
                let mut gb = Array1::zeros(self.rows * self.b_cols);
                for r in 0..self.rows {
                    for c in 0..self.b_cols {
                        gb[r * self.b_cols + c] = grad[r * cols + self.a_cols + c];
                    }
                }
                self.b.accumulate_grad(gb);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Inverted dropout: zero each element with probability `p` and rescale the
/// survivors by `1/(1-p)`. Identity when not training or `p == 0`.
pub fn dropout(a: &Tensor, p: f32, training: bool) -> Tensor {
    if !training || p <= 0.0 {
        return a.clone();
    }
    let keep = 1.0 - p;
    let mut rng = rand::thread_rng();
    let mask: Array1<f32> = (0..a.len())
        .map(|_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 })
        .collect();
    let data = &*a.data() * &mask;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(DropoutBackward {
            a: a.clone(),
            mask,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct DropoutBackward {
    a: Tensor,
    mask: Array1<f32>,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for DropoutBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad * &self.mask);
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
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_add_sub_mul_forward() {
        let a = Tensor::from_vec(vec![1.0, 2.0], false);
        let b = Tensor::from_vec(vec![3.0, 5.0], false);
        assert_eq!(add(&a, &b).to_vec(), vec![4.0, 7.0]);
        assert_eq!(sub(&a, &b).to_vec(), vec![-2.0, -3.0]);
        assert_eq!(mul(&a, &b).to_vec(), vec![3.0, 10.0]);
    }

    #[test]
    fn test_mul_backward() {
        let a = Tensor::from_vec(vec![2.0, 3.0], true);
        let b = Tensor::from_vec(vec![4.0, 5.0], true);
        let y = mul(&a, &b);
        backward(&y);
        assert_eq!(a.grad().unwrap(), arr1(&[4.0, 5.0]));
        assert_eq!(b.grad().unwrap(), arr1(&[2.0, 3.0]));
    }

    #[test]
    fn test_div_backward() {
        let a = Tensor::from_vec(vec![6.0, 8.0], true);
        let b = Tensor::from_vec(vec![2.0, 4.0], true);
        let y = div(&a, &b);
        assert_eq!(y.to_vec(), vec![3.0, 2.0]);
        backward(&y);
        assert_eq!(a.grad().unwrap(), arr1(&[0.5, 0.25]));
        assert_eq!(b.grad().unwrap(), arr1(&[-1.5, -0.5]));
    }

    #[test]
    fn test_mean_backward() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], true);
        let m = mean(&a);
        assert_abs_diff_eq!(m.data()[0], 2.5, epsilon = 1e-6);
        backward(&m);
        assert_eq!(a.grad().unwrap(), arr1(&[0.25, 0.25, 0.25, 0.25]));
    }

    #[test]
    fn test_row_mean() {
        let a = Tensor::from_vec(vec![1.0, 3.0, 2.0, 6.0], true);
        let m = row_mean(&a, 2, 2);
        assert_eq!(m.to_vec(), vec![2.0, 4.0]);
        m.set_grad(arr1(&[2.0, 4.0]));
        backward(&m);
        assert_eq!(a.grad().unwrap(), arr1(&[1.0, 1.0, 2.0, 2.0]));
    }

    #[test]
    fn test_concat_rows_roundtrip_grad() {
        // two rows: a = [[1,2],[3,4]], b = [[5],[6]]
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], true);
        let b = Tensor::from_vec(vec![5.0, 6.0], true);
        let c = concat_rows(&a, &b, 2, 2, 1);
        assert_eq!(c.to_vec(), vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);
        c.set_grad(arr1(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]));
        backward(&c);
        assert_abs_diff_eq!(
            a.grad().unwrap().as_slice().unwrap(),
            arr1(&[0.1, 0.2, 0.4, 0.5]).as_slice().unwrap(),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            b.grad().unwrap().as_slice().unwrap(),
            arr1(&[0.3, 0.6]).as_slice().unwrap(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_abs_backward() {
        let a = Tensor::from_vec(vec![-2.0, 3.0], true);
        let y = abs(&a);
        assert_eq!(y.to_vec(), vec![2.0, 3.0]);
        backward(&y);
        assert_eq!(a.grad().unwrap(), arr1(&[-1.0, 1.0]));
    }

    #[test]
    fn test_dropout_eval_is_identity() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let y = dropout(&a, 0.5, false);
        assert_eq!(y.to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_dropout_preserves_expectation() {
        let a = Tensor::from_vec(vec![1.0; 10_000], false);
        let y = dropout(&a, 0.3, true);
        let m = y.data().mean().unwrap();
        assert!((m - 1.0).abs() < 0.05, "dropout mean drifted: {m}");
    }
}
