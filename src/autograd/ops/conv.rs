//! Strided grouped 1-D convolution and its transpose
//!
//! Weight layouts follow the usual convention: `conv1d` weights are
//! `(out_ch, in_ch/groups, kernel)` flat, `conv_transpose1d` weights are
//! `(in_ch, out_ch/groups, kernel)` flat. Output lengths use floor
//! arithmetic: `(in_len + 2*padding - kernel) / stride + 1` for the forward
//! direction and `(in_len - 1) * stride + kernel` for the transpose.

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// Boundary handling for convolution padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    /// Out-of-range positions read as zero
    Zero,
    /// Out-of-range positions replicate the nearest edge value
    Replicate,
}

/// Geometry of a grouped 1-D convolution over a flat batch
#[derive(Debug, Clone, Copy)]
pub struct Conv1dSpec {
    pub rows: usize,
    pub in_ch: usize,
    pub in_len: usize,
    pub out_ch: usize,
    pub kernel: usize,
    pub stride: usize,
    pub groups: usize,
    pub padding: usize,
    pub pad_mode: PadMode,
}

impl Conv1dSpec {
    pub fn out_len(&self) -> usize {
        (self.in_len + 2 * self.padding - self.kernel) / self.stride + 1
    }
}

/// Geometry of a grouped transposed 1-D convolution
#[derive(Debug, Clone, Copy)]
pub struct ConvTranspose1dSpec {
    pub rows: usize,
    pub in_ch: usize,
    pub in_len: usize,
    pub out_ch: usize,
    pub kernel: usize,
    pub stride: usize,
    pub groups: usize,
}

impl ConvTranspose1dSpec {
    pub fn out_len(&self) -> usize {
        (self.in_len - 1) * self.stride + self.kernel
    }
}

// Padded read: maps a position in [-pad, in_len + pad) onto the source row.
// Returns None for zero padding outside the support.
fn padded_index(pos: isize, in_len: usize, mode: PadMode) -> Option<usize> {
    if pos < 0 {
        match mode {
            PadMode::Zero => None,
            PadMode::Replicate => Some(0),
        }
    } else if pos as usize >= in_len {
        match mode {
            PadMode::Zero => None,
            PadMode::Replicate => Some(in_len - 1),
        }
    } else {
        Some(pos as usize)
    }
}

/// Grouped strided 1-D convolution with bias
pub fn conv1d(x: &Tensor, w: &Tensor, b: &Tensor, spec: Conv1dSpec) -> Tensor {
    let out_len = spec.out_len();
    let icpg = spec.in_ch / spec.groups;
    let ocpg = spec.out_ch / spec.groups;
    let xs = x.data();
    let ws = w.data();
    let bs = b.data();
    let mut data = Array1::zeros(spec.rows * spec.out_ch * out_len);
    for r in 0..spec.rows {
        let x_row = r * spec.in_ch * spec.in_len;
        let y_row = r * spec.out_ch * out_len;
        for oc in 0..spec.out_ch {
            let g = oc / ocpg;
            for t in 0..out_len {
                let mut acc = bs[oc];
                for icl in 0..icpg {
                    let ic = g * icpg + icl;
                    for j in 0..spec.kernel {
                        let pos = (t * spec.stride + j) as isize - spec.padding as isize;
                        if let Some(p) = padded_index(pos, spec.in_len, spec.pad_mode) {
                            acc += ws[(oc * icpg + icl) * spec.kernel + j]
                                * xs[x_row + ic * spec.in_len + p];
                        }
                    }
                }
                data[y_row + oc * out_len + t] = acc;
            }
        }
    }
    drop(xs);
    drop(ws);
    drop(bs);
    let requires_grad = x.requires_grad() || w.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(Conv1dBackward {
            x: x.clone(),
            w: w.clone(),
            b: b.clone(),
            spec,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct Conv1dBackward {
    x: Tensor,
    w: Tensor,
    b: Tensor,
    spec: Conv1dSpec,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for Conv1dBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let spec = self.spec;
            let out_len = spec.out_len();
            let icpg = spec.in_ch / spec.groups;
            let ocpg = spec.out_ch / spec.groups;
            if self.x.requires_grad() {
                let ws = self.w.data();
                let mut gx = Array1::zeros(spec.rows * spec.in_ch * spec.in_len);
                for r in 0..spec.rows {
                    let x_row = r * spec.in_ch * spec.in_len;
                    let y_row = r * spec.out_ch * out_len;
                    for oc in 0..spec.out_ch {
                        let g = oc / ocpg;
                        for t in 0..out_len {
                            let go = grad[y_row + oc * out_len + t];
                            for icl in 0..icpg {
                                let ic = g * icpg + icl;
                                for j in 0..spec.kernel {
                                    let pos =
                                        (t * spec.stride + j) as isize - spec.padding as isize;
                                    // replicate-pad reads fold back onto the edge element
                                    if let Some(p) = padded_index(pos, spec.in_len, spec.pad_mode)
                                    {
                                        gx[x_row + ic * spec.in_len + p] +=
                                            go * ws[(oc * icpg + icl) * spec.kernel + j];
                                    }
                                }
                            }
                        }
                    }
                }
                drop(ws);
                self.x.accumulate_grad(gx);
            }
            if self.w.requires_grad() {
                let xs = self.x.data();
                let mut gw = Array1::zeros(spec.out_ch * icpg * spec.kernel);
                for r in 0..spec.rows {
                    let x_row = r * spec.in_ch * spec.in_len;
                    let y_row = r * spec.out_ch * out_len;
                    for oc in 0..spec.out_ch {
                        let g = oc / ocpg;
                        for t in 0..out_len {
                            let go = grad[y_row + oc * out_len + t];
                            for icl in 0..icpg {
                                let ic = g * icpg + icl;
                                for j in 0..spec.kernel {
                                    let pos =
                                        (t * spec.stride + j) as isize - spec.padding as isize;
                                    if let Some(p) = padded_index(pos, spec.in_len, spec.pad_mode)
                                    {
                                        gw[(oc * icpg + icl) * spec.kernel + j] +=
                                            go * xs[x_row + ic * spec.in_len + p];
                                    }
                                }
                            }
                        }
                    }
                }
                drop(xs);
                self.w.accumulate_grad(gw);
            }
            if self.b.requires_grad() {
                let mut gb = Array1::zeros(spec.out_ch);
                for r in 0..spec.rows {
                    let y_row = r * spec.out_ch * out_len;
                    for oc in 0..spec.out_ch {
                        for t in 0..out_len {
                            gb[oc] += grad[y_row + oc * out_len + t];
                        }
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

/// Grouped transposed 1-D convolution with bias
pub fn conv_transpose1d(x: &Tensor, w: &Tensor, b: &Tensor, spec: ConvTranspose1dSpec) -> Tensor {
    let out_len = spec.out_len();
    let icpg = spec.in_ch / spec.groups;
    let ocpg = spec.out_ch / spec.groups;
    let xs = x.data();
    let ws = w.data();
    let bs = b.data();
    let mut data = Array1::zeros(spec.rows * spec.out_ch * out_len);
    for r in 0..spec.rows {
        let y_row = r * spec.out_ch * out_len;
        for oc in 0..spec.out_ch {
            for t in 0..out_len {
                data[y_row + oc * out_len + t] = bs[oc];
            }
        }
    }
    for r in 0..spec.rows {
        let x_row = r * spec.in_ch * spec.in_len;
        let y_row = r * spec.out_ch * out_len;
        for g in 0..spec.groups {
            for icl in 0..icpg {
                let ic = g * icpg + icl;
                for ocl in 0..ocpg {
                    let oc = g * ocpg + ocl;
                    for i in 0..spec.in_len {
                        let xv = xs[x_row + ic * spec.in_len + i];
                        for j in 0..spec.kernel {
                            data[y_row + oc * out_len + i * spec.stride + j] +=
                                xv * ws[(ic * ocpg + ocl) * spec.kernel + j];
                        }
                    }
                }
            }
        }
    }
    drop(xs);
    drop(ws);
    drop(bs);
    let requires_grad = x.requires_grad() || w.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ConvTranspose1dBackward {
            x: x.clone(),
            w: w.clone(),
            b: b.clone(),
            spec,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ConvTranspose1dBackward {
    x: Tensor,
    w: Tensor,
    b: Tensor,
    spec: ConvTranspose1dSpec,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for ConvTranspose1dBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let spec = self.spec;
            let out_len = spec.out_len();
            let icpg = spec.in_ch / spec.groups;
            let ocpg = spec.out_ch / spec.groups;
            if self.x.requires_grad() {
                let ws = self.w.data();
                let mut gx = Array1::zeros(spec.rows * spec.in_ch * spec.in_len);
                for r in 0..spec.rows {
                    let x_row = r * spec.in_ch * spec.in_len;
                    let y_row = r * spec.out_ch * out_len;
                    for g in 0..spec.groups {
                        for icl in 0..icpg {
                            let ic = g * icpg + icl;
                            for ocl in 0..ocpg {
                                let oc = g * ocpg + ocl;
                                for i in 0..spec.in_len {
                                    let mut acc = 0.0;
                                    for j in 0..spec.kernel {
                                        acc += grad[y_row + oc * out_len + i * spec.stride + j]
                                            * ws[(ic * ocpg + ocl) * spec.kernel + j];
                                    }
                                    gx[x_row + ic * spec.in_len + i] += acc;
                                }
                            }
                        }
                    }
                }
                drop(ws);
                self.x.accumulate_grad(gx);
            }
            if self.w.requires_grad() {
                let xs = self.x.data();
                let mut gw = Array1::zeros(spec.in_ch * ocpg * spec.kernel);
                for r in 0..spec.rows {
                    let x_row = r * spec.in_ch * spec.in_len;
                    let y_row = r * spec.out_ch * out_len;
                    for g in 0..spec.groups {
                        for icl in 0..icpg {
                            let ic = g * icpg + icl;
                            for ocl in 0..ocpg {
                                let oc = g * ocpg + ocl;
                                for i in 0..spec.in_len {
                                    let xv = xs[x_row + ic * spec.in_len + i];
                                    for j in 0..spec.kernel {
                                        gw[(ic * ocpg + ocl) * spec.kernel + j] += xv
                                            * grad[y_row + oc * out_len + i * spec.stride + j];
                                    }
                                }
                            }
                        }
                    }
                }
                drop(xs);
                self.w.accumulate_grad(gw);
            }
            if self.b.requires_grad() {
                let mut gb = Array1::zeros(spec.out_ch);
                for r in 0..spec.rows {
                    let y_row = r * spec.out_ch * out_len;
                    for oc in 0..spec.out_ch {
                        for t in 0..out_len {
                            gb[oc] += grad[y_row + oc * out_len + t];
                        }
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

    fn spec(in_len: usize, kernel: usize, stride: usize, padding: usize, mode: PadMode) -> Conv1dSpec {
        Conv1dSpec {
            rows: 1,
            in_ch: 1,
            in_len,
            out_ch: 1,
            kernel,
            stride,
            groups: 1,
            padding,
            pad_mode: mode,
        }
    }

    #[test]
    fn test_conv1d_identity_kernel() {
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], false);
        let w = Tensor::from_vec(vec![1.0], false);
        let b = Tensor::from_vec(vec![0.0], false);
        let y = conv1d(&x, &w, &b, spec(4, 1, 1, 0, PadMode::Zero));
        assert_eq!(y.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_conv1d_replicate_padding_edges() {
        // box kernel over a constant signal stays constant when edges replicate
        let x = Tensor::from_vec(vec![5.0; 6], false);
        let w = Tensor::from_vec(vec![1.0 / 3.0; 3], false);
        let b = Tensor::from_vec(vec![0.0], false);
        let y = conv1d(&x, &w, &b, spec(6, 3, 1, 1, PadMode::Replicate));
        assert_eq!(y.len(), 6);
        for v in y.to_vec() {
            assert_abs_diff_eq!(v, 5.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_conv1d_stride_out_len() {
        let x = Tensor::from_vec(vec![0.0; 8], false);
        let w = Tensor::from_vec(vec![0.0; 3], false);
        let b = Tensor::from_vec(vec![0.0], false);
        let s = spec(8, 3, 2, 1, PadMode::Zero);
        assert_eq!(s.out_len(), 4);
        assert_eq!(conv1d(&x, &w, &b, s).len(), 4);
    }

    #[test]
    fn test_conv1d_grouped_channels_stay_separate() {
        // 2 channels, 2 groups: each output channel sees only its own input
        let x = Tensor::from_vec(vec![1.0, 1.0, 10.0, 10.0], false);
        let w = Tensor::from_vec(vec![1.0, 2.0], false);
        let b = Tensor::from_vec(vec![0.0, 0.0], false);
        let s = Conv1dSpec {
            rows: 1,
            in_ch: 2,
            in_len: 2,
            out_ch: 2,
            kernel: 1,
            stride: 1,
            groups: 2,
            padding: 0,
            pad_mode: PadMode::Zero,
        };
        let y = conv1d(&x, &w, &b, s);
        assert_eq!(y.to_vec(), vec![1.0, 1.0, 20.0, 20.0]);
    }

    #[test]
    fn test_conv1d_backward_matches_manual() {
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let w = Tensor::from_vec(vec![2.0, 1.0], true);
        let b = Tensor::from_vec(vec![0.5], true);
        // out[t] = 2*x[t] + x[t+1] + 0.5, t in 0..2
        let y = conv1d(&x, &w, &b, spec(3, 2, 1, 0, PadMode::Zero));
        assert_eq!(y.to_vec(), vec![4.5, 7.5]);
        y.set_grad(arr1(&[1.0, 1.0]));
        backward(&y);
        assert_eq!(x.grad().unwrap(), arr1(&[2.0, 3.0, 1.0]));
        assert_eq!(w.grad().unwrap(), arr1(&[3.0, 5.0]));
        assert_eq!(b.grad().unwrap(), arr1(&[2.0]));
    }

    #[test]
    fn test_conv_transpose1d_upsamples() {
        let x = Tensor::from_vec(vec![1.0, 2.0], true);
        let w = Tensor::from_vec(vec![1.0, 1.0], true);
        let b = Tensor::from_vec(vec![0.0], true);
        let s = ConvTranspose1dSpec {
            rows: 1,
            in_ch: 1,
            in_len: 2,
            out_ch: 1,
            kernel: 2,
            stride: 2,
            groups: 1,
        };
        assert_eq!(s.out_len(), 4);
        let y = conv_transpose1d(&x, &w, &b, s);
        assert_eq!(y.to_vec(), vec![1.0, 1.0, 2.0, 2.0]);
        backward(&y);
        assert_eq!(x.grad().unwrap(), arr1(&[2.0, 2.0]));
        assert_eq!(w.grad().unwrap(), arr1(&[3.0, 3.0]));
        assert_eq!(b.grad().unwrap(), arr1(&[4.0]));
    }

    #[test]
    fn test_conv_transpose1d_overlapping_stride() {
        // kernel 3 stride 2: interior positions receive two contributions
        let x = Tensor::from_vec(vec![1.0, 1.0], false);
        let w = Tensor::from_vec(vec![1.0, 1.0, 1.0], false);
        let b = Tensor::from_vec(vec![0.0], false);
        let s = ConvTranspose1dSpec {
            rows: 1,
            in_ch: 1,
            in_len: 2,
            out_ch: 1,
            kernel: 3,
            stride: 2,
            groups: 1,
        };
        let y = conv_transpose1d(&x, &w, &b, s);
        assert_eq!(y.to_vec(), vec![1.0, 1.0, 2.0, 1.0, 1.0]);
    }
}
