//! Primitive trainable layers

use crate::autograd::ops::{
    batch_norm_eval, batch_norm_train, conv1d, conv_transpose1d, dropout, linear, prelu, relu,
    softplus, Conv1dSpec, ConvTranspose1dSpec, PadMode,
};
use crate::autograd::Tensor;
use crate::error::{Error, Result};
use ndarray::Array1;
use rand::Rng;

// Uniform(-bound, bound) init with bound = 1/sqrt(fan_in)
fn uniform_init(len: usize, fan_in: usize) -> Tensor {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    let mut rng = rand::thread_rng();
    let data: Vec<f32> = (0..len).map(|_| rng.gen_range(-bound..bound)).collect();
    Tensor::from_vec(data, true)
}

/// Fully-connected layer: `y = x Wᵀ + b`
pub struct Linear {
    pub w: Tensor,
    pub b: Tensor,
    in_f: usize,
    out_f: usize,
}

impl Linear {
    pub fn new(in_f: usize, out_f: usize) -> Self {
        Self {
            w: uniform_init(out_f * in_f, in_f),
            b: uniform_init(out_f, in_f),
            in_f,
            out_f,
        }
    }

    pub fn forward(&self, x: &Tensor, rows: usize) -> Tensor {
        linear(x, &self.w, &self.b, rows, self.in_f, self.out_f)
    }

    pub fn named_params(&self, prefix: &str) -> Vec<(String, Tensor)> {
        vec![
            (format!("{prefix}.weight"), self.w.clone()),
            (format!("{prefix}.bias"), self.b.clone()),
        ]
    }
}

/// Grouped strided 1-D convolution layer
pub struct Conv1d {
    pub w: Tensor,
    pub b: Tensor,
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    pad_mode: PadMode,
    groups: usize,
}

impl Conv1d {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_ch: usize,
        out_ch: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        pad_mode: PadMode,
        groups: usize,
    ) -> Result<Self> {
        if in_ch % groups != 0 || out_ch % groups != 0 {
            return Err(Error::Shape(format!(
                "conv1d channels ({in_ch} -> {out_ch}) not divisible by {groups} groups"
            )));
        }
        let icpg = in_ch / groups;
        Ok(Self {
            w: uniform_init(out_ch * icpg * kernel, icpg * kernel),
            b: uniform_init(out_ch, icpg * kernel),
            in_ch,
            out_ch,
            kernel,
            stride,
            padding,
            pad_mode,
            groups,
        })
    }

    pub fn out_len(&self, in_len: usize) -> usize {
        (in_len + 2 * self.padding - self.kernel) / self.stride + 1
    }

    pub fn forward(&self, x: &Tensor, rows: usize, in_len: usize) -> Tensor {
        conv1d(
            x,
            &self.w,
            &self.b,
            Conv1dSpec {
                rows,
                in_ch: self.in_ch,
                in_len,
                out_ch: self.out_ch,
                kernel: self.kernel,
                stride: self.stride,
                groups: self.groups,
                padding: self.padding,
                pad_mode: self.pad_mode,
            },
        )
    }

    pub fn named_params(&self, prefix: &str) -> Vec<(String, Tensor)> {
        vec![
            (format!("{prefix}.weight"), self.w.clone()),
            (format!("{prefix}.bias"), self.b.clone()),
        ]
    }
}

/// Grouped transposed 1-D convolution layer
pub struct ConvTranspose1d {
    pub w: Tensor,
    pub b: Tensor,
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    stride: usize,
    groups: usize,
}

impl ConvTranspose1d {
    pub fn new(
        in_ch: usize,
        out_ch: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
    ) -> Result<Self> {
        if in_ch % groups != 0 || out_ch % groups != 0 {
            return Err(Error::Shape(format!(
                "conv_transpose1d channels ({in_ch} -> {out_ch}) not divisible by {groups} groups"
            )));
        }
        let ocpg = out_ch / groups;
        Ok(Self {
            w: uniform_init(in_ch * ocpg * kernel, (in_ch / groups) * kernel),
            b: uniform_init(out_ch, (in_ch / groups) * kernel),
            in_ch,
            out_ch,
            kernel,
            stride,
            groups,
        })
    }

    pub fn out_len(&self, in_len: usize) -> usize {
        (in_len - 1) * self.stride + self.kernel
    }

    pub fn forward(&self, x: &Tensor, rows: usize, in_len: usize) -> Tensor {
        conv_transpose1d(
            x,
            &self.w,
            &self.b,
            ConvTranspose1dSpec {
                rows,
                in_ch: self.in_ch,
                in_len,
                out_ch: self.out_ch,
                kernel: self.kernel,
                stride: self.stride,
                groups: self.groups,
            },
        )
    }

    pub fn named_params(&self, prefix: &str) -> Vec<(String, Tensor)> {
        vec![
            (format!("{prefix}.weight"), self.w.clone()),
            (format!("{prefix}.bias"), self.b.clone()),
        ]
    }
}

/// Non-affine batch normalization with running statistics.
///
/// Running mean/var are grad-free tensors so checkpoints capture them; the
/// optimizer skips them naturally since they never receive gradients.
pub struct BatchNorm1d {
    features: usize,
    running_mean: Tensor,
    running_var: Tensor,
    momentum: f32,
    eps: f32,
}

impl BatchNorm1d {
    pub fn new(features: usize) -> Self {
        Self {
            features,
            running_mean: Tensor::zeros(features, false),
            running_var: Tensor::new(Array1::ones(features), false),
            momentum: 0.1,
            eps: 1e-5,
        }
    }

    pub fn forward(&mut self, x: &Tensor, rows: usize, ch_len: usize, training: bool) -> Tensor {
        if training {
            let (out, mean, var) = batch_norm_train(x, rows, self.features, ch_len, self.eps);
            let n = (rows * ch_len) as f32;
            let unbias = if n > 1.0 { n / (n - 1.0) } else { 1.0 };
            {
                let mut rm = self.running_mean.data_mut();
                let mut rv = self.running_var.data_mut();
                for c in 0..self.features {
                    rm[c] = (1.0 - self.momentum) * rm[c] + self.momentum * mean[c];
                    rv[c] = (1.0 - self.momentum) * rv[c] + self.momentum * var[c] * unbias;
                }
            }
            out
        } else {
            batch_norm_eval(
                x,
                rows,
                self.features,
                ch_len,
                &self.running_mean.to_array(),
                &self.running_var.to_array(),
                self.eps,
            )
        }
    }

    pub fn named_params(&self, prefix: &str) -> Vec<(String, Tensor)> {
        vec![
            (format!("{prefix}.running_mean"), self.running_mean.clone()),
            (format!("{prefix}.running_var"), self.running_var.clone()),
        ]
    }
}

/// Parametric ReLU with one learned slope per channel (init 0.01)
pub struct PReLU {
    pub alpha: Tensor,
}

impl PReLU {
    pub fn new(channels: usize) -> Self {
        Self {
            alpha: Tensor::new(Array1::from_elem(channels, 0.01), true),
        }
    }

    /// `seg_len` is the per-channel run length of the input layout
    pub fn forward(&self, x: &Tensor, seg_len: usize) -> Tensor {
        prelu(x, &self.alpha, seg_len)
    }

    pub fn named_params(&self, prefix: &str) -> Vec<(String, Tensor)> {
        vec![(format!("{prefix}.alpha"), self.alpha.clone())]
    }
}

/// Inverted dropout layer
pub struct Dropout {
    p: f32,
}

impl Dropout {
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    pub fn forward(&self, x: &Tensor, training: bool) -> Tensor {
        dropout(x, self.p, training)
    }
}

/// Final decoder nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    ReLu,
    Softplus,
}

impl Activation {
    /// Parse the configured name; unknown names are a fatal config error
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "ReLu" => Ok(Activation::ReLu),
            "Softplus" => Ok(Activation::Softplus),
            other => Err(Error::Config(format!(
                "unknown activation function \"{other}\", expected \"ReLu\" or \"Softplus\""
            ))),
        }
    }

    pub fn apply(&self, x: &Tensor) -> Tensor {
        match self {
            Activation::ReLu => relu(x),
            Activation::Softplus => softplus(x, 2.0),
        }
    }
}
