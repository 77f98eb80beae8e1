//! Residual-excitation building blocks and the fixed smoothing operator

use super::layers::{BatchNorm1d, Conv1d, ConvTranspose1d, Dropout, Linear, PReLU};
use crate::autograd::ops::{add, conv1d, Conv1dSpec, PadMode};
use crate::autograd::Tensor;
use crate::error::{Error, Result};
use ndarray::Array1;

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Downsampling residual block with a squeeze-excitation branch.
///
/// Main path compounds two strided convolutions to map `(in_ch, in_len)` to
/// `(out_ch, out_len)` exactly; the stride split is an integer-arithmetic
/// invariant checked at construction.
pub struct EncodingBlock {
    bn1: Option<BatchNorm1d>,
    conv1: Conv1d,
    relu1: PReLU,
    bn2: BatchNorm1d,
    conv2: Conv1d,
    relu2: PReLU,
    conv_short: Option<(Conv1d, PReLU)>,
    dropout_1: Option<Dropout>,
    fc1: Linear,
    relu_excit_1: PReLU,
    fc2: Linear,
    relu_excit_2: PReLU,
    excit_align: Option<(BatchNorm1d, Conv1d, PReLU)>,
    in_ch: usize,
    in_len: usize,
    mid_len: usize,
    out_len: usize,
    excitation: usize,
}

impl EncodingBlock {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_ch: usize,
        out_ch: usize,
        in_len: usize,
        out_len: usize,
        kernel: usize,
        stride: usize,
        excitation: usize,
        dropout_rate: f32,
    ) -> Result<Self> {
        if out_len == 0 || stride == 0 || in_len % (out_len * stride) != 0 {
            return Err(Error::Shape(format!(
                "encoding block: in_len {in_len} not divisible by out_len {out_len} * stride {stride}"
            )));
        }
        let s1 = in_len / (out_len * stride);
        let pad = (kernel - 1) / 2;
        let conv1 = Conv1d::new(in_ch, out_ch, kernel, s1, pad, PadMode::Replicate, 1)?;
        let mid_len = conv1.out_len(in_len);
        let conv2 = Conv1d::new(out_ch, out_ch, kernel, stride, pad, PadMode::Zero, 1)?;
        if conv2.out_len(mid_len) != out_len {
            return Err(Error::Shape(format!(
                "encoding block: convolutions compound {in_len} -> {} instead of {out_len}",
                conv2.out_len(mid_len)
            )));
        }
        let conv_short = if stride > 1 || in_ch != out_ch {
            if in_len % out_len != 0 {
                return Err(Error::Shape(format!(
                    "encoding block shortcut: in_len {in_len} not divisible by out_len {out_len}"
                )));
            }
            let r = in_len / out_len;
            Some((
                Conv1d::new(in_ch, out_ch, r, r, 0, PadMode::Zero, gcd(in_ch, out_ch))?,
                PReLU::new(out_ch),
            ))
        } else {
            None
        };
        let excit_align = if in_ch != out_ch {
            Some((
                BatchNorm1d::new(in_ch),
                Conv1d::new(in_ch, out_ch, 1, 1, 0, PadMode::Zero, gcd(in_ch, out_ch))?,
                PReLU::new(out_ch),
            ))
        } else {
            None
        };
        Ok(Self {
            bn1: (in_ch > 1).then(|| BatchNorm1d::new(in_ch)),
            conv1,
            relu1: PReLU::new(out_ch),
            bn2: BatchNorm1d::new(out_ch),
            conv2,
            relu2: PReLU::new(out_ch),
            conv_short,
            dropout_1: (in_len > 10).then(|| Dropout::new(dropout_rate)),
            fc1: Linear::new(in_len, excitation),
            relu_excit_1: PReLU::new(in_ch),
            fc2: Linear::new(excitation, out_len),
            relu_excit_2: PReLU::new(in_ch),
            excit_align,
            in_ch,
            in_len,
            mid_len,
            out_len,
            excitation,
        })
    }

    pub fn out_len(&self) -> usize {
        self.out_len
    }

    pub fn forward(&mut self, x: &Tensor, rows: usize, training: bool) -> Tensor {
        let out = match &mut self.bn1 {
            Some(bn) => bn.forward(x, rows, self.in_len, training),
            None => x.clone(),
        };
        let residual = out.clone();

        let out = self.conv1.forward(&out, rows, self.in_len);
        let out = self.relu1.forward(&out, self.mid_len);
        let out = self.bn2.forward(&out, rows, self.mid_len, training);
        let out = self.conv2.forward(&out, rows, self.mid_len);
        let out = self.relu2.forward(&out, self.out_len);

        let res = match &self.conv_short {
            Some((conv, act)) => {
                let r = conv.forward(&residual, rows, self.in_len);
                act.forward(&r, self.out_len)
            }
            None => residual.clone(),
        };

        let excit = match &self.dropout_1 {
            Some(d) => d.forward(&residual, training),
            None => residual,
        };
        let excit = self.fc1.forward(&excit, rows * self.in_ch);
        let excit = self.relu_excit_1.forward(&excit, self.excitation);
        let excit = self.fc2.forward(&excit, rows * self.in_ch);
        let excit = self.relu_excit_2.forward(&excit, self.out_len);
        let excit = match &mut self.excit_align {
            Some((bn, conv, act)) => {
                let e = bn.forward(&excit, rows, self.out_len, training);
                let e = conv.forward(&e, rows, self.out_len);
                act.forward(&e, self.out_len)
            }
            None => excit,
        };

        add(&add(&out, &res), &excit)
    }

    pub fn named_params(&self, prefix: &str) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        if let Some(bn) = &self.bn1 {
            out.extend(bn.named_params(&format!("{prefix}.bn1")));
        }
        out.extend(self.conv1.named_params(&format!("{prefix}.conv1")));
        out.extend(self.relu1.named_params(&format!("{prefix}.relu1")));
        out.extend(self.bn2.named_params(&format!("{prefix}.bn2")));
        out.extend(self.conv2.named_params(&format!("{prefix}.conv2")));
        out.extend(self.relu2.named_params(&format!("{prefix}.relu2")));
        if let Some((conv, act)) = &self.conv_short {
            out.extend(conv.named_params(&format!("{prefix}.conv_short")));
            out.extend(act.named_params(&format!("{prefix}.relu_short")));
        }
        out.extend(self.fc1.named_params(&format!("{prefix}.fc1")));
        out.extend(self.relu_excit_1.named_params(&format!("{prefix}.relu_excit_1")));
        out.extend(self.fc2.named_params(&format!("{prefix}.fc2")));
        out.extend(self.relu_excit_2.named_params(&format!("{prefix}.relu_excit_2")));
        if let Some((bn, conv, act)) = &self.excit_align {
            out.extend(bn.named_params(&format!("{prefix}.bn_excit")));
            out.extend(conv.named_params(&format!("{prefix}.conv_excit")));
            out.extend(act.named_params(&format!("{prefix}.relu_excit_3")));
        }
        out
    }
}

/// Upsampling residual block mirroring [`EncodingBlock`] with transposed
/// convolutions. `out_len` defaults to `4 * in_len`.
pub struct DecodingBlock {
    bn1: Option<BatchNorm1d>,
    conv1: ConvTranspose1d,
    relu1: PReLU,
    bn2: BatchNorm1d,
    conv2: ConvTranspose1d,
    relu2: PReLU,
    conv_short: ConvTranspose1d,
    relu_short: PReLU,
    dropout_1: Option<Dropout>,
    fc1: Linear,
    relu_excit_1: PReLU,
    fc2: Linear,
    relu_excit_2: PReLU,
    excit_align: Option<(BatchNorm1d, Conv1d, PReLU)>,
    in_ch: usize,
    in_len: usize,
    mid_len: usize,
    out_len: usize,
    excitation: usize,
}

impl DecodingBlock {
    pub fn new(
        in_ch: usize,
        out_ch: usize,
        in_len: usize,
        out_len: Option<usize>,
        excitation: usize,
        dropout_rate: f32,
    ) -> Result<Self> {
        let out_len = out_len.unwrap_or(in_len * 4);
        if out_len % (in_len * 2) != 0 || out_len % in_len != 0 {
            return Err(Error::Shape(format!(
                "decoding block: out_len {out_len} not divisible by 2 * in_len {in_len}"
            )));
        }
        let q = out_len / (in_len * 2);
        let r = out_len / in_len;
        let excit_align = if in_ch != out_ch {
            Some((
                BatchNorm1d::new(in_ch),
                Conv1d::new(in_ch, out_ch, 1, 1, 0, PadMode::Zero, gcd(in_ch, out_ch))?,
                PReLU::new(out_ch),
            ))
        } else {
            None
        };
        Ok(Self {
            bn1: (in_len > 1).then(|| BatchNorm1d::new(in_ch)),
            conv1: ConvTranspose1d::new(in_ch, out_ch, 2, 2, 1)?,
            relu1: PReLU::new(out_ch),
            bn2: BatchNorm1d::new(out_ch),
            conv2: ConvTranspose1d::new(out_ch, out_ch, q, q, 1)?,
            relu2: PReLU::new(out_ch),
            conv_short: ConvTranspose1d::new(in_ch, out_ch, r, r, gcd(in_ch, out_ch))?,
            relu_short: PReLU::new(out_ch),
            dropout_1: (in_len > 10).then(|| Dropout::new(dropout_rate)),
            fc1: Linear::new(in_len, excitation),
            relu_excit_1: PReLU::new(in_ch),
            fc2: Linear::new(excitation, out_len),
            relu_excit_2: PReLU::new(in_ch),
            excit_align,
            in_ch,
            in_len,
            mid_len: in_len * 2,
            out_len,
            excitation,
        })
    }

    pub fn out_len(&self) -> usize {
        self.out_len
    }

    pub fn forward(&mut self, x: &Tensor, rows: usize, training: bool) -> Tensor {
        let out = match &mut self.bn1 {
            Some(bn) => bn.forward(x, rows, self.in_len, training),
            None => x.clone(),
        };
        let residual = out.clone();

        let out = self.conv1.forward(&out, rows, self.in_len);
        let out = self.relu1.forward(&out, self.mid_len);
        let out = self.bn2.forward(&out, rows, self.mid_len, training);
        let out = self.conv2.forward(&out, rows, self.mid_len);
        let out = self.relu2.forward(&out, self.out_len);

        let res = self.conv_short.forward(&residual, rows, self.in_len);
        let res = self.relu_short.forward(&res, self.out_len);

        let excit = match &self.dropout_1 {
            Some(d) => d.forward(&residual, training),
            None => residual,
        };
        let excit = self.fc1.forward(&excit, rows * self.in_ch);
        let excit = self.relu_excit_1.forward(&excit, self.excitation);
        let excit = self.fc2.forward(&excit, rows * self.in_ch);
        let excit = self.relu_excit_2.forward(&excit, self.out_len);
        let excit = match &mut self.excit_align {
            Some((bn, conv, act)) => {
                let e = bn.forward(&excit, rows, self.out_len, training);
                let e = conv.forward(&e, rows, self.out_len);
                act.forward(&e, self.out_len)
            }
            None => excit,
        };

        add(&add(&out, &res), &excit)
    }

    pub fn named_params(&self, prefix: &str) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        if let Some(bn) = &self.bn1 {
            out.extend(bn.named_params(&format!("{prefix}.bn1")));
        }
        out.extend(self.conv1.named_params(&format!("{prefix}.conv1")));
        out.extend(self.relu1.named_params(&format!("{prefix}.relu1")));
        out.extend(self.bn2.named_params(&format!("{prefix}.bn2")));
        out.extend(self.conv2.named_params(&format!("{prefix}.conv2")));
        out.extend(self.relu2.named_params(&format!("{prefix}.relu2")));
        out.extend(self.conv_short.named_params(&format!("{prefix}.conv_short")));
        out.extend(self.relu_short.named_params(&format!("{prefix}.relu_short")));
        out.extend(self.fc1.named_params(&format!("{prefix}.fc1")));
        out.extend(self.relu_excit_1.named_params(&format!("{prefix}.relu_excit_1")));
        out.extend(self.fc2.named_params(&format!("{prefix}.fc2")));
        out.extend(self.relu_excit_2.named_params(&format!("{prefix}.relu_excit_2")));
        if let Some((bn, conv, act)) = &self.excit_align {
            out.extend(bn.named_params(&format!("{prefix}.bn_excit")));
            out.extend(conv.named_params(&format!("{prefix}.conv_excit")));
            out.extend(act.named_params(&format!("{prefix}.relu_excit_3")));
        }
        out
    }
}

/// Fixed depthwise Gaussian smoothing.
///
/// The kernel is a normalized discretized Gaussian; it never receives
/// gradients. Input edges are replicate-padded so output length equals
/// input length.
pub struct GaussianSmoothing {
    weight: Tensor,
    bias: Tensor,
    kernel: Array1<f32>,
    channels: usize,
    kernel_size: usize,
}

impl GaussianSmoothing {
    pub fn new(channels: usize, kernel_size: usize, sigma: f32) -> Self {
        let mean = (kernel_size - 1) as f32 / 2.0;
        let mut kernel = Array1::from_iter((0..kernel_size).map(|i| {
            let d = (i as f32 - mean) / sigma;
            (-d * d / 2.0).exp()
        }));
        let total = kernel.sum();
        kernel.mapv_inplace(|v| v / total);
        let mut w = Array1::zeros(channels * kernel_size);
        for c in 0..channels {
            for j in 0..kernel_size {
                w[c * kernel_size + j] = kernel[j];
            }
        }
        Self {
            weight: Tensor::new(w, false),
            bias: Tensor::zeros(channels, false),
            kernel,
            channels,
            kernel_size,
        }
    }

    /// Normalized kernel values
    pub fn kernel(&self) -> &Array1<f32> {
        &self.kernel
    }

    pub fn forward(&self, x: &Tensor, rows: usize, len: usize) -> Tensor {
        conv1d(
            x,
            &self.weight,
            &self.bias,
            Conv1dSpec {
                rows,
                in_ch: self.channels,
                in_len: len,
                out_ch: self.channels,
                kernel: self.kernel_size,
                stride: 1,
                groups: self.channels,
                padding: (self.kernel_size - 1) / 2,
                pad_mode: PadMode::Replicate,
            },
        )
    }
}
