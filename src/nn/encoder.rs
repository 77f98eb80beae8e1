//! Encoder variants: spectrum → (style vector, class log-probabilities)

use super::blocks::EncodingBlock;
use super::layers::{BatchNorm1d, Dropout, Linear, PReLU};
use super::Network;
use crate::autograd::ops::{add, log_softmax, relu, softplus};
use crate::autograd::Tensor;
use crate::error::{Error, Result};

/// Common contract of all encoder variants
pub trait EncoderNet: Network {
    /// Map a `(rows, dim_in)` spectrum batch to style vectors `(rows, nstyle)`
    /// and class log-probabilities `(rows, nclasses)`
    fn forward(&mut self, spec: &Tensor, rows: usize, training: bool) -> (Tensor, Tensor);
}

// Kernel size and excitation width by block input length, following the
// schedule of the fixed-depth stacks (long inputs get wide kernels).
fn conv_schedule(in_len: usize) -> (usize, usize) {
    if in_len >= 128 {
        (11, 4)
    } else if in_len >= 32 {
        (7, 2)
    } else {
        (5, 1)
    }
}

const CONV_CHANNELS: usize = 4;
const CONV_TAIL_LEN: usize = 8;
const FLAT_FEATURES: usize = CONV_CHANNELS * CONV_TAIL_LEN;

fn style_class_heads(nstyle: usize, nclasses: usize, features: usize) -> (Linear, BatchNorm1d, Linear) {
    (
        Linear::new(features, nstyle),
        BatchNorm1d::new(nstyle),
        Linear::new(features, nclasses),
    )
}

/// Deep convolutional encoder: halving blocks from `dim_in` down to length 8
pub struct Encoder {
    blocks: Vec<EncodingBlock>,
    lin3: Linear,
    bn_style: BatchNorm1d,
    lin_cls: Linear,
    nclasses: usize,
}

impl Encoder {
    pub fn new(nclasses: usize, nstyle: usize, dim_in: usize, dropout_rate: f32) -> Result<Self> {
        let mut blocks = Vec::new();
        let mut len = dim_in;
        let mut in_ch = 1;
        while len > CONV_TAIL_LEN {
            if len % 2 != 0 {
                return Err(Error::Shape(format!(
                    "encoder input length {dim_in} must be 8 * 2^n"
                )));
            }
            let (kernel, excitation) = conv_schedule(len);
            blocks.push(EncodingBlock::new(
                in_ch,
                CONV_CHANNELS,
                len,
                len / 2,
                kernel,
                2,
                excitation,
                dropout_rate,
            )?);
            in_ch = CONV_CHANNELS;
            len /= 2;
        }
        if len != CONV_TAIL_LEN || blocks.is_empty() {
            return Err(Error::Shape(format!(
                "encoder input length {dim_in} must be 8 * 2^n with n >= 1"
            )));
        }
        let (lin3, bn_style, lin_cls) = style_class_heads(nstyle, nclasses, FLAT_FEATURES);
        Ok(Self {
            blocks,
            lin3,
            bn_style,
            lin_cls,
            nclasses,
        })
    }
}

impl EncoderNet for Encoder {
    fn forward(&mut self, spec: &Tensor, rows: usize, training: bool) -> (Tensor, Tensor) {
        let mut h = spec.clone();
        for block in &mut self.blocks {
            h = block.forward(&h, rows, training);
        }
        // (rows, 4, 8) flattens to (rows, 32) in place
        let z = self.lin3.forward(&h, rows);
        let z = self.bn_style.forward(&z, rows, 1, training);
        let y = self.lin_cls.forward(&h, rows);
        let y = log_softmax(&y, rows, self.nclasses);
        (z, y)
    }
}

impl Network for Encoder {
    fn named_params(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        for (i, block) in self.blocks.iter().enumerate() {
            out.extend(block.named_params(&format!("main.{i}")));
        }
        out.extend(self.lin3.named_params("lin3"));
        out.extend(self.bn_style.named_params("bn_style"));
        out.extend(self.lin_cls.named_params("lin_cls"));
        out
    }
}

/// Shallow convolutional encoder: quartering blocks, then one halving block
pub struct CompactEncoder {
    blocks: Vec<EncodingBlock>,
    lin3: Linear,
    bn_style: BatchNorm1d,
    lin_cls: Linear,
    nclasses: usize,
}

impl CompactEncoder {
    pub fn new(nclasses: usize, nstyle: usize, dim_in: usize, dropout_rate: f32) -> Result<Self> {
        let mut blocks = Vec::new();
        let mut len = dim_in;
        let mut in_ch = 1;
        while len / 4 >= 2 * CONV_TAIL_LEN && len % 4 == 0 {
            let (kernel, excitation) = conv_schedule(len);
            blocks.push(EncodingBlock::new(
                in_ch,
                CONV_CHANNELS,
                len,
                len / 4,
                kernel,
                2,
                excitation,
                dropout_rate,
            )?);
            in_ch = CONV_CHANNELS;
            len /= 4;
        }
        if len <= CONV_TAIL_LEN || len % CONV_TAIL_LEN != 0 {
            return Err(Error::Shape(format!(
                "compact encoder cannot reduce input length {dim_in} to {CONV_TAIL_LEN}"
            )));
        }
        let (kernel, excitation) = conv_schedule(len);
        blocks.push(EncodingBlock::new(
            in_ch,
            CONV_CHANNELS,
            len,
            CONV_TAIL_LEN,
            kernel,
            2,
            excitation,
            dropout_rate,
        )?);
        let (lin3, bn_style, lin_cls) = style_class_heads(nstyle, nclasses, FLAT_FEATURES);
        Ok(Self {
            blocks,
            lin3,
            bn_style,
            lin_cls,
            nclasses,
        })
    }
}

impl EncoderNet for CompactEncoder {
    fn forward(&mut self, spec: &Tensor, rows: usize, training: bool) -> (Tensor, Tensor) {
        let mut h = spec.clone();
        for block in &mut self.blocks {
            h = block.forward(&h, rows, training);
        }
        let z = self.lin3.forward(&h, rows);
        let z = self.bn_style.forward(&z, rows, 1, training);
        let y = self.lin_cls.forward(&h, rows);
        let y = log_softmax(&y, rows, self.nclasses);
        (z, y)
    }
}

impl Network for CompactEncoder {
    fn named_params(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        for (i, block) in self.blocks.iter().enumerate() {
            out.extend(block.named_params(&format!("main.{i}")));
        }
        out.extend(self.lin3.named_params("lin3"));
        out.extend(self.bn_style.named_params("bn_style"));
        out.extend(self.lin_cls.named_params("lin_cls"));
        out
    }
}

// One hidden stage of the fully-connected stacks: built explicitly from the
// depth parameter rather than by reflective assembly.
struct FcStage {
    lin: Linear,
    act: PReLU,
    bn: BatchNorm1d,
    drop: Dropout,
}

impl FcStage {
    fn new(in_f: usize, out_f: usize, dropout_rate: f32) -> Self {
        Self {
            lin: Linear::new(in_f, out_f),
            act: PReLU::new(out_f),
            bn: BatchNorm1d::new(out_f),
            drop: Dropout::new(dropout_rate),
        }
    }

    fn forward(&mut self, x: &Tensor, rows: usize, training: bool) -> Tensor {
        let h = self.lin.forward(x, rows);
        let h = self.act.forward(&h, 1);
        let h = self.bn.forward(&h, rows, 1, training);
        self.drop.forward(&h, training)
    }

    fn named_params(&self, prefix: &str) -> Vec<(String, Tensor)> {
        let mut out = self.lin.named_params(&format!("{prefix}.lin"));
        out.extend(self.act.named_params(&format!("{prefix}.act")));
        out.extend(self.bn.named_params(&format!("{prefix}.bn")));
        out
    }
}

/// Fully-connected encoder of configurable depth
pub struct FcEncoder {
    stages: Vec<FcStage>,
    lin_style: Linear,
    bn_style: BatchNorm1d,
    lin_cls: Linear,
    nclasses: usize,
}

impl FcEncoder {
    pub fn new(
        nclasses: usize,
        nstyle: usize,
        dim_in: usize,
        n_layers: usize,
        hidden_size: usize,
        dropout_rate: f32,
    ) -> Result<Self> {
        if n_layers < 2 {
            return Err(Error::Config(format!(
                "fc encoder needs at least 2 layers, got {n_layers}"
            )));
        }
        let mut stages = vec![FcStage::new(dim_in, hidden_size, dropout_rate)];
        for _ in 0..n_layers - 2 {
            stages.push(FcStage::new(hidden_size, hidden_size, dropout_rate));
        }
        let (lin_style, bn_style, lin_cls) = style_class_heads(nstyle, nclasses, hidden_size);
        Ok(Self {
            stages,
            lin_style,
            bn_style,
            lin_cls,
            nclasses,
        })
    }
}

impl EncoderNet for FcEncoder {
    fn forward(&mut self, spec: &Tensor, rows: usize, training: bool) -> (Tensor, Tensor) {
        let mut h = spec.clone();
        for stage in &mut self.stages {
            h = stage.forward(&h, rows, training);
        }
        let z = self.lin_style.forward(&h, rows);
        let z = self.bn_style.forward(&z, rows, 1, training);
        let y = self.lin_cls.forward(&h, rows);
        let y = log_softmax(&y, rows, self.nclasses);
        (z, y)
    }
}

impl Network for FcEncoder {
    fn named_params(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        for (i, stage) in self.stages.iter().enumerate() {
            out.extend(stage.named_params(&format!("main.{i}")));
        }
        out.extend(self.lin_style.named_params("lin_style"));
        out.extend(self.bn_style.named_params("bn_style"));
        out.extend(self.lin_cls.named_params("lin_cls"));
        out
    }
}

/// Encoder for short feature vectors (no convolutions)
pub struct QvecEncoder {
    main_1: Linear,
    main_drop: Dropout,
    main_2: Linear,
    main_bn2: BatchNorm1d,
    main_3: Linear,
    main_bn3: BatchNorm1d,
    main_4: Linear,
    main_bn4: BatchNorm1d,
    short_1: Linear,
    short_drop: Dropout,
    short_2: Linear,
    short_bn: BatchNorm1d,
    cls_1: Linear,
    cls_2: Linear,
    nclasses: usize,
}

impl QvecEncoder {
    pub fn new(nclasses: usize, nstyle: usize, dim_in: usize, dropout_rate: f32) -> Result<Self> {
        Ok(Self {
            main_1: Linear::new(dim_in, 8),
            main_drop: Dropout::new(dropout_rate),
            main_2: Linear::new(8, 6),
            main_bn2: BatchNorm1d::new(6),
            main_3: Linear::new(6, 4),
            main_bn3: BatchNorm1d::new(4),
            main_4: Linear::new(4, nstyle),
            main_bn4: BatchNorm1d::new(nstyle),
            short_1: Linear::new(dim_in, 8),
            short_drop: Dropout::new(dropout_rate),
            short_2: Linear::new(8, nstyle),
            short_bn: BatchNorm1d::new(nstyle),
            cls_1: Linear::new(dim_in, 8),
            cls_2: Linear::new(8, nclasses),
            nclasses,
        })
    }
}

impl EncoderNet for QvecEncoder {
    fn forward(&mut self, spec: &Tensor, rows: usize, training: bool) -> (Tensor, Tensor) {
        let h = relu(&self.main_1.forward(spec, rows));
        let h = self.main_drop.forward(&h, training);
        let h = relu(&self.main_2.forward(&h, rows));
        let h = self.main_bn2.forward(&h, rows, 1, training);
        let h = softplus(&self.main_3.forward(&h, rows), 2.0);
        let h = self.main_bn3.forward(&h, rows, 1, training);
        let h = self.main_4.forward(&h, rows);
        let main = self.main_bn4.forward(&h, rows, 1, training);

        let s = relu(&self.short_1.forward(spec, rows));
        let s = self.short_drop.forward(&s, training);
        let s = self.short_2.forward(&s, rows);
        let short = self.short_bn.forward(&s, rows, 1, training);

        let z = add(&main, &short);
        let y = relu(&self.cls_1.forward(spec, rows));
        let y = self.cls_2.forward(&y, rows);
        let y = log_softmax(&y, rows, self.nclasses);
        (z, y)
    }
}

impl Network for QvecEncoder {
    fn named_params(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        out.extend(self.main_1.named_params("main.0"));
        out.extend(self.main_2.named_params("main.1"));
        out.extend(self.main_bn2.named_params("main.1.bn"));
        out.extend(self.main_3.named_params("main.2"));
        out.extend(self.main_bn3.named_params("main.2.bn"));
        out.extend(self.main_4.named_params("main.3"));
        out.extend(self.main_bn4.named_params("main.3.bn"));
        out.extend(self.short_1.named_params("short_cut.0"));
        out.extend(self.short_2.named_params("short_cut.1"));
        out.extend(self.short_bn.named_params("short_cut.1.bn"));
        out.extend(self.cls_1.named_params("cls.0"));
        out.extend(self.cls_2.named_params("cls.1"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_encoder_output_shapes() {
        let mut enc = Encoder::new(3, 2, 256, 0.2).unwrap();
        let x = Tensor::zeros(4 * 256, false);
        let (z, y) = enc.forward(&x, 4, false);
        assert_eq!(z.len(), 4 * 2);
        assert_eq!(y.len(), 4 * 3);
    }

    #[test]
    fn test_encoder_small_input() {
        let mut enc = Encoder::new(3, 2, 32, 0.2).unwrap();
        let x = Tensor::zeros(2 * 32, false);
        let (z, y) = enc.forward(&x, 2, false);
        assert_eq!(z.len(), 4);
        assert_eq!(y.len(), 6);
    }

    #[test]
    fn test_encoder_rejects_odd_length() {
        assert!(Encoder::new(3, 2, 100, 0.2).is_err());
        assert!(Encoder::new(3, 2, 8, 0.2).is_err());
    }

    #[test]
    fn test_compact_encoder_shapes() {
        let mut enc = CompactEncoder::new(3, 2, 256, 0.2).unwrap();
        let x = Tensor::zeros(2 * 256, false);
        let (z, y) = enc.forward(&x, 2, false);
        assert_eq!(z.len(), 4);
        assert_eq!(y.len(), 6);
    }

    #[test]
    fn test_class_head_is_log_probs() {
        let mut enc = FcEncoder::new(3, 2, 16, 3, 8, 0.0).unwrap();
        let x = Tensor::randn(5 * 16, 1.0, false);
        let (_, y) = enc.forward(&x, 5, false);
        for r in 0..5 {
            let s: f32 = (0..3).map(|c| y.data()[r * 3 + c].exp()).sum();
            assert_abs_diff_eq!(s, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_qvec_encoder_shapes() {
        let mut enc = QvecEncoder::new(3, 2, 12, 0.2).unwrap();
        let x = Tensor::zeros(6 * 12, false);
        let (z, y) = enc.forward(&x, 6, false);
        assert_eq!(z.len(), 12);
        assert_eq!(y.len(), 18);
    }

    #[test]
    fn test_named_params_unique() {
        let enc = Encoder::new(3, 2, 64, 0.2).unwrap();
        let names: Vec<String> = enc.named_params().into_iter().map(|(n, _)| n).collect();
        let mut dedup = names.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(names.len(), dedup.len());
    }
}
