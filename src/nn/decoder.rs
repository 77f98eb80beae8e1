//! Decoder variants: (style, class probabilities) → spectrum

use super::blocks::{DecodingBlock, EncodingBlock};
use super::layers::{Activation, BatchNorm1d, Conv1d, Dropout, Linear, PReLU};
use super::Network;
use crate::autograd::ops::{add, concat_rows, relu, PadMode};
use crate::autograd::Tensor;
use crate::error::{Error, Result};

/// Common contract of all decoder variants
pub trait DecoderNet: Network {
    /// Map style vectors `(rows, nstyle)` and class probabilities
    /// `(rows, nclasses)` to spectra `(rows, dim_out)`
    fn forward(&mut self, style: &Tensor, class_probs: &Tensor, rows: usize, training: bool)
        -> Tensor;

    fn nstyle(&self) -> usize;

    fn nclasses(&self) -> usize;
}

// Upsampling length chain: quadruple from 1 while staying under dim_out,
// then one final jump to dim_out. The final jump must still satisfy the
// decoding block's 2*in_len divisibility invariant.
fn decode_chain(dim_out: usize, step: usize) -> Result<Vec<usize>> {
    let mut lens = vec![1usize];
    while lens.last().unwrap() * step < dim_out {
        lens.push(lens.last().unwrap() * step);
    }
    let last = *lens.last().unwrap();
    if last * 2 > dim_out || dim_out % (last * 2) != 0 {
        return Err(Error::Shape(format!(
            "decoder cannot expand latent length {last} to output length {dim_out}"
        )));
    }
    lens.push(dim_out);
    Ok(lens)
}

// Channel schedule along the decoding chain: widen to 8 first, then settle
// at 4 for the refinement stage.
fn decode_channels(in_ch: usize, n_blocks: usize) -> Vec<usize> {
    let mut chans = vec![in_ch, 8];
    while chans.len() < n_blocks + 1 {
        chans.push(4);
    }
    chans
}

fn excitation_for(out_len: usize) -> usize {
    if out_len >= 64 {
        4
    } else if out_len >= 8 {
        2
    } else {
        1
    }
}

/// Deep convolutional decoder: decoding blocks up to `dim_out`, then five
/// stride-1 refinement blocks tapering to two channels
pub struct Decoder {
    up: Vec<DecodingBlock>,
    refine: Vec<EncodingBlock>,
    bn_out: BatchNorm1d,
    conv_out: Conv1d,
    act: Activation,
    nstyle: usize,
    nclasses: usize,
    dim_out: usize,
}

impl Decoder {
    pub fn new(
        nclasses: usize,
        nstyle: usize,
        dim_out: usize,
        dropout_rate: f32,
        act: Activation,
    ) -> Result<Self> {
        let in_ch = nstyle + nclasses;
        let lens = decode_chain(dim_out, 4)?;
        let chans = decode_channels(in_ch, lens.len() - 1);
        let mut up = Vec::new();
        for i in 0..lens.len() - 1 {
            up.push(DecodingBlock::new(
                chans[i],
                chans[i + 1],
                lens[i],
                Some(lens[i + 1]),
                excitation_for(lens[i + 1]),
                dropout_rate,
            )?);
        }
        let tail_ch = *chans.last().unwrap();
        let refine_chans = [tail_ch, tail_ch, tail_ch, 2, 2, 2];
        let mut refine = Vec::new();
        for w in refine_chans.windows(2) {
            refine.push(EncodingBlock::new(
                w[0],
                w[1],
                dim_out,
                dim_out,
                11,
                1,
                2,
                dropout_rate,
            )?);
        }
        Ok(Self {
            up,
            refine,
            bn_out: BatchNorm1d::new(2),
            conv_out: Conv1d::new(2, 1, 1, 1, 0, PadMode::Zero, 1)?,
            act,
            nstyle,
            nclasses,
            dim_out,
        })
    }
}

impl DecoderNet for Decoder {
    fn forward(
        &mut self,
        style: &Tensor,
        class_probs: &Tensor,
        rows: usize,
        training: bool,
    ) -> Tensor {
        // latent channels at spatial length 1
        let mut h = concat_rows(style, class_probs, rows, self.nstyle, self.nclasses);
        for block in &mut self.up {
            h = block.forward(&h, rows, training);
        }
        for block in &mut self.refine {
            h = block.forward(&h, rows, training);
        }
        let h = self.bn_out.forward(&h, rows, self.dim_out, training);
        let h = self.conv_out.forward(&h, rows, self.dim_out);
        self.act.apply(&h)
    }

    fn nstyle(&self) -> usize {
        self.nstyle
    }

    fn nclasses(&self) -> usize {
        self.nclasses
    }
}

impl Network for Decoder {
    fn named_params(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        for (i, block) in self.up.iter().enumerate() {
            out.extend(block.named_params(&format!("up.{i}")));
        }
        for (i, block) in self.refine.iter().enumerate() {
            out.extend(block.named_params(&format!("refine.{i}")));
        }
        out.extend(self.bn_out.named_params("bn_out"));
        out.extend(self.conv_out.named_params("conv_out"));
        out
    }
}

/// Shallow convolutional decoder: octupling chain plus one refinement block
pub struct CompactDecoder {
    up: Vec<DecodingBlock>,
    refine: EncodingBlock,
    bn_out: BatchNorm1d,
    conv_out: Conv1d,
    act: Activation,
    nstyle: usize,
    nclasses: usize,
    dim_out: usize,
}

impl CompactDecoder {
    pub fn new(
        nclasses: usize,
        nstyle: usize,
        dim_out: usize,
        dropout_rate: f32,
        act: Activation,
    ) -> Result<Self> {
        let in_ch = nstyle + nclasses;
        let lens = decode_chain(dim_out, 8)?;
        let chans = decode_channels(in_ch, lens.len() - 1);
        let mut up = Vec::new();
        for i in 0..lens.len() - 1 {
            up.push(DecodingBlock::new(
                chans[i],
                chans[i + 1],
                lens[i],
                Some(lens[i + 1]),
                excitation_for(lens[i + 1]),
                dropout_rate,
            )?);
        }
        let tail_ch = *chans.last().unwrap();
        Ok(Self {
            up,
            refine: EncodingBlock::new(tail_ch, 4, dim_out, dim_out, 11, 1, 2, dropout_rate)?,
            bn_out: BatchNorm1d::new(4),
            conv_out: Conv1d::new(4, 1, 1, 1, 0, PadMode::Zero, 1)?,
            act,
            nstyle,
            nclasses,
            dim_out,
        })
    }
}

impl DecoderNet for CompactDecoder {
    fn forward(
        &mut self,
        style: &Tensor,
        class_probs: &Tensor,
        rows: usize,
        training: bool,
    ) -> Tensor {
        let mut h = concat_rows(style, class_probs, rows, self.nstyle, self.nclasses);
        for block in &mut self.up {
            h = block.forward(&h, rows, training);
        }
        let h = self.refine.forward(&h, rows, training);
        let h = self.bn_out.forward(&h, rows, self.dim_out, training);
        let h = self.conv_out.forward(&h, rows, self.dim_out);
        self.act.apply(&h)
    }

    fn nstyle(&self) -> usize {
        self.nstyle
    }

    fn nclasses(&self) -> usize {
        self.nclasses
    }
}

impl Network for CompactDecoder {
    fn named_params(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        for (i, block) in self.up.iter().enumerate() {
            out.extend(block.named_params(&format!("up.{i}")));
        }
        out.extend(self.refine.named_params("refine"));
        out.extend(self.bn_out.named_params("bn_out"));
        out.extend(self.conv_out.named_params("conv_out"));
        out
    }
}

// Hidden stage shared by the fully-connected decoder depths
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

/// Fully-connected decoder of configurable depth
pub struct FcDecoder {
    stages: Vec<FcStage>,
    lin_out: Linear,
    act: Activation,
    nstyle: usize,
    nclasses: usize,
}

impl FcDecoder {
    pub fn new(
        nclasses: usize,
        nstyle: usize,
        dim_out: usize,
        n_layers: usize,
        hidden_size: usize,
        dropout_rate: f32,
        act: Activation,
    ) -> Result<Self> {
        if n_layers < 2 {
            return Err(Error::Config(format!(
                "fc decoder needs at least 2 layers, got {n_layers}"
            )));
        }
        let mut stages = vec![FcStage::new(nstyle + nclasses, hidden_size, dropout_rate)];
        for _ in 0..n_layers - 2 {
            stages.push(FcStage::new(hidden_size, hidden_size, dropout_rate));
        }
        Ok(Self {
            stages,
            lin_out: Linear::new(hidden_size, dim_out),
            act,
            nstyle,
            nclasses,
        })
    }
}

impl DecoderNet for FcDecoder {
    fn forward(
        &mut self,
        style: &Tensor,
        class_probs: &Tensor,
        rows: usize,
        training: bool,
    ) -> Tensor {
        let mut h = concat_rows(style, class_probs, rows, self.nstyle, self.nclasses);
        for stage in &mut self.stages {
            h = stage.forward(&h, rows, training);
        }
        let h = self.lin_out.forward(&h, rows);
        self.act.apply(&h)
    }

    fn nstyle(&self) -> usize {
        self.nstyle
    }

    fn nclasses(&self) -> usize {
        self.nclasses
    }
}

impl Network for FcDecoder {
    fn named_params(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        for (i, stage) in self.stages.iter().enumerate() {
            out.extend(stage.named_params(&format!("main.{i}")));
        }
        out.extend(self.lin_out.named_params("lin_out"));
        out
    }
}

/// Decoder for short feature vectors
pub struct QvecDecoder {
    main_1: Linear,
    main_bn1: BatchNorm1d,
    main_2: Linear,
    main_bn2: BatchNorm1d,
    main_3: Linear,
    main_drop: Dropout,
    main_4: Linear,
    short_1: Linear,
    short_drop: Dropout,
    short_2: Linear,
    act: Activation,
    nstyle: usize,
    nclasses: usize,
}

impl QvecDecoder {
    pub fn new(
        nclasses: usize,
        nstyle: usize,
        dim_out: usize,
        dropout_rate: f32,
        act: Activation,
    ) -> Result<Self> {
        let in_f = nstyle + nclasses;
        Ok(Self {
            main_1: Linear::new(in_f, 4),
            main_bn1: BatchNorm1d::new(4),
            main_2: Linear::new(4, 6),
            main_bn2: BatchNorm1d::new(6),
            main_3: Linear::new(6, 8),
            main_drop: Dropout::new(dropout_rate),
            main_4: Linear::new(8, dim_out),
            short_1: Linear::new(in_f, 8),
            short_drop: Dropout::new(dropout_rate),
            short_2: Linear::new(8, dim_out),
            act,
            nstyle,
            nclasses,
        })
    }
}

impl DecoderNet for QvecDecoder {
    fn forward(
        &mut self,
        style: &Tensor,
        class_probs: &Tensor,
        rows: usize,
        training: bool,
    ) -> Tensor {
        let x = concat_rows(style, class_probs, rows, self.nstyle, self.nclasses);
        let h = relu(&self.main_1.forward(&x, rows));
        let h = self.main_bn1.forward(&h, rows, 1, training);
        let h = relu(&self.main_2.forward(&h, rows));
        let h = self.main_bn2.forward(&h, rows, 1, training);
        let h = self.act.apply(&self.main_3.forward(&h, rows));
        let h = self.main_drop.forward(&h, training);
        let main = self.main_4.forward(&h, rows);

        let s = relu(&self.short_1.forward(&x, rows));
        let s = self.short_drop.forward(&s, training);
        let short = self.short_2.forward(&s, rows);

        add(&main, &short)
    }

    fn nstyle(&self) -> usize {
        self.nstyle
    }

    fn nclasses(&self) -> usize {
        self.nclasses
    }
}

impl Network for QvecDecoder {
    fn named_params(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        out.extend(self.main_1.named_params("main.0"));
        out.extend(self.main_bn1.named_params("main.0.bn"));
        out.extend(self.main_2.named_params("main.1"));
        out.extend(self.main_bn2.named_params("main.1.bn"));
        out.extend(self.main_3.named_params("main.2"));
        out.extend(self.main_4.named_params("main.3"));
        out.extend(self.short_1.named_params("short_cut.0"));
        out.extend(self.short_2.named_params("short_cut.1"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn onehot(rows: usize, nclasses: usize) -> Tensor {
        let mut v = vec![0.0; rows * nclasses];
        for r in 0..rows {
            v[r * nclasses + r % nclasses] = 1.0;
        }
        Tensor::from_vec(v, false)
    }

    #[test]
    fn test_decoder_output_shape() {
        let mut dec = Decoder::new(3, 2, 256, 0.2, Activation::ReLu).unwrap();
        let z = Tensor::zeros(2 * 2, false);
        let y = onehot(2, 3);
        let out = dec.forward(&z, &y, 2, false);
        assert_eq!(out.len(), 2 * 256);
    }

    #[test]
    fn test_decoder_small_output() {
        let mut dec = Decoder::new(3, 2, 32, 0.2, Activation::ReLu).unwrap();
        let z = Tensor::zeros(4 * 2, false);
        let y = onehot(4, 3);
        assert_eq!(dec.forward(&z, &y, 4, false).len(), 4 * 32);
    }

    #[test]
    fn test_decoder_output_nonnegative() {
        let mut dec = CompactDecoder::new(3, 2, 32, 0.0, Activation::Softplus).unwrap();
        let z = Tensor::randn(3 * 2, 1.0, false);
        let y = onehot(3, 3);
        for v in dec.forward(&z, &y, 3, false).to_vec() {
            assert!(v >= 0.0);
        }
    }

    #[test]
    fn test_compact_decoder_shape() {
        let mut dec = CompactDecoder::new(3, 2, 256, 0.2, Activation::ReLu).unwrap();
        let z = Tensor::zeros(2, false);
        let y = onehot(1, 3);
        assert_eq!(dec.forward(&z, &y, 1, false).len(), 256);
    }

    #[test]
    fn test_decoder_rejects_odd_output() {
        assert!(Decoder::new(3, 2, 100, 0.2, Activation::ReLu).is_err());
    }

    #[test]
    fn test_fc_decoder_shape() {
        let mut dec = FcDecoder::new(3, 2, 64, 3, 16, 0.0, Activation::ReLu).unwrap();
        let z = Tensor::zeros(5 * 2, false);
        let y = onehot(5, 3);
        assert_eq!(dec.forward(&z, &y, 5, false).len(), 5 * 64);
    }

    #[test]
    fn test_qvec_decoder_shape() {
        let mut dec = QvecDecoder::new(3, 2, 12, 0.2, Activation::ReLu).unwrap();
        let z = Tensor::zeros(2 * 2, false);
        let y = onehot(2, 3);
        assert_eq!(dec.forward(&z, &y, 2, false).len(), 2 * 12);
    }
}
