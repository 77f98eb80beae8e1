//! Style discriminators with gradient reversal

use super::layers::{BatchNorm1d, Conv1d, Dropout, Linear, PReLU};
use super::Network;
use crate::autograd::ops::{add, grad_reverse, log_softmax, PadMode};
use crate::autograd::Tensor;
use crate::error::Result;

/// Adversarial critic over style vectors.
///
/// Training-mode inputs get Gaussian noise before gradient reversal;
/// `beta = None` leaves gradients unreversed.
pub trait DiscriminatorNet: Network {
    /// Returns 2-class log-probabilities `(rows, 2)`
    fn forward(&mut self, style: &Tensor, rows: usize, beta: Option<f32>, training: bool)
        -> Tensor;
}

fn noisy_reversed(style: &Tensor, noise: f32, beta: Option<f32>, training: bool) -> Tensor {
    let x = if training {
        add(style, &Tensor::randn(style.len(), noise, false))
    } else {
        style.clone()
    };
    grad_reverse(&x, beta)
}

struct FcStage {
    lin: Linear,
    act: PReLU,
    drop: Dropout,
}

impl FcStage {
    fn new(in_f: usize, out_f: usize, dropout_rate: f32) -> Self {
        Self {
            lin: Linear::new(in_f, out_f),
            act: PReLU::new(out_f),
            drop: Dropout::new(dropout_rate),
        }
    }
}

/// Fully-connected discriminator of configurable depth
pub struct DiscriminatorFc {
    stages: Vec<FcStage>,
    lin_out: Linear,
    noise: f32,
}

impl DiscriminatorFc {
    pub fn new(nstyle: usize, hidden_size: usize, layers: usize, dropout_rate: f32, noise: f32) -> Self {
        let mut stages = vec![FcStage::new(nstyle, hidden_size, dropout_rate)];
        for _ in 0..layers.saturating_sub(2) {
            stages.push(FcStage::new(hidden_size, hidden_size, dropout_rate));
        }
        Self {
            stages,
            lin_out: Linear::new(hidden_size, 2),
            noise,
        }
    }
}

impl DiscriminatorNet for DiscriminatorFc {
    fn forward(
        &mut self,
        style: &Tensor,
        rows: usize,
        beta: Option<f32>,
        training: bool,
    ) -> Tensor {
        let mut h = noisy_reversed(style, self.noise, beta, training);
        for stage in &mut self.stages {
            h = stage.lin.forward(&h, rows);
            h = stage.act.forward(&h, 1);
            h = stage.drop.forward(&h, training);
        }
        let h = self.lin_out.forward(&h, rows);
        log_softmax(&h, rows, 2)
    }
}

impl Network for DiscriminatorFc {
    fn named_params(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        for (i, stage) in self.stages.iter().enumerate() {
            out.extend(stage.lin.named_params(&format!("main.{i}.lin")));
            out.extend(stage.act.named_params(&format!("main.{i}.act")));
        }
        out.extend(self.lin_out.named_params("lin_out"));
        out
    }
}

struct ConvStage {
    bn: BatchNorm1d,
    conv: Conv1d,
    act: PReLU,
}

impl ConvStage {
    fn new(in_ch: usize, out_ch: usize, kernel: usize) -> Result<Self> {
        Ok(Self {
            bn: BatchNorm1d::new(in_ch),
            conv: Conv1d::new(
                in_ch,
                out_ch,
                kernel,
                1,
                (kernel - 1) / 2,
                PadMode::Replicate,
                1,
            )?,
            act: PReLU::new(out_ch),
        })
    }

    fn forward(&mut self, x: &Tensor, rows: usize, len: usize, training: bool) -> Tensor {
        let h = self.bn.forward(x, rows, len, training);
        let h = self.conv.forward(&h, rows, len);
        self.act.forward(&h, len)
    }
}

/// Convolutional discriminator: the style vector is lifted to a
/// `hidden_size`-long single-channel sequence and refined by replicate-padded
/// convolutions before the 2-class head
pub struct DiscriminatorCnn {
    pre_lin: Linear,
    pre_act: PReLU,
    main: Vec<ConvStage>,
    bn_post: BatchNorm1d,
    drop_post: Dropout,
    lin_out: Linear,
    hidden_size: usize,
    noise: f32,
}

impl DiscriminatorCnn {
    pub fn new(
        nstyle: usize,
        hidden_size: usize,
        channels: usize,
        kernel: usize,
        dropout_rate: f32,
        noise: f32,
    ) -> Result<Self> {
        let main = vec![
            ConvStage::new(1, channels, kernel)?,
            ConvStage::new(channels, channels, kernel)?,
            ConvStage::new(channels, channels, kernel)?,
            ConvStage::new(channels, channels, kernel)?,
            ConvStage::new(channels, 1, kernel)?,
        ];
        Ok(Self {
            pre_lin: Linear::new(nstyle, hidden_size),
            pre_act: PReLU::new(hidden_size),
            main,
            bn_post: BatchNorm1d::new(hidden_size),
            drop_post: Dropout::new(dropout_rate),
            lin_out: Linear::new(hidden_size, 2),
            hidden_size,
            noise,
        })
    }
}

impl DiscriminatorNet for DiscriminatorCnn {
    fn forward(
        &mut self,
        style: &Tensor,
        rows: usize,
        beta: Option<f32>,
        training: bool,
    ) -> Tensor {
        let h = noisy_reversed(style, self.noise, beta, training);
        let h = self.pre_lin.forward(&h, rows);
        // (rows, hidden) doubles as a single-channel sequence of that length
        let mut h = self.pre_act.forward(&h, 1);
        for stage in &mut self.main {
            h = stage.forward(&h, rows, self.hidden_size, training);
        }
        let h = self.bn_post.forward(&h, rows, 1, training);
        let h = self.drop_post.forward(&h, training);
        let h = self.lin_out.forward(&h, rows);
        log_softmax(&h, rows, 2)
    }
}

impl Network for DiscriminatorCnn {
    fn named_params(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        out.extend(self.pre_lin.named_params("pre.lin"));
        out.extend(self.pre_act.named_params("pre.act"));
        for (i, stage) in self.main.iter().enumerate() {
            out.extend(stage.bn.named_params(&format!("main.{i}.bn")));
            out.extend(stage.conv.named_params(&format!("main.{i}.conv")));
            out.extend(stage.act.named_params(&format!("main.{i}.act")));
        }
        out.extend(self.bn_post.named_params("post.bn"));
        out.extend(self.lin_out.named_params("post.lin"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_fc_log_probs_normalized() {
        let mut dis = DiscriminatorFc::new(2, 16, 3, 0.0, 0.1);
        let z = Tensor::randn(4 * 2, 1.0, false);
        let out = dis.forward(&z, 4, None, false);
        assert_eq!(out.len(), 8);
        let v = out.to_vec();
        for r in 0..4 {
            let total: f32 = (0..2).map(|c| v[r * 2 + c].exp()).sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_gradients_reversed_toward_encoder() {
        let mut dis = DiscriminatorFc::new(2, 8, 2, 0.0, 0.0);
        let z = Tensor::randn(3 * 2, 1.0, true);
        let fwd = dis.forward(&z, 3, None, false);
        backward(&fwd);
        let plain: Vec<f32> = z.grad().unwrap().to_vec();
        z.zero_grad();
        dis.zero_grad();
        let rev = dis.forward(&z, 3, Some(1.0), false);
        backward(&rev);
        let reversed: Vec<f32> = z.grad().unwrap().to_vec();
        for (a, b) in plain.iter().zip(&reversed) {
            assert_abs_diff_eq!(*a, -b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_cnn_shape() {
        let mut dis = DiscriminatorCnn::new(2, 64, 2, 5, 0.2, 0.1).unwrap();
        let z = Tensor::randn(5 * 2, 1.0, false);
        let out = dis.forward(&z, 5, Some(0.5), false);
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn test_train_noise_perturbs_output() {
        let mut dis = DiscriminatorFc::new(2, 8, 2, 0.0, 0.5);
        let z = Tensor::zeros(2 * 2, false);
        let a = dis.forward(&z, 2, None, true).to_vec();
        let b = dis.forward(&z, 2, None, true).to_vec();
        assert!(a.iter().zip(&b).any(|(x, y)| (x - y).abs() > 1e-7));
    }
}
