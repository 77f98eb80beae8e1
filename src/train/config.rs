//! Training hyperparameters and model construction

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::nn::{
    Activation, CompactDecoder, CompactEncoder, Decoder, DecoderNet, DiscriminatorCnn,
    DiscriminatorFc, DiscriminatorNet, Encoder, EncoderNet, FcDecoder, FcEncoder, QvecDecoder,
    QvecEncoder,
};

fn default_base_lr() -> f32 {
    1e-4
}
fn default_nstyle() -> usize {
    2
}
fn default_nclasses() -> usize {
    3
}
fn default_batch_size() -> usize {
    111
}
fn default_max_epoch() -> usize {
    300
}
fn default_grad_rev_beta() -> f32 {
    1.1
}
fn default_alpha_flat_step() -> f32 {
    100.0
}
fn default_alpha_limit() -> f32 {
    2.0
}
fn default_sch_factor() -> f32 {
    0.25
}
fn default_sch_patience() -> usize {
    300
}
fn default_spec_noise() -> f32 {
    0.01
}
fn default_weight_decay() -> f32 {
    1e-2
}
fn default_lr_ratio_reconn() -> f32 {
    2.0
}
fn default_lr_ratio_mutual() -> f32 {
    3.0
}
fn default_lr_ratio_smooth() -> f32 {
    0.1
}
fn default_lr_ratio_supervise() -> f32 {
    2.0
}
fn default_lr_ratio_style() -> f32 {
    0.5
}
fn default_optimizer() -> String {
    "AdamW".to_string()
}
fn default_dropout_rate() -> f32 {
    0.5
}
fn default_grad_rev_dropout_rate() -> f32 {
    0.5
}
fn default_grad_rev_noise() -> f32 {
    0.1
}
fn default_decoder_activation() -> String {
    "ReLu".to_string()
}
fn default_ae_form() -> String {
    "normal".to_string()
}
fn default_spectrum_len() -> usize {
    256
}
fn default_fc_layers() -> usize {
    3
}
fn default_fc_hidden() -> usize {
    64
}
fn default_dis_hidden() -> usize {
    64
}
fn default_dis_layers() -> usize {
    3
}
fn default_smooth_kernel_size() -> usize {
    17
}
fn default_smooth_sigma() -> f32 {
    3.0
}
fn default_flex_scale_min() -> f32 {
    0.7
}
fn default_flex_scale_max() -> f32 {
    1.3
}
fn default_true() -> bool {
    true
}

/// Flat hyperparameter surface, deserializable from a YAML mapping.
///
/// Defaults match the original keyword defaults so a partial mapping never
/// silently changes numeric behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfig {
    #[serde(default = "default_base_lr")]
    pub base_lr: f32,
    #[serde(default = "default_nstyle")]
    pub nstyle: usize,
    #[serde(default = "default_nclasses")]
    pub nclasses: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_epoch")]
    pub max_epoch: usize,
    #[serde(default = "default_grad_rev_beta")]
    pub grad_rev_beta: f32,
    #[serde(default = "default_alpha_flat_step")]
    pub alpha_flat_step: f32,
    #[serde(default = "default_alpha_limit")]
    pub alpha_limit: f32,
    #[serde(default = "default_sch_factor")]
    pub sch_factor: f32,
    #[serde(default = "default_sch_patience")]
    pub sch_patience: usize,
    #[serde(default = "default_spec_noise")]
    pub spec_noise: f32,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,
    #[serde(default = "default_lr_ratio_reconn")]
    pub lr_ratio_reconn: f32,
    #[serde(default = "default_lr_ratio_mutual")]
    pub lr_ratio_mutual: f32,
    #[serde(default = "default_lr_ratio_smooth")]
    pub lr_ratio_smooth: f32,
    #[serde(default = "default_lr_ratio_supervise")]
    pub lr_ratio_supervise: f32,
    #[serde(default = "default_lr_ratio_style")]
    pub lr_ratio_style: f32,
    #[serde(default = "default_optimizer")]
    pub optimizer_name: String,
    #[serde(default = "default_dropout_rate")]
    pub dropout_rate: f32,
    #[serde(default = "default_grad_rev_dropout_rate")]
    pub grad_rev_dropout_rate: f32,
    #[serde(default = "default_grad_rev_noise")]
    pub grad_rev_noise: f32,
    #[serde(default = "default_decoder_activation")]
    pub decoder_activation: String,
    #[serde(default = "default_ae_form")]
    pub ae_form: String,
    #[serde(default)]
    pub use_cnn_dis: bool,
    #[serde(default)]
    pub use_flex_spec_target: bool,
    #[serde(default = "default_true")]
    pub short_circuit_class: bool,
    #[serde(default = "default_spectrum_len")]
    pub spectrum_len: usize,
    #[serde(default = "default_fc_layers")]
    pub fc_layers: usize,
    #[serde(default = "default_fc_hidden")]
    pub fc_hidden: usize,
    #[serde(default = "default_dis_hidden")]
    pub dis_hidden: usize,
    #[serde(default = "default_dis_layers")]
    pub dis_layers: usize,
    #[serde(default = "default_smooth_kernel_size")]
    pub smooth_kernel_size: usize,
    #[serde(default = "default_smooth_sigma")]
    pub smooth_sigma: f32,
    #[serde(default = "default_flex_scale_min")]
    pub flex_scale_min: f32,
    #[serde(default = "default_flex_scale_max")]
    pub flex_scale_max: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            base_lr: default_base_lr(),
            nstyle: default_nstyle(),
            nclasses: default_nclasses(),
            batch_size: default_batch_size(),
            max_epoch: default_max_epoch(),
            grad_rev_beta: default_grad_rev_beta(),
            alpha_flat_step: default_alpha_flat_step(),
            alpha_limit: default_alpha_limit(),
            sch_factor: default_sch_factor(),
            sch_patience: default_sch_patience(),
            spec_noise: default_spec_noise(),
            weight_decay: default_weight_decay(),
            lr_ratio_reconn: default_lr_ratio_reconn(),
            lr_ratio_mutual: default_lr_ratio_mutual(),
            lr_ratio_smooth: default_lr_ratio_smooth(),
            lr_ratio_supervise: default_lr_ratio_supervise(),
            lr_ratio_style: default_lr_ratio_style(),
            optimizer_name: default_optimizer(),
            dropout_rate: default_dropout_rate(),
            grad_rev_dropout_rate: default_grad_rev_dropout_rate(),
            grad_rev_noise: default_grad_rev_noise(),
            decoder_activation: default_decoder_activation(),
            ae_form: default_ae_form(),
            use_cnn_dis: false,
            use_flex_spec_target: false,
            short_circuit_class: default_true(),
            spectrum_len: default_spectrum_len(),
            fc_layers: default_fc_layers(),
            fc_hidden: default_fc_hidden(),
            dis_hidden: default_dis_hidden(),
            dis_layers: default_dis_layers(),
            smooth_kernel_size: default_smooth_kernel_size(),
            smooth_sigma: default_smooth_sigma(),
            flex_scale_min: default_flex_scale_min(),
            flex_scale_max: default_flex_scale_max(),
        }
    }
}

impl TrainConfig {
    /// Load a config from a YAML file
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))
    }

    /// Adversarial optimizer betas derived from the reversal strength
    pub fn adversarial_betas(&self) -> (f32, f32) {
        (0.9 * self.grad_rev_beta, 0.99 + 0.009 * self.grad_rev_beta)
    }
}

/// Encoder, decoder, and discriminator for the configured architecture form
pub fn build_models(
    config: &TrainConfig,
) -> Result<(Box<dyn EncoderNet>, Box<dyn DecoderNet>, Box<dyn DiscriminatorNet>)> {
    let act = Activation::from_name(&config.decoder_activation)?;
    let (encoder, decoder): (Box<dyn EncoderNet>, Box<dyn DecoderNet>) =
        match config.ae_form.as_str() {
            "normal" => (
                Box::new(Encoder::new(
                    config.nclasses,
                    config.nstyle,
                    config.spectrum_len,
                    config.dropout_rate,
                )?),
                Box::new(Decoder::new(
                    config.nclasses,
                    config.nstyle,
                    config.spectrum_len,
                    config.dropout_rate,
                    act,
                )?),
            ),
            "compact" => (
                Box::new(CompactEncoder::new(
                    config.nclasses,
                    config.nstyle,
                    config.spectrum_len,
                    config.dropout_rate,
                )?),
                Box::new(CompactDecoder::new(
                    config.nclasses,
                    config.nstyle,
                    config.spectrum_len,
                    config.dropout_rate,
                    act,
                )?),
            ),
            "fc" => (
                Box::new(FcEncoder::new(
                    config.nclasses,
                    config.nstyle,
                    config.spectrum_len,
                    config.fc_layers,
                    config.fc_hidden,
                    config.dropout_rate,
                )?),
                Box::new(FcDecoder::new(
                    config.nclasses,
                    config.nstyle,
                    config.spectrum_len,
                    config.fc_layers,
                    config.fc_hidden,
                    config.dropout_rate,
                    act,
                )?),
            ),
            "qvec" => (
                Box::new(QvecEncoder::new(
                    config.nclasses,
                    config.nstyle,
                    config.spectrum_len,
                    config.dropout_rate,
                )?),
                Box::new(QvecDecoder::new(
                    config.nclasses,
                    config.nstyle,
                    config.spectrum_len,
                    config.dropout_rate,
                    act,
                )?),
            ),
            other => {
                return Err(Error::Config(format!(
                    "unknown architecture form \"{other}\", expected normal, compact, fc or qvec"
                )))
            }
        };

    let discriminator: Box<dyn DiscriminatorNet> = if config.use_cnn_dis {
        Box::new(DiscriminatorCnn::new(
            config.nstyle,
            config.dis_hidden,
            2,
            5,
            config.grad_rev_dropout_rate,
            config.grad_rev_noise,
        )?)
    } else {
        Box::new(DiscriminatorFc::new(
            config.nstyle,
            config.dis_hidden,
            config.dis_layers,
            config.grad_rev_dropout_rate,
            config.grad_rev_noise,
        ))
    };

    Ok((encoder, decoder, discriminator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_defaults_match_reference_values() {
        let config = TrainConfig::default();
        assert_abs_diff_eq!(config.base_lr, 1e-4, epsilon = 1e-10);
        assert_eq!(config.batch_size, 111);
        assert_eq!(config.max_epoch, 300);
        assert_eq!(config.optimizer_name, "AdamW");
        assert!(config.short_circuit_class);
        assert!(!config.use_flex_spec_target);
    }

    #[test]
    fn test_yaml_overrides() {
        let config: TrainConfig =
            serde_yaml::from_str("base_lr: 0.01\nnclasses: 5\nae_form: compact\n").unwrap();
        assert_abs_diff_eq!(config.base_lr, 0.01, epsilon = 1e-10);
        assert_eq!(config.nclasses, 5);
        assert_eq!(config.ae_form, "compact");
        // untouched fields keep their defaults
        assert_eq!(config.nstyle, 2);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let parsed: std::result::Result<TrainConfig, _> = serde_yaml::from_str("base_lrr: 0.1\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_adversarial_betas() {
        let config = TrainConfig::default();
        let (b1, b2) = config.adversarial_betas();
        assert_abs_diff_eq!(b1, 0.99, epsilon = 1e-6);
        assert_abs_diff_eq!(b2, 0.9999, epsilon = 1e-6);
    }

    #[test]
    fn test_build_models_unknown_form() {
        let mut config = TrainConfig::default();
        config.spectrum_len = 32;
        config.ae_form = "transformer".to_string();
        assert!(build_models(&config).is_err());
    }

    #[test]
    fn test_build_models_all_forms() {
        for form in ["normal", "compact", "fc", "qvec"] {
            let mut config = TrainConfig::default();
            config.spectrum_len = 256;
            config.ae_form = form.to_string();
            let (mut enc, mut dec, mut dis) = build_models(&config).unwrap();
            let spec = crate::Tensor::randn(2 * 256, 1.0, false);
            let (z, y) = enc.forward(&spec, 2, false);
            assert_eq!(z.len(), 2 * config.nstyle);
            assert_eq!(y.len(), 2 * config.nclasses);
            let re = dec.forward(&z, &y, 2, false);
            assert_eq!(re.len(), 2 * 256);
            let d = dis.forward(&z, 2, Some(1.0), false);
            assert_eq!(d.len(), 4);
        }
    }
}
