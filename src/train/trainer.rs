//! Five-objective adversarial autoencoder training loop

use ndarray::{Array1, Array2};
use rand::Rng;
use std::path::{Path, PathBuf};

use super::batch::{Batch, SpectraSource};
use super::callback::TelemetrySink;
use super::config::TrainConfig;
use crate::autograd::ops::{abs, add, div, exp, mean, mse, mul, nll, row_mean, scale, sub};
use crate::autograd::{backward, Tensor};
use crate::error::Result;
use crate::io::Checkpoint;
use crate::logging::Logger;
use crate::metrics::{
    shapiro_w, style_coupling, style_property_spearman, valid_label_rows, weighted_f1,
};
use crate::nn::{DecoderNet, DiscriminatorNet, EncoderNet, GaussianSmoothing};
use crate::optim::{build_optimizer, Optimizer, ReduceLrOnPlateau};

const ROLE_ENCODER: &str = "Encoder";
const ROLE_DECODER: &str = "Decoder";
const ROLE_DISCRIMINATOR: &str = "Style Discriminator";

// One objective: an optimizer over a (possibly shared) parameter group and
// its plateau scheduler.
struct Objective {
    optimizer: Box<dyn Optimizer>,
    params: Vec<Tensor>,
    scheduler: ReduceLrOnPlateau,
}

impl Objective {
    fn step(&mut self) {
        self.optimizer.step(&mut self.params);
    }
}

fn argmax_row(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn flatten(arr: &Array2<f32>) -> Tensor {
    Tensor::from_vec(arr.iter().copied().collect(), false)
}

/// Orchestrates adversarial, supervised, reconstruction, mutual-information,
/// and smoothness training of the three networks.
pub struct AaeTrainer<'a> {
    encoder: Box<dyn EncoderNet>,
    decoder: Box<dyn DecoderNet>,
    discriminator: Box<dyn DiscriminatorNet>,
    config: TrainConfig,
    logger: Logger,
    work_dir: PathBuf,
    smoothing: GaussianSmoothing,
    adversarial: Objective,
    supervise: Objective,
    reconn: Objective,
    mutual: Objective,
    smooth: Objective,
    callback: Option<Box<dyn FnMut(usize, &[f64]) + 'a>>,
    telemetry: Option<Box<dyn TelemetrySink + 'a>>,
}

impl<'a> AaeTrainer<'a> {
    pub fn new(
        encoder: Box<dyn EncoderNet>,
        decoder: Box<dyn DecoderNet>,
        discriminator: Box<dyn DiscriminatorNet>,
        config: TrainConfig,
        logger: Logger,
        work_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let enc_params = encoder.params();
        let dec_params = decoder.params();
        let dis_params = discriminator.params();

        let default_betas = (0.9, 0.999);
        let scheduler = || {
            ReduceLrOnPlateau::new(config.sch_factor, config.sch_patience, 0.01, 0, 0.0)
        };
        let group = |a: &[Tensor], b: &[Tensor]| {
            a.iter().chain(b.iter()).cloned().collect::<Vec<_>>()
        };

        let reconn = Objective {
            optimizer: build_optimizer(
                &config.optimizer_name,
                config.lr_ratio_reconn * config.base_lr,
                default_betas,
                config.weight_decay,
            )?,
            params: group(&enc_params, &dec_params),
            scheduler: scheduler(),
        };
        let mutual = Objective {
            optimizer: build_optimizer(
                &config.optimizer_name,
                config.lr_ratio_mutual * config.base_lr,
                default_betas,
                0.0,
            )?,
            params: group(&enc_params, &dec_params),
            scheduler: scheduler(),
        };
        let smooth = Objective {
            optimizer: build_optimizer(
                &config.optimizer_name,
                config.lr_ratio_smooth * config.base_lr,
                default_betas,
                config.weight_decay,
            )?,
            params: dec_params.clone(),
            scheduler: scheduler(),
        };
        let supervise = Objective {
            optimizer: build_optimizer(
                &config.optimizer_name,
                config.lr_ratio_supervise * config.base_lr,
                default_betas,
                config.weight_decay,
            )?,
            params: enc_params.clone(),
            scheduler: scheduler(),
        };
        let adversarial = Objective {
            optimizer: build_optimizer(
                &config.optimizer_name,
                config.lr_ratio_style * config.base_lr,
                config.adversarial_betas(),
                0.0,
            )?,
            params: group(&dis_params, &enc_params),
            scheduler: scheduler(),
        };

        let smoothing =
            GaussianSmoothing::new(1, config.smooth_kernel_size, config.smooth_sigma);

        Ok(Self {
            encoder,
            decoder,
            discriminator,
            config,
            logger,
            work_dir: work_dir.as_ref().to_path_buf(),
            smoothing,
            adversarial,
            supervise,
            reconn,
            mutual,
            smooth,
            callback: None,
            telemetry: None,
        })
    }

    /// Receive the per-epoch metrics vector
    pub fn set_metrics_callback(&mut self, callback: impl FnMut(usize, &[f64]) + 'a) {
        self.callback = Some(Box::new(callback));
    }

    /// Receive per-objective scalar telemetry
    pub fn set_telemetry(&mut self, sink: impl TelemetrySink + 'a) {
        self.telemetry = Some(Box::new(sink));
    }

    fn zero_grads(&self) {
        self.encoder.zero_grad();
        self.decoder.zero_grad();
        self.discriminator.zero_grad();
    }

    fn emit(&mut self, category: &str, name: &str, value: f64, step: usize) {
        if let Some(sink) = &mut self.telemetry {
            sink.scalar(category, name, value, step);
        }
    }

    // β anneal: flat near zero early, saturating at alpha_limit
    fn reversal_beta(&self, epoch: usize) -> f32 {
        let progress = epoch as f32 / self.config.max_epoch as f32;
        (2.0 / (1.0 + (-1.0e4 / self.config.alpha_flat_step * progress).exp()) - 1.0)
            * self.config.alpha_limit
    }

    fn checkpoint(&self, epoch: usize, score: f64) -> Checkpoint {
        let mut ckpt = Checkpoint::new(epoch, score);
        ckpt.capture(ROLE_ENCODER, self.encoder.as_ref());
        ckpt.capture(ROLE_DECODER, self.decoder.as_ref());
        ckpt.capture(ROLE_DISCRIMINATOR, self.discriminator.as_ref());
        ckpt
    }

    fn adversarial_pass(
        &mut self,
        spec_in: &Tensor,
        rows: usize,
        beta: f32,
        training: bool,
    ) -> Tensor {
        let nstyle = self.decoder.nstyle();
        let z_real = Tensor::randn(rows * nstyle, 1.0, true);
        let (z_fake, _) = self.encoder.forward(spec_in, rows, training);

        let real_pred = self
            .discriminator
            .forward(&z_real, rows, Some(beta), training);
        let fake_pred = self
            .discriminator
            .forward(&z_fake, rows, Some(beta), training);

        let ones = vec![1usize; rows];
        let zeros = vec![0usize; rows];
        add(&nll(&real_pred, &ones, rows, 2), &nll(&fake_pred, &zeros, rows, 2))
    }

    fn train_batch(&mut self, batch: &Batch, beta: f32, epoch: usize) -> f64 {
        let rows = batch.rows();
        let len = batch.spectra.ncols();
        let nclasses = self.config.nclasses;
        let nstyle = self.decoder.nstyle();

        let spec_target = flatten(&batch.spectra);
        let noise = Tensor::randn(rows * len, self.config.spec_noise, false);
        let spec_in = add(&spec_target, &noise);
        let labels = flatten(&batch.labels);
        let label_idx: Vec<usize> = batch
            .labels
            .rows()
            .into_iter()
            .map(|r| argmax_row(r.as_slice().unwrap_or(&[])))
            .collect();

        // adversarial
        self.zero_grads();
        let adversarial_loss = self.adversarial_pass(&spec_in, rows, beta, true);
        backward(&adversarial_loss);
        self.adversarial.step();

        // supervise
        self.zero_grads();
        let (_, y) = self.encoder.forward(&spec_in, rows, true);
        let supervise_loss = nll(&y, &label_idx, rows, nclasses);
        backward(&supervise_loss);
        self.supervise.step();

        // reconstruction
        self.zero_grads();
        let (z, y) = self.encoder.forward(&spec_in, rows, true);
        let y_used = if self.config.short_circuit_class {
            labels.clone()
        } else {
            exp(&y)
        };
        let spec_re = self.decoder.forward(&z, &y_used, rows, true);
        let recon_loss = if self.config.use_flex_spec_target {
            let re_scale = div(
                &abs(&row_mean(&spec_re, rows, len)),
                &abs(&row_mean(&spec_target, rows, len)),
            );
            let unit = Tensor::new(Array1::ones(rows), false);
            let off = sub(&re_scale, &unit);
            let penalty = scale(&mean(&mul(&off, &off)), 0.1);

            let clamped = re_scale
                .to_array()
                .mapv(|s| s.clamp(self.config.flex_scale_min, self.config.flex_scale_max));
            let mut scaled_target = batch.spectra.clone();
            for (r, mut row) in scaled_target.rows_mut().into_iter().enumerate() {
                row *= clamped[r];
            }
            add(&penalty, &mse(&spec_re, &flatten(&scaled_target)))
        } else {
            mse(&spec_re, &spec_target)
        };
        backward(&recon_loss);
        self.reconn.step();

        // mutual information
        self.zero_grads();
        let mut rng = rand::thread_rng();
        let sample_idx: Vec<usize> = (0..rows).map(|_| rng.gen_range(0..nclasses)).collect();
        let mut one_hot = vec![0.0f32; rows * nclasses];
        for (r, &c) in sample_idx.iter().enumerate() {
            one_hot[r * nclasses + c] = 1.0;
        }
        let y_sample = Tensor::from_vec(one_hot, false);
        let z_sample = Tensor::randn(rows * nstyle, 1.0, false);
        let x_sample = self.decoder.forward(&z_sample, &y_sample, rows, true);
        let (z_recon, y_recon) = self.encoder.forward(&x_sample, rows, true);
        let mutual_loss = add(
            &nll(&y_recon, &sample_idx, rows, nclasses),
            &mse(&z_recon, &z_sample),
        );
        backward(&mutual_loss);
        self.mutual.step();
        let mutual_value = f64::from(mutual_loss.data()[0]);

        // smoothness
        self.zero_grads();
        let x_sample = self.decoder.forward(&z_sample, &y_sample, rows, true);
        let smoothed = self.smoothing.forward(&x_sample, rows, len);
        let smooth_loss = mse(&x_sample, &smoothed);
        backward(&smooth_loss);
        self.smooth.step();

        self.zero_grads();

        self.emit("Recon/train", "Recon", f64::from(recon_loss.data()[0]), epoch);
        self.emit("Recon/train", "Mutual Info", mutual_value, epoch);
        self.emit("Recon/train", "Smooth", f64::from(smooth_loss.data()[0]), epoch);
        self.emit(
            "Supervise/train",
            "Classification",
            f64::from(supervise_loss.data()[0]),
            epoch,
        );
        self.emit(
            "Adversarial/train",
            "Adversarial",
            f64::from(adversarial_loss.data()[0]),
            epoch,
        );

        mutual_value
    }

    fn validate(
        &mut self,
        val: &Batch,
        class_weights: &[f32],
        properties: Option<&[f32]>,
        beta: f32,
        epoch: usize,
    ) -> (f64, Vec<f64>) {
        let rows = val.rows();
        let len = val.spectra.ncols();
        let nclasses = self.config.nclasses;
        let nstyle = self.decoder.nstyle();

        let spec_in = flatten(&val.spectra);
        let (z, y) = self.encoder.forward(&spec_in, rows, false);
        let y_probs = exp(&y);
        let spec_re = self.decoder.forward(&z, &y_probs, rows, false);

        // class-weighted reconstruction loss
        let mut tw: Vec<f32> = val
            .labels
            .rows()
            .into_iter()
            .map(|r| r.iter().zip(class_weights).map(|(&l, &w)| l * w).sum())
            .collect();
        let tw_sum: f32 = tw.iter().sum();
        if tw_sum.abs() > 1e-12 {
            tw.iter_mut().for_each(|w| *w /= tw_sum);
        }
        let re = spec_re.to_array();
        let recon_loss: f64 = (0..rows)
            .map(|r| {
                let diff: f32 = (0..len)
                    .map(|i| {
                        let d = re[r * len + i] - val.spectra[(r, i)];
                        d * d
                    })
                    .sum::<f32>()
                    / len as f32;
                f64::from(diff * tw[r])
            })
            .sum();

        // style diagnostics
        let z_arr = z.to_array();
        let styles = Array2::from_shape_vec((rows, nstyle), z_arr.to_vec())
            .unwrap_or_else(|_| Array2::zeros((rows, nstyle)));
        let shapiro: Vec<f32> = (0..nstyle)
            .map(|s| shapiro_w(&styles.column(s).to_vec()))
            .collect();
        let min_shapiro = shapiro.iter().copied().fold(f32::INFINITY, f32::min);
        let coupling = style_coupling(styles.view());

        // F1 with invalid rows excluded
        let y_arr = y_probs.to_array();
        let class_pred: Vec<usize> = (0..rows)
            .map(|r| argmax_row(&y_arr.as_slice().unwrap_or(&[])[r * nclasses..(r + 1) * nclasses]))
            .collect();
        let class_true: Vec<usize> = val
            .labels
            .rows()
            .into_iter()
            .map(|r| {
                let absed: Vec<f32> = r.iter().map(|v| v.abs()).collect();
                argmax_row(&absed)
            })
            .collect();
        let valid = valid_label_rows(val.labels.view());
        let pred_f: Vec<usize> = valid.iter().map(|&i| class_pred[i]).collect();
        let true_f: Vec<usize> = valid.iter().map(|&i| class_true[i]).collect();
        let f1 = f64::from(weighted_f1(&pred_f, &true_f, nclasses));

        // validation supervise and adversarial losses, telemetry only
        let label_idx: Vec<usize> = val
            .labels
            .rows()
            .into_iter()
            .map(|r| argmax_row(r.as_slice().unwrap_or(&[])))
            .collect();
        let supervise_loss = nll(&y, &label_idx, rows, nclasses);
        let adversarial_loss = self.adversarial_pass(&spec_in, rows, beta, false);
        self.zero_grads();

        self.emit("Recon/val", "Recon", recon_loss, epoch);
        self.emit("F1 Score/val", "F1 Score", f1, epoch);
        self.emit(
            "Supervise/val",
            "Classification",
            f64::from(supervise_loss.data()[0]),
            epoch,
        );
        self.emit(
            "Adversarial/val",
            "Adversarial",
            f64::from(adversarial_loss.data()[0]),
            epoch,
        );

        let mut metrics = vec![
            f1,
            f64::from(min_shapiro),
            recon_loss,
            0.0,
            0.0, // slot filled with the epoch's average mutual-info loss
            f64::from(coupling),
        ];
        if let Some(props) = properties {
            let (max_cor, sec_cor) =
                style_property_spearman(styles.view(), &class_pred, props, nclasses);
            self.emit("Style-Property/val", "Max", f64::from(max_cor), epoch);
            self.emit("Style-Property/val", "Second", f64::from(sec_cor), epoch);
            metrics.push(f64::from(max_cor));
            metrics.push(f64::from(sec_cor));
        }
        (f1, metrics)
    }

    /// Run the full training loop, returning the final epoch's metrics
    pub fn train(&mut self, source: &mut dyn SpectraSource) -> Result<Vec<f64>> {
        let chkpt_dir = self.work_dir.join("checkpoints");
        std::fs::create_dir_all(&chkpt_dir)?;

        let class_weights = source.class_weights();
        let properties = source.val_properties();

        let mut last_best = 0.0f64;
        let mut best_path: Option<PathBuf> = None;
        let mut metrics: Vec<f64> = Vec::new();
        let mut final_f1 = 0.0f64;

        for epoch in 0..self.config.max_epoch {
            let beta = self.reversal_beta(epoch);

            let batches = source.train_epoch(epoch);
            let n_batch = batches.len().max(1);
            let mut avg_mutual = 0.0f64;
            for batch in &batches {
                avg_mutual += self.train_batch(batch, beta, epoch);
            }
            avg_mutual /= n_batch as f64;

            let val = source.validation();
            let (f1, mut epoch_metrics) =
                self.validate(&val, &class_weights, properties.as_deref(), beta, epoch);
            epoch_metrics[4] = avg_mutual;
            final_f1 = f1;

            if f1 > last_best * 1.01 {
                let path = chkpt_dir.join(format!("epoch_{epoch:06}_loss_{f1:.4}.json"));
                self.checkpoint(epoch, f1).save(&path)?;
                self.logger.info(&format!(
                    "epoch {epoch}: F1 {f1:.4} beats {last_best:.4}, checkpoint {}",
                    path.display()
                ));
                last_best = f1;
                best_path = Some(path);
            }

            let best = last_best as f32;
            for objective in [
                &mut self.reconn,
                &mut self.mutual,
                &mut self.smooth,
                &mut self.supervise,
                &mut self.adversarial,
            ] {
                objective
                    .scheduler
                    .step(best, objective.optimizer.as_mut());
            }

            self.logger.debug(&format!(
                "epoch {epoch}: f1 {f1:.4} recon {:.6} mutual {avg_mutual:.6}",
                epoch_metrics[2]
            ));

            if let Some(callback) = &mut self.callback {
                callback(epoch, &epoch_metrics);
            }
            metrics = epoch_metrics;
        }

        self.checkpoint(self.config.max_epoch.saturating_sub(1), final_f1)
            .save(&self.work_dir.join("final.json"))?;
        if let Some(path) = best_path {
            std::fs::copy(&path, self.work_dir.join("best.json"))?;
        }

        Ok(metrics)
    }
}

/// Checkpoint trigger: a new score must beat the running best by 1%
pub fn should_checkpoint(score: f64, running_best: f64) -> bool {
    score > running_best * 1.01
}
