//! End-to-end training runs on synthetic spectra

use espectro::logging::{LogLevel, Logger};
use espectro::train::{build_models, AaeTrainer, Batch, SpectraSource, TrainConfig};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::cell::RefCell;
use std::rc::Rc;

const N_SAMPLES: usize = 200;
const SPECTRUM_LEN: usize = 32;
const NCLASSES: usize = 3;
const BATCH: usize = 20;

// Gaussian bumps at class-dependent positions plus a little noise
struct SyntheticSource {
    spectra: Array2<f32>,
    labels: Array2<f32>,
}

impl SyntheticSource {
    fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut spectra = Array2::zeros((N_SAMPLES, SPECTRUM_LEN));
        let mut labels = Array2::zeros((N_SAMPLES, NCLASSES));
        for r in 0..N_SAMPLES {
            let class = r % NCLASSES;
            let center = 8.0 + 8.0 * class as f32;
            let width: f32 = 2.0 + rng.gen_range(-0.3..0.3);
            for i in 0..SPECTRUM_LEN {
                let d = (i as f32 - center) / width;
                let noise: f32 = rng.sample::<f32, _>(StandardNormal) * 0.01;
                spectra[(r, i)] = (-0.5 * d * d).exp() + noise;
            }
            labels[(r, class)] = 1.0;
        }
        Self { spectra, labels }
    }
}

impl SpectraSource for SyntheticSource {
    fn train_epoch(&mut self, _epoch: usize) -> Vec<Batch> {
        (0..N_SAMPLES / BATCH)
            .map(|b| {
                let range = b * BATCH..(b + 1) * BATCH;
                Batch::new(
                    self.spectra.slice(ndarray::s![range.clone(), ..]).to_owned(),
                    self.labels.slice(ndarray::s![range, ..]).to_owned(),
                )
            })
            .collect()
    }

    fn validation(&self) -> Batch {
        Batch::new(self.spectra.clone(), self.labels.clone())
    }

    fn class_weights(&self) -> Vec<f32> {
        vec![1.0 / NCLASSES as f32; NCLASSES]
    }
}

fn small_config() -> TrainConfig {
    let mut config = TrainConfig::default();
    config.spectrum_len = SPECTRUM_LEN;
    config.nstyle = 2;
    config.nclasses = NCLASSES;
    config.batch_size = BATCH;
    config.max_epoch = 5;
    config.dis_hidden = 16;
    config.dropout_rate = 0.2;
    config
}

#[test]
fn test_five_epoch_run_completes_and_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config();
    let (encoder, decoder, discriminator) = build_models(&config).unwrap();

    let epochs_seen = Rc::new(RefCell::new(Vec::<usize>::new()));
    let metric_lens = Rc::new(RefCell::new(Vec::<usize>::new()));

    let mut trainer = AaeTrainer::new(
        encoder,
        decoder,
        discriminator,
        config,
        Logger::new(LogLevel::Warn),
        dir.path(),
    )
    .unwrap();
    {
        let epochs_seen = Rc::clone(&epochs_seen);
        let metric_lens = Rc::clone(&metric_lens);
        trainer.set_metrics_callback(move |epoch, metrics| {
            epochs_seen.borrow_mut().push(epoch);
            metric_lens.borrow_mut().push(metrics.len());
            assert!(metrics.iter().all(|m| m.is_finite()));
        });
    }

    let mut source = SyntheticSource::new(7);
    let metrics = trainer.train(&mut source).unwrap();

    assert_eq!(*epochs_seen.borrow(), vec![0, 1, 2, 3, 4]);
    assert!(metric_lens.borrow().iter().all(|&n| n >= 6));
    assert!(metrics.len() >= 6);
    assert!(dir.path().join("final.json").exists());
    // F1 lives in [0, 1]
    assert!((0.0..=1.0).contains(&metrics[0]));
}

#[test]
fn test_property_metrics_extend_vector() {
    struct WithProps(SyntheticSource);
    impl SpectraSource for WithProps {
        fn train_epoch(&mut self, epoch: usize) -> Vec<Batch> {
            self.0.train_epoch(epoch)
        }
        fn validation(&self) -> Batch {
            self.0.validation()
        }
        fn class_weights(&self) -> Vec<f32> {
            self.0.class_weights()
        }
        fn val_properties(&self) -> Option<Vec<f32>> {
            Some((0..N_SAMPLES).map(|r| (r % 17) as f32).collect())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config();
    config.max_epoch = 1;
    let (encoder, decoder, discriminator) = build_models(&config).unwrap();
    let mut trainer = AaeTrainer::new(
        encoder,
        decoder,
        discriminator,
        config,
        Logger::new(LogLevel::Warn),
        dir.path(),
    )
    .unwrap();

    let mut source = WithProps(SyntheticSource::new(11));
    let metrics = trainer.train(&mut source).unwrap();
    assert_eq!(metrics.len(), 8);
    assert!(metrics[6] >= metrics[7]);
}

#[test]
fn test_best_checkpoint_copied_when_f1_improves() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config();
    let (encoder, decoder, discriminator) = build_models(&config).unwrap();
    let mut trainer = AaeTrainer::new(
        encoder,
        decoder,
        discriminator,
        config,
        Logger::new(LogLevel::Warn),
        dir.path(),
    )
    .unwrap();

    let mut source = SyntheticSource::new(23);
    trainer.train(&mut source).unwrap();

    // any positive F1 beats the initial best of zero, so at least one
    // checkpoint exists and best.json is its copy
    let n_checkpoints = std::fs::read_dir(dir.path().join("checkpoints")).unwrap().count();
    if n_checkpoints > 0 {
        assert!(dir.path().join("best.json").exists());
    }
}
