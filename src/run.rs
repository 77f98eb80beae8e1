//! Parallel independent training trials

use std::path::Path;

use crate::error::{Error, Result};
use crate::logging::{LogLevel, Logger};
use crate::train::{build_models, AaeTrainer, SpectraSource, TrainConfig};

/// Run `n_trials` fully independent trainings on OS threads.
///
/// Each trial builds its own networks, optimizers, data source, and logger
/// inside its thread (the autograd graph is thread-local by construction)
/// and works under `<work_dir>/training/job_<i+1>/`. No parameters or
/// gradients are shared. Returns each trial's final metric vector in trial
/// order.
pub fn run_trials<S, F>(
    n_trials: usize,
    config: &TrainConfig,
    source_factory: F,
    work_dir: &Path,
) -> Result<Vec<Vec<f64>>>
where
    S: SpectraSource,
    F: Fn(usize) -> S + Sync,
{
    let joined: Vec<std::thread::Result<Result<Vec<f64>>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..n_trials)
            .map(|i| {
                let factory = &source_factory;
                let config = config.clone();
                let dir = work_dir.join("training").join(format!("job_{}", i + 1));
                scope.spawn(move || -> Result<Vec<f64>> {
                    std::fs::create_dir_all(&dir)?;
                    let logger = Logger::with_file(LogLevel::Info, &dir.join("train.log"))?;
                    logger.info(&format!("trial {} starting", i + 1));
                    let (encoder, decoder, discriminator) = build_models(&config)?;
                    let mut trainer =
                        AaeTrainer::new(encoder, decoder, discriminator, config, logger, &dir)?;
                    let mut source = factory(i);
                    trainer.train(&mut source)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });

    let mut results = Vec::with_capacity(n_trials);
    for (i, outcome) in joined.into_iter().enumerate() {
        match outcome {
            Ok(metrics) => results.push(metrics?),
            Err(_) => {
                return Err(Error::Trial(format!("trial {} panicked", i + 1)));
            }
        }
    }
    Ok(results)
}
