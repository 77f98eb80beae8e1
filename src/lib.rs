//! Semi-supervised adversarial autoencoder training for 1-D spectra.
//!
//! `espectro` maps spectral curves (e.g. X-ray absorption spectra) into a
//! latent code split into a discrete class factor (coordination number) and a
//! continuous style factor, with an adversarial regularizer pushing the style
//! marginals toward a standard Gaussian prior.
//!
//! The crate is organized bottom-up:
//! - [`autograd`] - tape-based reverse-mode autodiff over flat `f32` tensors
//! - [`nn`] - residual-excitation blocks and the encoder/decoder/discriminator
//!   network variants
//! - [`optim`] - optimizers and the plateau learning-rate scheduler
//! - [`metrics`] - validation statistics (weighted F1, normality, rank
//!   correlation)
//! - [`train`] - the five-objective training orchestrator
//! - [`io`] - checkpoint artifacts
//! - [`run`] - embarrassingly-parallel trial pool
//!
//! # Example
//!
//! ```no_run
//! use espectro::logging::{Logger, LogLevel};
//! use espectro::train::{AaeTrainer, TrainConfig};
//!
//! let config = TrainConfig::default();
//! let logger = Logger::new(LogLevel::Info);
//! let (encoder, decoder, discriminator) = espectro::train::build_models(&config)?;
//! let mut trainer =
//!     AaeTrainer::new(encoder, decoder, discriminator, config, logger, "work")?;
//! // let metrics = trainer.train(&mut source)?;
//! # Ok::<(), espectro::Error>(())
//! ```

pub mod autograd;
mod error;
pub mod io;
pub mod logging;
pub mod metrics;
pub mod nn;
pub mod optim;
pub mod run;
pub mod train;

pub use autograd::Tensor;
pub use error::{Error, Result};
