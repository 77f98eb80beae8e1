//! Training orchestration
//!
//! [`AaeTrainer`] drives the five objectives over batches pulled through the
//! [`SpectraSource`] seam; [`TrainConfig`] is the flat hyperparameter surface
//! and [`build_models`] maps it onto concrete networks.

mod batch;
mod callback;
mod config;
mod trainer;

pub use batch::{Batch, SpectraSource};
pub use callback::{MetricsCallback, NullSink, TelemetrySink};
pub use config::{build_models, TrainConfig};
pub use trainer::{should_checkpoint, AaeTrainer};
