//! Data seam between the orchestrator and dataset handling

use ndarray::Array2;

/// One batch of spectra `(rows, spectrum_len)` with soft labels
/// `(rows, nclasses)`.
///
/// A negative entry anywhere in a label row marks the sample as unlabeled;
/// such rows train normally but are excluded from F1.
#[derive(Debug, Clone)]
pub struct Batch {
    pub spectra: Array2<f32>,
    pub labels: Array2<f32>,
}

impl Batch {
    pub fn new(spectra: Array2<f32>, labels: Array2<f32>) -> Self {
        debug_assert_eq!(spectra.nrows(), labels.nrows());
        Self { spectra, labels }
    }

    pub fn rows(&self) -> usize {
        self.spectra.nrows()
    }
}

/// Dataset seam.
///
/// Shuffling, class balancing, and split handling happen behind this trait;
/// the orchestrator only pulls ready-made batches.
pub trait SpectraSource {
    /// Training batches for one epoch, already shuffled and balanced
    fn train_epoch(&mut self, epoch: usize) -> Vec<Batch>;

    /// The full validation set as one batch
    fn validation(&self) -> Batch;

    /// Per-class sampling weights used to reweight the validation
    /// reconstruction loss
    fn class_weights(&self) -> Vec<f32>;

    /// Optional scalar property per validation sample, enabling the
    /// style-property correlation metric
    fn val_properties(&self) -> Option<Vec<f32>> {
        None
    }
}
