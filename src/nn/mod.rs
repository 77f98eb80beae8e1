//! Network layers, residual-excitation blocks, and the model variants
//!
//! Everything here operates on flat row-major batches through the
//! [`crate::autograd`] ops. Layers hold their parameters as [`Tensor`]
//! handles so optimizer groups can share storage with the networks.

mod blocks;
mod decoder;
mod discriminator;
mod encoder;
mod layers;

pub use blocks::{DecodingBlock, EncodingBlock, GaussianSmoothing};
pub use decoder::{CompactDecoder, Decoder, DecoderNet, FcDecoder, QvecDecoder};
pub use discriminator::{DiscriminatorCnn, DiscriminatorFc, DiscriminatorNet};
pub use encoder::{CompactEncoder, Encoder, EncoderNet, FcEncoder, QvecEncoder};
pub use layers::{Activation, BatchNorm1d, Conv1d, ConvTranspose1d, Dropout, Linear, PReLU};

use crate::autograd::Tensor;

/// Common surface of the three trainable networks
pub trait Network {
    /// All parameter tensors with stable dotted names (includes running
    /// statistics of normalization layers)
    fn named_params(&self) -> Vec<(String, Tensor)>;

    /// Parameter handles for an optimizer group
    fn params(&self) -> Vec<Tensor> {
        self.named_params().into_iter().map(|(_, t)| t).collect()
    }

    /// Clear all parameter gradients
    fn zero_grad(&self) {
        for p in self.params() {
            p.zero_grad();
        }
    }
}
