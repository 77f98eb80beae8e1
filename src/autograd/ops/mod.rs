//! Differentiable operations
//!
//! Each op is a free function taking tensor references plus explicit
//! dimensions, returning a new tensor wired to a backward struct. Batches are
//! flat row-major: a batch of `rows` samples with `channels * length`
//! features per sample occupies `rows * channels * length` elements.

mod activations;
mod basic;
mod conv;
mod linear;
mod loss;
mod normalize;
mod reverse;

pub use activations::{exp, log_softmax, prelu, relu, softplus};
pub use basic::{abs, add, concat_rows, div, dropout, mean, mul, row_mean, scale, sub, sum};
pub use conv::{conv1d, conv_transpose1d, Conv1dSpec, ConvTranspose1dSpec, PadMode};
pub use linear::linear;
pub use loss::{mse, nll};
pub use normalize::{batch_norm_eval, batch_norm_train};
pub use reverse::grad_reverse;
