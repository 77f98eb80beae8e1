//! Tape-based autograd engine
//!
//! Reverse-mode automatic differentiation over flat `f32` tensors. Every op
//! produces a new [`Tensor`] carrying a [`BackwardOp`] node; [`backward`]
//! replays the recorded graph in reverse topological order, visiting each
//! node exactly once. Residual blocks create diamond-shaped graphs, so the
//! replay order (not per-op recursion) is what keeps gradient accumulation
//! correct.

mod backward;
pub mod ops;
mod tensor;

pub use backward::{backward, BackwardOp};
pub use ops::*;
pub use tensor::Tensor;
