//! Checkpoint artifacts

mod checkpoint;

pub use checkpoint::Checkpoint;
