//! Optimization algorithms and learning rate control
//!
//! Five optimizer instances drive training, one per objective, with
//! overlapping parameter groups. [`build_optimizer`] maps the configured
//! optimizer name onto a boxed implementation.

mod adabound;
mod adam;
mod adamw;
mod optimizer;
mod plateau;
mod radam;

pub use adabound::AdaBound;
pub use adam::Adam;
pub use adamw::AdamW;
pub use optimizer::Optimizer;
pub use plateau::ReduceLrOnPlateau;
pub use radam::RAdam;

use crate::error::{Error, Result};

/// Instantiate the named optimizer with explicit betas and weight decay
pub fn build_optimizer(
    name: &str,
    lr: f32,
    betas: (f32, f32),
    weight_decay: f32,
) -> Result<Box<dyn Optimizer>> {
    let (beta1, beta2) = betas;
    match name {
        "Adam" => Ok(Box::new(Adam::new(lr, beta1, beta2, 1e-8, weight_decay))),
        "AdamW" => Ok(Box::new(AdamW::new(lr, beta1, beta2, 1e-8, weight_decay))),
        "RAdam" => Ok(Box::new(RAdam::new(lr, beta1, beta2, 1e-8, weight_decay))),
        "AdaBound" => Ok(Box::new(AdaBound::new(
            lr,
            0.1,
            1e-3,
            beta1,
            beta2,
            1e-8,
            weight_decay,
        ))),
        other => Err(Error::Config(format!(
            "unknown optimizer \"{other}\", expected Adam, AdamW, RAdam or AdaBound"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_optimizer_known_names() {
        for name in ["Adam", "AdamW", "RAdam", "AdaBound"] {
            let opt = build_optimizer(name, 1e-3, (0.9, 0.999), 0.01).unwrap();
            assert!((opt.lr() - 1e-3).abs() < 1e-9);
        }
    }

    #[test]
    fn test_build_optimizer_unknown_name() {
        assert!(build_optimizer("Lion", 1e-3, (0.9, 0.999), 0.0).is_err());
    }
}
