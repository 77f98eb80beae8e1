//! Validation statistics
//!
//! Classification quality, normality of the style distribution, and rank
//! correlations between styles and external properties.

mod classification;
mod correlation;
mod normality;

pub use classification::{valid_label_rows, weighted_f1};
pub use correlation::{spearman, style_coupling, style_property_spearman};
pub use normality::shapiro_w;
