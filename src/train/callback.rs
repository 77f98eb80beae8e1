//! Observation seams: per-epoch metrics callback and scalar telemetry

/// Called once per epoch with the metric vector
/// `[f1, min_shapiro, val_recon, 0.0, avg_mutual, style_coupling,
/// (max_property_cor, second_property_cor)?]`.
pub type MetricsCallback<'a> = dyn FnMut(usize, &[f64]) + 'a;

/// Scalar telemetry receiver.
///
/// Categories follow `<objective>/<phase>`: "Recon/train",
/// "Supervise/train", "Adversarial/train", "Recon/val", "F1 Score/val",
/// "Supervise/val", "Adversarial/val", "Style-Property/val".
pub trait TelemetrySink {
    fn scalar(&mut self, category: &str, name: &str, value: f64, step: usize);
}

/// Sink that drops everything
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn scalar(&mut self, _category: &str, _name: &str, _value: f64, _step: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        seen: Vec<(String, String, f64, usize)>,
    }

    impl TelemetrySink for RecordingSink {
        fn scalar(&mut self, category: &str, name: &str, value: f64, step: usize) {
            self.seen.push((category.to_string(), name.to_string(), value, step));
        }
    }

    #[test]
    fn test_sink_receives_scalars() {
        let mut sink = RecordingSink { seen: Vec::new() };
        sink.scalar("Recon/train", "Recon", 0.5, 3);
        assert_eq!(sink.seen.len(), 1);
        assert_eq!(sink.seen[0].0, "Recon/train");
        assert_eq!(sink.seen[0].3, 3);
    }
}
