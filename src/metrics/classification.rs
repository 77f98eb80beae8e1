//! Support-weighted F1 and label validity filtering

use ndarray::ArrayView2;

/// Support-weighted F1 score over class indices.
///
/// Per-class F1 values are averaged with weights proportional to the true
/// class counts. Classes absent from `true_idx` contribute nothing.
pub fn weighted_f1(pred_idx: &[usize], true_idx: &[usize], nclasses: usize) -> f32 {
    debug_assert_eq!(pred_idx.len(), true_idx.len());
    if true_idx.is_empty() {
        return 0.0;
    }

    let mut tp = vec![0usize; nclasses];
    let mut fp = vec![0usize; nclasses];
    let mut fnv = vec![0usize; nclasses];
    for (&p, &t) in pred_idx.iter().zip(true_idx) {
        if p == t {
            tp[t] += 1;
        } else {
            fp[p] += 1;
            fnv[t] += 1;
        }
    }

    let mut weighted = 0.0f32;
    for c in 0..nclasses {
        let support = tp[c] + fnv[c];
        if support == 0 {
            continue;
        }
        let denom = 2 * tp[c] + fp[c] + fnv[c];
        let f1 = if denom == 0 {
            0.0
        } else {
            2.0 * tp[c] as f32 / denom as f32
        };
        weighted += f1 * support as f32;
    }
    weighted / true_idx.len() as f32
}

/// Indices of label rows with no negative entries.
///
/// Rows carrying a negative label component mark unlabeled or corrupt
/// samples; they stay in the loss terms but are excluded from F1.
pub fn valid_label_rows(labels: ArrayView2<'_, f32>) -> Vec<usize> {
    labels
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&v| v >= 0.0))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    #[test]
    fn test_weighted_f1_perfect() {
        let idx = vec![0, 1, 2, 1, 0];
        assert_abs_diff_eq!(weighted_f1(&idx, &idx, 3), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_weighted_f1_known_value() {
        // class 0: tp=1 fp=1 fn=0 -> f1 = 2/3, support 1
        // class 1: tp=1 fp=0 fn=1 -> f1 = 2/3, support 2
        let pred = vec![0, 0, 1];
        let truth = vec![0, 1, 1];
        assert_abs_diff_eq!(weighted_f1(&pred, &truth, 2), 2.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_weighted_f1_empty() {
        assert_abs_diff_eq!(weighted_f1(&[], &[], 3), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_valid_rows_filter_negative() {
        let labels = arr2(&[[1.0, 0.0], [0.0, -1.0], [0.5, 0.5]]);
        assert_eq!(valid_label_rows(labels.view()), vec![0, 2]);
    }

    #[test]
    fn test_f1_matches_manual_filtering() {
        let labels = arr2(&[[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0], [0.0, 1.0]]);
        let pred = vec![0, 1, 1, 0];
        let truth = vec![0, 0, 1, 1];

        let valid = valid_label_rows(labels.view());
        let fp: Vec<usize> = valid.iter().map(|&i| pred[i]).collect();
        let ft: Vec<usize> = valid.iter().map(|&i| truth[i]).collect();

        let direct = weighted_f1(&fp, &ft, 2);
        let manual = weighted_f1(&[pred[0], pred[2], pred[3]], &[truth[0], truth[2], truth[3]], 2);
        assert_abs_diff_eq!(direct, manual, epsilon = 1e-6);
    }

    #[test]
    fn test_f1_independent_of_excluded_predictions() {
        let labels = arr2(&[[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0]]);
        let truth = vec![0, 0, 1];
        let valid = valid_label_rows(labels.view());

        let score = |pred: &[usize]| {
            let fp: Vec<usize> = valid.iter().map(|&i| pred[i]).collect();
            let ft: Vec<usize> = valid.iter().map(|&i| truth[i]).collect();
            weighted_f1(&fp, &ft, 2)
        };
        // flipping the prediction on the excluded row cannot matter
        assert_abs_diff_eq!(score(&[0, 0, 1]), score(&[0, 1, 1]), epsilon = 1e-6);
    }
}
