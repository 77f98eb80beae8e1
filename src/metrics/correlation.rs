//! Rank correlations between styles and external quantities

use ndarray::ArrayView2;

// Average ranks with ties sharing their mean rank
fn ranks(xs: &[f32]) -> Vec<f64> {
    let n = xs.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| xs[a].total_cmp(&xs[b]));

    let mut out = vec![0.0f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && xs[order[j + 1]] == xs[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            out[idx] = avg;
        }
        i = j + 1;
    }
    out
}

/// Spearman rank correlation with average ranks for ties.
///
/// Degenerate inputs (fewer than two points, or a constant sequence) yield
/// 0.0 instead of NaN so downstream maxima stay finite.
pub fn spearman(xs: &[f32], ys: &[f32]) -> f32 {
    debug_assert_eq!(xs.len(), ys.len());
    let n = xs.len();
    if n < 2 {
        return 0.0;
    }

    let rx = ranks(xs);
    let ry = ranks(ys);
    let mean = (n as f64 + 1.0) / 2.0;

    let mut num = 0.0f64;
    let mut vx = 0.0f64;
    let mut vy = 0.0f64;
    for i in 0..n {
        let dx = rx[i] - mean;
        let dy = ry[i] - mean;
        num += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx < 1e-12 || vy < 1e-12 {
        return 0.0;
    }
    (num / (vx * vy).sqrt()) as f32
}

/// Largest absolute pairwise Spearman correlation between style dimensions.
///
/// `styles` is `(rows, nstyle)`; 0.0 when fewer than two styles.
pub fn style_coupling(styles: ArrayView2<'_, f32>) -> f32 {
    let nstyle = styles.ncols();
    let cols: Vec<Vec<f32>> = (0..nstyle).map(|j| styles.column(j).to_vec()).collect();
    let mut max_cor = 0.0f32;
    for j1 in 0..nstyle {
        for j2 in j1 + 1..nstyle {
            max_cor = max_cor.max(spearman(&cols[j1], &cols[j2]).abs());
        }
    }
    max_cor
}

/// Per-class standardized style-vs-property Spearman correlations.
///
/// Styles and properties are standardized within each class (std floored at
/// 0.01); the per-class correlation sign is folded into the property so that
/// classes correlating in opposite directions do not cancel. Degenerate signs
/// (NaN from constant data, or magnitude below 0.1) are treated as +1.
/// Returns the two largest absolute per-style correlations.
pub fn style_property_spearman(
    styles: ArrayView2<'_, f32>,
    class_idx: &[usize],
    properties: &[f32],
    nclasses: usize,
) -> (f32, f32) {
    let rows = styles.nrows();
    let nstyle = styles.ncols();
    debug_assert_eq!(class_idx.len(), rows);
    debug_assert_eq!(properties.len(), rows);

    let members: Vec<Vec<usize>> = (0..nclasses)
        .map(|c| (0..rows).filter(|&r| class_idx[r] == c).collect())
        .collect();

    let mut prop_mean = vec![0.0f32; nclasses];
    let mut prop_std = vec![1.0f32; nclasses];
    let mut style_mean = vec![vec![0.0f32; nstyle]; nclasses];
    let mut style_std = vec![vec![1.0f32; nstyle]; nclasses];
    for c in 0..nclasses {
        let m = &members[c];
        if m.is_empty() {
            continue;
        }
        let nf = m.len() as f32;
        prop_mean[c] = m.iter().map(|&r| properties[r]).sum::<f32>() / nf;
        let pv = m.iter().map(|&r| (properties[r] - prop_mean[c]).powi(2)).sum::<f32>() / nf;
        prop_std[c] = pv.sqrt().max(0.01);
        for s in 0..nstyle {
            let mean = m.iter().map(|&r| styles[(r, s)]).sum::<f32>() / nf;
            let var = m.iter().map(|&r| (styles[(r, s)] - mean).powi(2)).sum::<f32>() / nf;
            style_mean[c][s] = mean;
            style_std[c][s] = var.sqrt().max(0.01);
        }
    }

    // correlation sign within each class, neutralized when unreliable
    let mut sign = vec![vec![1.0f32; nstyle]; nclasses];
    for c in 0..nclasses {
        let m = &members[c];
        if m.len() < 2 {
            continue;
        }
        let props: Vec<f32> = m.iter().map(|&r| properties[r]).collect();
        for s in 0..nstyle {
            let col: Vec<f32> = m.iter().map(|&r| styles[(r, s)]).collect();
            let cor = spearman(&col, &props);
            let sgn = cor.signum();
            sign[c][s] = if !sgn.is_finite() || cor.abs() < 0.1 { 1.0 } else { sgn };
        }
    }

    let mut cors: Vec<f32> = (0..nstyle)
        .map(|s| {
            let zs: Vec<f32> = (0..rows)
                .map(|r| {
                    let c = class_idx[r];
                    (styles[(r, s)] - style_mean[c][s]) / style_std[c][s]
                })
                .collect();
            let zp: Vec<f32> = (0..rows)
                .map(|r| {
                    let c = class_idx[r];
                    sign[c][s] * (properties[r] - prop_mean[c]) / prop_std[c]
                })
                .collect();
            spearman(&zs, &zp).abs()
        })
        .collect();
    cors.sort_by(|a, b| b.total_cmp(a));

    let max_cor = cors.first().copied().unwrap_or(0.0);
    let sec_cor = cors.get(1).copied().unwrap_or(max_cor);
    (max_cor, sec_cor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    #[test]
    fn test_spearman_monotone() {
        let xs = vec![1.0, 2.0, 3.0, 4.0];
        let ys = vec![10.0, 20.0, 25.0, 100.0];
        assert_abs_diff_eq!(spearman(&xs, &ys), 1.0, epsilon = 1e-6);
        let neg: Vec<f32> = ys.iter().map(|v| -v).collect();
        assert_abs_diff_eq!(spearman(&xs, &neg), -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_spearman_tie_handling() {
        // [1, 2, 2, 3] vs [1, 2, 3, 4]: ties share rank 2.5
        let r = spearman(&[1.0, 2.0, 2.0, 3.0], &[1.0, 2.0, 3.0, 4.0]);
        assert!(r > 0.9 && r < 1.0);
    }

    #[test]
    fn test_spearman_degenerate_is_zero() {
        assert_abs_diff_eq!(spearman(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(spearman(&[1.0], &[2.0]), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_style_coupling_detects_dependence() {
        let n = 50;
        let mut flat = Vec::with_capacity(n * 2);
        for i in 0..n {
            let x = i as f32 / n as f32;
            flat.push(x);
            flat.push(x * 2.0 + 1.0);
        }
        let styles = Array2::from_shape_vec((n, 2), flat).unwrap();
        assert_abs_diff_eq!(style_coupling(styles.view()), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_style_coupling_single_style() {
        let styles = Array2::zeros((10, 1));
        assert_abs_diff_eq!(style_coupling(styles.view()), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_style_property_perfect_within_class() {
        // style 0 tracks the property inside each class even though the
        // class offsets would destroy a pooled correlation
        let rows = 40;
        let mut flat = Vec::with_capacity(rows * 2);
        let mut props = Vec::with_capacity(rows);
        let mut classes = Vec::with_capacity(rows);
        for r in 0..rows {
            let c = r % 2;
            let t = (r / 2) as f32;
            flat.push(t + if c == 0 { 100.0 } else { -100.0 });
            flat.push(((r * 7919) % 13) as f32);
            props.push(t * if c == 0 { 1.0 } else { -1.0 });
            classes.push(c);
        }
        let styles = Array2::from_shape_vec((rows, 2), flat).unwrap();
        let (max_cor, _) = style_property_spearman(styles.view(), &classes, &props, 2);
        assert!(max_cor > 0.95, "got {max_cor}");
    }

    #[test]
    fn test_style_property_empty_class_is_neutral() {
        let styles = Array2::from_shape_vec((4, 2), vec![0.0; 8]).unwrap();
        let classes = vec![0, 0, 0, 0];
        let props = vec![1.0, 2.0, 3.0, 4.0];
        // class 1 has no members; constant styles give zero correlations
        let (max_cor, sec_cor) = style_property_spearman(styles.view(), &classes, &props, 2);
        assert_abs_diff_eq!(max_cor, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sec_cor, 0.0, epsilon = 1e-6);
    }
}
