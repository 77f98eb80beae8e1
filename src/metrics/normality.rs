//! Shapiro-Wilk normality statistic

// Acklam's rational approximation of the standard normal quantile,
// accurate to ~1e-9 over (0, 1).
fn inv_norm_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -inv_norm_cdf(1.0 - p)
    }
}

fn poly(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Shapiro-Wilk W statistic via Royston's approximation of the
/// order-statistic weights (AS R94, statistic only).
///
/// Returns 1.0 for samples too small or too degenerate to test.
pub fn shapiro_w(xs: &[f32]) -> f32 {
    let n = xs.len();
    if n < 3 {
        return 1.0;
    }

    let mut sorted: Vec<f64> = xs.iter().map(|&v| v as f64).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted[n - 1] - sorted[0] < 1e-10 {
        return 1.0;
    }

    // Blom scores
    let nf = n as f64;
    let m: Vec<f64> = (1..=n)
        .map(|i| inv_norm_cdf((i as f64 - 0.375) / (nf + 0.25)))
        .collect();
    let m_sq: f64 = m.iter().map(|v| v * v).sum();
    let rsn = 1.0 / nf.sqrt();

    let mut a = vec![0.0f64; n];
    if n == 3 {
        a[0] = -(0.5f64.sqrt());
        a[2] = 0.5f64.sqrt();
    } else {
        let c_last = m[n - 1] / m_sq.sqrt();
        let a_last = c_last + poly(&[0.0, 0.221157, -0.147981, -2.071190, 4.434685, -2.706056], rsn);
        if n <= 5 {
            let phi = (m_sq - 2.0 * m[n - 1] * m[n - 1]) / (1.0 - 2.0 * a_last * a_last);
            for i in 1..n - 1 {
                a[i] = m[i] / phi.sqrt();
            }
            a[n - 1] = a_last;
            a[0] = -a_last;
        } else {
            let c_pen = m[n - 2] / m_sq.sqrt();
            let a_pen =
                c_pen + poly(&[0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633], rsn);
            let phi = (m_sq - 2.0 * m[n - 1] * m[n - 1] - 2.0 * m[n - 2] * m[n - 2])
                / (1.0 - 2.0 * a_last * a_last - 2.0 * a_pen * a_pen);
            for i in 2..n - 2 {
                a[i] = m[i] / phi.sqrt();
            }
            a[n - 1] = a_last;
            a[n - 2] = a_pen;
            a[0] = -a_last;
            a[1] = -a_pen;
        }
    }

    let mean = sorted.iter().sum::<f64>() / nf;
    let ssq: f64 = sorted.iter().map(|&v| (v - mean) * (v - mean)).sum();
    let num: f64 = a.iter().zip(&sorted).map(|(&ai, &xi)| ai * xi).sum();
    let w = num * num / ssq;
    w.clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::Rng;
    use rand_distr::StandardNormal;

    #[test]
    fn test_inv_norm_cdf_symmetry() {
        assert_abs_diff_eq!(inv_norm_cdf(0.5), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(inv_norm_cdf(0.975), 1.959964, epsilon = 1e-4);
        assert_abs_diff_eq!(inv_norm_cdf(0.025), -1.959964, epsilon = 1e-4);
    }

    #[test]
    fn test_shapiro_gaussian_sample_scores_high() {
        let mut rng = rand::thread_rng();
        let xs: Vec<f32> = (0..200).map(|_| rng.sample(StandardNormal)).collect();
        assert!(shapiro_w(&xs) > 0.9);
    }

    #[test]
    fn test_shapiro_bimodal_scores_lower() {
        let mut rng = rand::thread_rng();
        let xs: Vec<f32> = (0..200)
            .map(|i| {
                let noise: f32 = rng.sample::<f32, _>(StandardNormal) * 0.05;
                if i % 2 == 0 {
                    5.0 + noise
                } else {
                    -5.0 + noise
                }
            })
            .collect();
        let w_bimodal = shapiro_w(&xs);
        let normal: Vec<f32> = (0..200).map(|_| rng.sample(StandardNormal)).collect();
        assert!(w_bimodal < shapiro_w(&normal));
        assert!(w_bimodal < 0.8);
    }

    #[test]
    fn test_shapiro_degenerate_input() {
        assert_abs_diff_eq!(shapiro_w(&[1.0, 1.0, 1.0, 1.0]), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(shapiro_w(&[1.0, 2.0]), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_shapiro_bounded() {
        let xs: Vec<f32> = (0..50).map(|i| (i as f32).exp().min(1e6)).collect();
        let w = shapiro_w(&xs);
        assert!((0.0..=1.0).contains(&w));
    }
}
