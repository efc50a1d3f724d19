//! Two-proportion z-test for variant comparison.

/// One-sided confidence that the arm with the higher conversion rate truly
/// outperforms the other, given per-arm conversions and sample sizes.
/// Returns `None` when either arm has no samples or the pooled rate is
/// degenerate (0% or 100% across both arms), in which case no inference
/// is possible.
pub fn two_proportion_confidence(
    conversions_a: u64,
    samples_a: u64,
    conversions_b: u64,
    samples_b: u64,
) -> Option<f64> {
    if samples_a == 0 || samples_b == 0 {
        return None;
    }

    let n1 = samples_a as f64;
    let n2 = samples_b as f64;
    let p1 = conversions_a as f64 / n1;
    let p2 = conversions_b as f64 / n2;

    let pooled = (conversions_a + conversions_b) as f64 / (n1 + n2);
    let variance = pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2);
    if variance <= 0.0 {
        return None;
    }

    let z = (p1 - p2).abs() / variance.sqrt();
    Some(normal_cdf(z))
}

/// Standard normal CDF via the Abramowitz & Stegun erf approximation
/// (maximum error ~1.5e-7, ample for declaring experiment winners).
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_cdf_anchors() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_cdf(1.645) - 0.95).abs() < 1e-3);
        assert!((normal_cdf(2.326) - 0.99).abs() < 1e-3);
    }

    #[test]
    fn test_clear_difference_is_significant() {
        // 20% vs 5% over 500 samples each is overwhelmingly significant.
        let confidence = two_proportion_confidence(100, 500, 25, 500).unwrap();
        assert!(confidence > 0.99);
    }

    #[test]
    fn test_identical_rates_are_not_significant() {
        let confidence = two_proportion_confidence(50, 500, 50, 500).unwrap();
        assert!((confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(two_proportion_confidence(0, 0, 5, 100).is_none());
        assert!(two_proportion_confidence(0, 100, 0, 100).is_none());
        assert!(two_proportion_confidence(100, 100, 100, 100).is_none());
    }
}
