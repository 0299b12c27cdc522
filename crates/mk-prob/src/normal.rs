//! Normal log-density kernels.

/// ln(sqrt(2 pi))
pub const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Log density of `x` under N(mu, sigma^2), with sigma the standard
/// deviation.
#[inline]
pub fn logpdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    -0.5 * z * z - sigma.ln() - LN_SQRT_2PI
}

/// Log density parameterized by the variance instead of the standard
/// deviation.
#[inline]
pub fn logpdf_var(x: f64, mu: f64, var: f64) -> f64 {
    let d = x - mu;
    -0.5 * d * d / var - 0.5 * var.ln() - LN_SQRT_2PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_standard_normal_at_zero() {
        // phi(0) = 1/sqrt(2 pi)
        assert_relative_eq!(logpdf(0.0, 0.0, 1.0), -LN_SQRT_2PI, epsilon = 1e-12);
        assert_relative_eq!(
            logpdf(0.0, 0.0, 1.0).exp(),
            0.398_942_280_401_432_7,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_var_parameterization_agrees() {
        let sigma = 2.5;
        assert_relative_eq!(
            logpdf(1.2, 0.4, sigma),
            logpdf_var(1.2, 0.4, sigma * sigma),
            epsilon = 1e-12
        );
    }
}
