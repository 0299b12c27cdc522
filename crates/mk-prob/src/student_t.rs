//! Location-scale Student-t log-density kernel.

use statrs::function::gamma::ln_gamma;

/// Log density of `x` under a Student-t with location `mu`, scale `sigma`,
/// and `nu` degrees of freedom.
pub fn logpdf(x: f64, mu: f64, sigma: f64, nu: f64) -> f64 {
    let z = (x - mu) / sigma;
    ln_gamma((nu + 1.0) / 2.0)
        - ln_gamma(nu / 2.0)
        - 0.5 * (nu * std::f64::consts::PI).ln()
        - sigma.ln()
        - (nu + 1.0) / 2.0 * (1.0 + z * z / nu).ln()
}
