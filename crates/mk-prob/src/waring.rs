//! Waring (beta-geometric) mass-function kernels.
//!
//! The Waring distribution over k = 1, 2, ... with wave parameter `b` and
//! offset `a` has mass
//!
//! ```text
//! p(k) = (b - 1) * B(k + a, b + 1) / B(a + 1, b)
//! ```
//!
//! written here in log-gamma form. It requires b > 1 and a > 0; the Yule
//! distribution is the a = 0 boundary case.

use statrs::function::gamma::{digamma, ln_gamma};

/// True when (b, a) lie in the Waring parameter space.
#[inline]
pub fn params_ok(b: f64, a: f64) -> bool {
    b > 1.0 && a > 0.0
}

/// Log mass of count `k` (k >= 1) under Waring(b, a).
pub fn logpmf(k: f64, b: f64, a: f64) -> f64 {
    let ln_bb_a = ln_gamma(b + a);
    let ln_a_mass = ln_gamma(a + 1.0);
    (b - 1.0).ln() + ln_bb_a + ln_gamma(k + a) - ln_a_mass - ln_gamma(k + a + b)
}

/// Per-observation contribution to the gradient of the log mass with
/// respect to (b, a), returned as `(d/db, d/da)`.
pub fn score(k: f64, b: f64, a: f64) -> (f64, f64) {
    let psi_kab = digamma(k + a + b);
    let psi_ba = digamma(b + a);
    let db = 1.0 / (b - 1.0) + psi_ba - psi_kab;
    let da = psi_ba + digamma(k + a) - digamma(a + 1.0) - psi_kab;
    (db, da)
}
