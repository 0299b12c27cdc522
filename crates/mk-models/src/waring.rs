//! Waring family over positive counts.

use std::sync::Arc;

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Gamma, Poisson};

use mk_core::{
    Capabilities, Dataset, Error, Model, ModelFamily, ParamShape, Params, Result,
};

use crate::constraint::lower_bounds;
use crate::mle::{estimate_mle, MleSettings};
use crate::optimizer::OptimizerConfig;

const MARGIN: f64 = 1e-3;

/// Waring distribution over counts k = 1, 2, ... with parameters
/// `[b, a]` (wave and offset; b > 1, a > 0). Estimation is by maximum
/// likelihood with an analytic score; draws use a beta-compound
/// (GHgB3-based) rejection sampler.
pub struct WaringFamily;

/// A Waring model with no parameters set.
pub fn model() -> Model {
    Model::new(Arc::new(WaringFamily))
}

/// A Waring model with the given wave and offset parameters.
pub fn with(b: f64, a: f64) -> Model {
    let mut m = model();
    m.params = Some(Params::from_vector(vec![b, a]));
    m
}

/// Count values in the data paired with their row weights.
fn weighted_counts(data: &Dataset) -> Vec<(f64, f64)> {
    let mut out = Vec::new();
    for i in 0..data.nrows() {
        let w = data.weights.as_ref().map_or(1.0, |w| w[i]);
        for v in data.row_values(i) {
            out.push((v, w));
        }
    }
    out
}

impl ModelFamily for WaringFamily {
    fn name(&self) -> &'static str {
        "Waring distribution"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            estimate: true,
            log_density: true,
            score: true,
            sample: true,
            ..Capabilities::default()
        }
    }

    fn param_shape(&self, _data: Option<&Dataset>) -> ParamShape {
        ParamShape::vector(2)
    }

    fn estimate(&self, data: Dataset, model: &mut Model) -> Result<()> {
        if model.settings.get::<MleSettings>().is_none() {
            model.settings.insert(MleSettings {
                config: OptimizerConfig::default(),
                starting_point: Some(vec![2.0, 1.0]),
                bounds: Some(vec![
                    (1.0 + MARGIN, f64::INFINITY),
                    (MARGIN, f64::INFINITY),
                ]),
                want_cov: false,
            });
        }
        estimate_mle(data, model)
    }

    fn log_density(&self, data: &Dataset, model: &Model) -> Result<f64> {
        let p = model.params_ref()?;
        let (b, a) = (p.vector[0], p.vector[1]);
        if !mk_prob::waring::params_ok(b, a) {
            return Ok(f64::NEG_INFINITY);
        }
        let mut ll = 0.0;
        for (k, w) in weighted_counts(data) {
            if k < 1.0 {
                return Err(Error::Validation(format!(
                    "Waring counts start at one, got {k}"
                )));
            }
            ll += w * mk_prob::waring::logpmf(k, b, a);
        }
        Ok(ll)
    }

    fn score(&self, data: &Dataset, model: &Model) -> Result<nalgebra::DVector<f64>> {
        let p = model.params_ref()?;
        let (b, a) = (p.vector[0], p.vector[1]);
        if !mk_prob::waring::params_ok(b, a) {
            return Err(Error::Computation(
                "score undefined outside the parameter space".to_string(),
            ));
        }
        let mut d_b = 0.0;
        let mut d_a = 0.0;
        for (k, w) in weighted_counts(data) {
            let (gb, ga) = mk_prob::waring::score(k, b, a);
            d_b += w * gb;
            d_a += w * ga;
        }
        Ok(nalgebra::DVector::from_vec(vec![d_b, d_a]))
    }

    fn sample(&self, out: &mut [f64], rng: &mut dyn RngCore, model: &Model) -> Result<()> {
        let p = model.params_ref()?;
        let (b, a) = (p.vector[0], p.vector[1]);
        if !mk_prob::waring::params_ok(b, a) {
            return Err(Error::Validation(format!(
                "Waring needs b > 1 and a > 0, got b = {b}, a = {a}"
            )));
        }
        let g1 = Gamma::new(a + 1.0, 1.0)
            .map_err(|e| Error::Computation(format!("gamma sampler: {e}")))?;
        let g2 = Gamma::new(1.0, 1.0)
            .map_err(|e| Error::Computation(format!("gamma sampler: {e}")))?;
        let g3 = Gamma::new(b - 1.0, 1.0)
            .map_err(|e| Error::Computation(format!("gamma sampler: {e}")))?;
        loop {
            let lambda = g1.sample(rng) * g2.sample(rng) / g3.sample(rng);
            if !lambda.is_finite() || lambda > 1e9 {
                continue;
            }
            let x = Poisson::new(lambda.max(f64::MIN_POSITIVE))
                .map_err(|e| Error::Computation(format!("poisson sampler: {e}")))?
                .sample(rng);
            // accept with probability (x + a) / (max(a + 1, 1) * x)
            let u: f64 = rng.gen();
            if u < (x + a) / ((a + 1.0).max(1.0) * x) {
                out[0] = x + 1.0;
                return Ok(());
            }
        }
    }

    fn constraint(&self, params: &mut Params, _model: &Model) -> Result<f64> {
        lower_bounds(params, &[(0, 1.0), (1, 0.0)], MARGIN)
    }
}
