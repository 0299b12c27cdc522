//! Location-scale Student-t family.

use std::sync::Arc;

use rand::RngCore;
use rand_distr::Distribution;

use mk_core::{
    Capabilities, Dataset, Error, Model, ModelFamily, ParamShape, Params, Result,
};

use crate::constraint::lower_bounds;
use crate::mle::{estimate_mle, MleSettings};

/// Student-t with parameters `[mu, sigma, nu]` (location, scale, degrees
/// of freedom). Estimation is by maximum likelihood, started from the
/// sample moments.
pub struct StudentTFamily;

/// A Student-t model with no parameters set.
pub fn model() -> Model {
    Model::new(Arc::new(StudentTFamily))
}

/// A Student-t model with the given location, scale, and degrees of
/// freedom.
pub fn with(mu: f64, sigma: f64, nu: f64) -> Model {
    let mut m = model();
    m.params = Some(Params::from_vector(vec![mu, sigma, nu]));
    m
}

impl ModelFamily for StudentTFamily {
    fn name(&self) -> &'static str {
        "t distribution"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            estimate: true,
            log_density: true,
            sample: true,
            ..Capabilities::default()
        }
    }

    fn param_shape(&self, _data: Option<&Dataset>) -> ParamShape {
        ParamShape::vector(3)
    }

    fn estimate(&self, data: Dataset, model: &mut Model) -> Result<()> {
        if model.settings.get::<MleSettings>().is_none() {
            let n = data.nrows() as f64;
            if n < 2.0 {
                return Err(Error::Validation(
                    "need at least two observations".to_string(),
                ));
            }
            let mean = data.matrix.column(0).mean();
            let sd = (data
                .matrix
                .column(0)
                .iter()
                .map(|v| (v - mean) * (v - mean))
                .sum::<f64>()
                / (n - 1.0))
                .sqrt();
            model.settings.insert(MleSettings {
                starting_point: Some(vec![mean, sd.max(1e-3), 2.0]),
                ..Default::default()
            });
        }
        estimate_mle(data, model)
    }

    fn log_density(&self, data: &Dataset, model: &Model) -> Result<f64> {
        let p = model.params_ref()?;
        let (mu, sigma, nu) = (p.vector[0], p.vector[1], p.vector[2]);
        if sigma <= 0.0 || nu <= 0.0 {
            return Ok(f64::NEG_INFINITY);
        }
        let mut ll = 0.0;
        for i in 0..data.nrows() {
            let w = data.weights.as_ref().map_or(1.0, |w| w[i]);
            for v in data.row_values(i) {
                ll += w * mk_prob::student_t::logpdf(v, mu, sigma, nu);
            }
        }
        Ok(ll)
    }

    fn sample(&self, out: &mut [f64], rng: &mut dyn RngCore, model: &Model) -> Result<()> {
        let p = model.params_ref()?;
        let (mu, sigma, nu) = (p.vector[0], p.vector[1], p.vector[2]);
        let t = rand_distr::StudentT::new(nu)
            .map_err(|e| Error::Validation(format!("bad degrees of freedom: {e}")))?;
        out[0] = mu + sigma * t.sample(rng);
        Ok(())
    }

    fn constraint(&self, params: &mut Params, _model: &Model) -> Result<f64> {
        // sigma and nu stay strictly positive
        lower_bounds(params, &[(1, 0.0), (2, 0.0)], 1e-3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn test_log_density_is_cauchy_at_nu_one() {
        let m = with(0.0, 1.0, 1.0);
        let data = Dataset::from_column(vec![0.0]);
        assert_relative_eq!(
            m.log_density(&data).unwrap().exp(),
            std::f64::consts::FRAC_1_PI,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_infeasible_scale_has_zero_density() {
        let m = with(0.0, -1.0, 3.0);
        let data = Dataset::from_column(vec![0.5]);
        assert_eq!(m.log_density(&data).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_sample_location() {
        let m = with(10.0, 1.0, 8.0);
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let draws = m.sample_dataset(20_000, &mut rng).unwrap();
        assert_relative_eq!(draws.matrix.column(0).mean(), 10.0, epsilon = 0.05);
    }

    #[test]
    fn test_mle_recovers_location() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let sim = with(4.0, 1.0, 6.0).sample_dataset(4_000, &mut rng).unwrap();
        let fitted = model().estimate_owned(sim).unwrap();
        let p = fitted.params_ref().unwrap();
        assert_relative_eq!(p.vector[0], 4.0, epsilon = 0.1);
        assert!(p.vector[1] > 0.0 && p.vector[2] > 0.0);
    }
}
