//! The normal family with closed-form estimation.

use std::sync::Arc;

use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use mk_core::{
    Capabilities, Dataset, Error, Model, ModelFamily, ParamShape, Params, Result,
};

use crate::constraint::lower_bounds;

/// N(mu, sigma^2) over every numeric cell of the data, parameterized as
/// `[mu, sigma]`. Estimation is closed form: the sample mean and the
/// square root of the unbiased (n - 1) variance, weighted when the data
/// carries weights.
pub struct NormalFamily;

/// A normal model with no parameters set.
pub fn model() -> Model {
    Model::new(Arc::new(NormalFamily))
}

/// A normal model with the given mean and standard deviation.
pub fn with_mean_sd(mu: f64, sigma: f64) -> Model {
    let mut m = model();
    m.params = Some(Params::from_vector(vec![mu, sigma]));
    m
}

/// Every numeric value in the data paired with its row weight.
fn weighted_values(data: &Dataset) -> Vec<(f64, f64)> {
    let mut out = Vec::new();
    for i in 0..data.nrows() {
        let w = data.weights.as_ref().map_or(1.0, |w| w[i]);
        for v in data.row_values(i) {
            out.push((v, w));
        }
    }
    out
}

impl ModelFamily for NormalFamily {
    fn name(&self) -> &'static str {
        "Normal distribution"
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
        let values = weighted_values(&data);
        let total_w: f64 = values.iter().map(|(_, w)| w).sum();
        if total_w <= 1.0 {
            return Err(Error::Validation(format!(
                "need total weight above one to estimate a variance, got {total_w}"
            )));
        }
        let mu = values.iter().map(|(v, w)| v * w).sum::<f64>() / total_w;
        let ss = values.iter().map(|(v, w)| w * (v - mu) * (v - mu)).sum::<f64>();
        let sigma = (ss / (total_w - 1.0)).sqrt();
        model.params = Some(Params::from_vector(vec![mu, sigma]));
        let ll = self.log_density(&data, model)?;
        model.info.add_named_scalar("log likelihood", ll);
        model.data = Some(Arc::new(data));
        Ok(())
    }

    fn log_density(&self, data: &Dataset, model: &Model) -> Result<f64> {
        let p = model.params_ref()?;
        let (mu, sigma) = (p.vector[0], p.vector[1]);
        if sigma <= 0.0 {
            return Ok(f64::NEG_INFINITY);
        }
        let mut ll = 0.0;
        for (v, w) in weighted_values(data) {
            ll += w * mk_prob::normal::logpdf(v, mu, sigma);
        }
        Ok(ll)
    }

    fn score(&self, data: &Dataset, model: &Model) -> Result<nalgebra::DVector<f64>> {
        let p = model.params_ref()?;
        let (mu, sigma) = (p.vector[0], p.vector[1]);
        if sigma <= 0.0 {
            return Err(Error::Computation(
                "score undefined for non-positive sigma".to_string(),
            ));
        }
        let mut d_mu = 0.0;
        let mut d_sigma = 0.0;
        for (v, w) in weighted_values(data) {
            let z = v - mu;
            d_mu += w * z / (sigma * sigma);
            d_sigma += w * (z * z / (sigma * sigma * sigma) - 1.0 / sigma);
        }
        Ok(nalgebra::DVector::from_vec(vec![d_mu, d_sigma]))
    }

    fn sample(&self, out: &mut [f64], rng: &mut dyn RngCore, model: &Model) -> Result<()> {
        let p = model.params_ref()?;
        let z: f64 = StandardNormal.sample(rng);
        out[0] = p.vector[0] + p.vector[1] * z;
        Ok(())
    }

    fn constraint(&self, params: &mut Params, _model: &Model) -> Result<f64> {
        // sigma stays strictly positive
        lower_bounds(params, &[(1, 0.0)], 1e-3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn test_closed_form_estimate() {
        let data = Dataset::from_column(vec![2.0, 4.0, 6.0, 8.0]);
        let fitted = model().estimate(&data).unwrap();
        let p = fitted.params_ref().unwrap();
        assert_relative_eq!(p.vector[0], 5.0, epsilon = 1e-12);
        // unbiased variance of {2,4,6,8} is 20/3
        assert_relative_eq!(p.vector[1], (20.0 / 3.0_f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_weighted_estimate_matches_duplication() {
        let mut weighted = Dataset::from_column(vec![1.0, 5.0]);
        weighted.set_weights(vec![3.0, 1.0]).unwrap();
        let duplicated = Dataset::from_column(vec![1.0, 1.0, 1.0, 5.0]);
        let a = model().estimate_owned(weighted).unwrap();
        let b = model().estimate(&duplicated).unwrap();
        let (pa, pb) = (a.params_ref().unwrap(), b.params_ref().unwrap());
        assert_relative_eq!(pa.vector[0], pb.vector[0], epsilon = 1e-12);
        assert_relative_eq!(pa.vector[1], pb.vector[1], epsilon = 1e-12);
    }

    #[test]
    fn test_score_matches_finite_difference() {
        let data = Dataset::from_column(vec![0.3, -0.7, 1.9]);
        let m = with_mean_sd(0.2, 1.3);
        let score = m.score(&data).unwrap();
        let h = 1e-6;
        let ll = |mu: f64, sigma: f64| {
            with_mean_sd(mu, sigma).log_density(&data).unwrap()
        };
        assert_relative_eq!(
            score[0],
            (ll(0.2 + h, 1.3) - ll(0.2 - h, 1.3)) / (2.0 * h),
            epsilon = 1e-5
        );
        assert_relative_eq!(
            score[1],
            (ll(0.2, 1.3 + h) - ll(0.2, 1.3 - h)) / (2.0 * h),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_sampled_moments() {
        let m = with_mean_sd(-2.0, 0.5);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let draws = m.sample_dataset(20_000, &mut rng).unwrap();
        let mean = draws.matrix.column(0).mean();
        assert_relative_eq!(mean, -2.0, epsilon = 0.02);
    }

    #[test]
    fn test_constraint_projects_sigma() {
        let m = model();
        let mut p = Params::from_vector(vec![0.0, -4.0]);
        let moved = m.constraint(&mut p).unwrap();
        assert!(moved > 0.0);
        assert_relative_eq!(p.vector[1], 1e-3, epsilon = 1e-12);
    }
}
