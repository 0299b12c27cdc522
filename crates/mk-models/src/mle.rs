//! Maximum-likelihood estimation over any family with a density.
//!
//! [`estimate_mle`] maximizes the log density of the data over the packed
//! parameter vector with L-BFGS. Families with a feasible-region
//! constraint are handled by projection: the objective evaluates at the
//! projected point and adds the projection distance as a penalty, so the
//! optimum the solver reports is always feasible.

use std::sync::{Arc, Mutex};

use nalgebra::DMatrix;

use mk_core::{Dataset, Error, Model, Result};

use crate::optimizer::{
    numeric_gradient, LbfgsOptimizer, ObjectiveFunction, OptimizerConfig, OptimizationResult,
};

/// Stand-in objective value for a log density of negative infinity, so the
/// line search can back off instead of aborting.
const INFEASIBLE_COST: f64 = 1e30;

/// Configuration group for [`estimate_mle`]; attach it to the model's
/// settings to override the defaults.
#[derive(Debug, Clone)]
pub struct MleSettings {
    /// Solver knobs.
    pub config: OptimizerConfig,
    /// Starting point in packed order; the family's current parameters
    /// (when set) are used if absent, else a vector of ones.
    pub starting_point: Option<Vec<f64>>,
    /// Box bounds in packed order; unbounded if absent.
    pub bounds: Option<Vec<(f64, f64)>>,
    /// Estimate the parameter covariance from the numeric Hessian and
    /// attach it as a `<Covariance>` page on the fitted model's info.
    pub want_cov: bool,
}

impl Default for MleSettings {
    fn default() -> Self {
        Self {
            config: OptimizerConfig::default(),
            starting_point: None,
            bounds: None,
            want_cov: false,
        }
    }
}

/// Negative penalized log likelihood over the packed parameters.
///
/// Holds a single probe model behind a mutex so families with internal
/// draw state advance it across evaluations instead of resetting on every
/// call.
struct MleObjective<'a> {
    probe: Mutex<Model>,
    data: &'a Dataset,
}

impl MleObjective<'_> {
    /// Penalized cost at `packed`.
    fn eval_inner(&self, packed: &[f64]) -> Result<f64> {
        let mut probe = self
            .probe
            .lock()
            .map_err(|_| Error::Computation("objective probe mutex poisoned".to_string()))?;
        let mut candidate = probe.params_ref()?.clone();
        candidate.unpack(&nalgebra::DVector::from_column_slice(packed))?;
        let penalty = probe.constraint(&mut candidate)?;
        probe.params = Some(candidate);
        let ll = probe.log_density(self.data)?;
        if ll.is_nan() {
            return Err(Error::Computation(
                "log likelihood is NaN at a feasible point".to_string(),
            ));
        }
        if ll == f64::NEG_INFINITY {
            return Ok(INFEASIBLE_COST + penalty);
        }
        Ok(-ll + penalty)
    }
}

impl ObjectiveFunction for MleObjective<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.eval_inner(params)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let use_score = {
            let probe = self
                .probe
                .lock()
                .map_err(|_| Error::Computation("objective probe mutex poisoned".to_string()))?;
            probe.capabilities().score
        };
        if !use_score {
            return numeric_gradient(self, params);
        }
        let mut probe = self
            .probe
            .lock()
            .map_err(|_| Error::Computation("objective probe mutex poisoned".to_string()))?;
        let mut candidate = probe.params_ref()?.clone();
        candidate.unpack(&nalgebra::DVector::from_column_slice(params))?;
        probe.constraint(&mut candidate)?;
        probe.params = Some(candidate);
        let score = probe.score(self.data)?;
        Ok(score.iter().map(|&g| -g).collect())
    }
}

/// Fit `model` to `data` by maximum likelihood.
///
/// The model must already be prepared (parameters allocated). On return
/// its parameters hold the optimum, its data handle points at `data`, and
/// its info carries a "log likelihood" row; non-convergence is recorded as
/// a non-fatal error mark rather than a failure.
pub fn estimate_mle(data: Dataset, model: &mut Model) -> Result<()> {
    let settings = model.settings.get::<MleSettings>().cloned().unwrap_or_default();
    let n = model.params_ref()?.packed_len();
    if n == 0 {
        return Err(Error::Structural(format!(
            "{}: nothing to optimize, the family has no parameters",
            model.name()
        )));
    }

    let mut start = match &settings.starting_point {
        Some(s) => {
            if s.len() != n {
                return Err(Error::Validation(format!(
                    "starting point has length {}, expected {}",
                    s.len(),
                    n
                )));
            }
            s.clone()
        }
        None => {
            let current = model.params_ref()?;
            if current.is_set() {
                current.pack().iter().copied().collect()
            } else {
                vec![1.0; n]
            }
        }
    };

    // Project the start into the feasible region before handing it to the
    // solver.
    {
        let mut p = model.params_ref()?.clone();
        p.unpack(&nalgebra::DVector::from_column_slice(&start))?;
        model.constraint(&mut p)?;
        start = p.pack().iter().copied().collect();
    }

    let bounds = match &settings.bounds {
        Some(b) => {
            if b.len() != n {
                return Err(Error::Validation(format!(
                    "bounds have length {}, expected {}",
                    b.len(),
                    n
                )));
            }
            b.clone()
        }
        None => vec![(f64::NEG_INFINITY, f64::INFINITY); n],
    };

    let objective = MleObjective { probe: Mutex::new(model.clone()), data: &data };
    let result = LbfgsOptimizer::new(settings.config.clone()).minimize(&objective, &start, &bounds)?;

    apply_fit(model, &result)?;
    if settings.want_cov {
        match hessian_covariance(&objective, &result.parameters) {
            Ok(cov) => {
                let mut page = Dataset::new(cov);
                page.names.title = Some("<Covariance>".to_string());
                model.info.add_page("<Covariance>", page);
            }
            Err(e) => {
                log::warn!("covariance from numeric Hessian unavailable: {e}");
            }
        }
    }
    drop(objective);
    model.data = Some(Arc::new(data));
    Ok(())
}

fn apply_fit(model: &mut Model, result: &OptimizationResult) -> Result<()> {
    let mut fitted = model.params_ref()?.clone();
    fitted.unpack(&nalgebra::DVector::from_column_slice(&result.parameters))?;
    model.constraint(&mut fitted)?;
    model.params = Some(fitted);
    model.info.add_named_scalar("log likelihood", -result.fval);
    if !result.converged {
        log::warn!(
            "{}: optimizer stopped without convergence: {}",
            model.name(),
            result.message
        );
        model.error = Some(Error::Computation(format!(
            "optimizer stopped without convergence: {}",
            result.message
        )));
    }
    Ok(())
}

/// Covariance of the estimates as the inverse of the numeric Hessian of
/// the negative log likelihood at the optimum.
fn hessian_covariance(objective: &MleObjective<'_>, at: &[f64]) -> Result<DMatrix<f64>> {
    let n = at.len();
    let mut h = DMatrix::zeros(n, n);
    let f0 = objective.eval(at)?;
    let step: Vec<f64> = at.iter().map(|v| 1e-4 * v.abs().max(1.0)).collect();
    for i in 0..n {
        for j in i..n {
            let v = if i == j {
                let mut up = at.to_vec();
                up[i] += step[i];
                let mut down = at.to_vec();
                down[i] -= step[i];
                (objective.eval(&up)? - 2.0 * f0 + objective.eval(&down)?)
                    / (step[i] * step[i])
            } else {
                let mut pp = at.to_vec();
                pp[i] += step[i];
                pp[j] += step[j];
                let mut pm = at.to_vec();
                pm[i] += step[i];
                pm[j] -= step[j];
                let mut mp = at.to_vec();
                mp[i] -= step[i];
                mp[j] += step[j];
                let mut mm = at.to_vec();
                mm[i] -= step[i];
                mm[j] -= step[j];
                (objective.eval(&pp)? - objective.eval(&pm)? - objective.eval(&mp)?
                    + objective.eval(&mm)?)
                    / (4.0 * step[i] * step[j])
            };
            h[(i, j)] = v;
            h[(j, i)] = v;
        }
    }
    h.try_inverse()
        .ok_or_else(|| Error::Computation("Hessian is singular at the optimum".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mk_core::{Capabilities, ModelFamily, ParamShape, Params};
    
    /// Normal with both parameters free, likelihood only, to exercise the
    /// generic driver rather than a closed-form estimator.
    struct FreeNormal;

    impl ModelFamily for FreeNormal {
        fn name(&self) -> &'static str {
            "free normal"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities { log_density: true, ..Capabilities::default() }
        }

        fn param_shape(&self, _data: Option<&Dataset>) -> ParamShape {
            ParamShape::vector(2)
        }

        fn log_density(&self, data: &Dataset, model: &Model) -> Result<f64> {
            let p = model.params_ref()?;
            let (mu, sigma) = (p.vector[0], p.vector[1]);
            if sigma <= 0.0 {
                return Ok(f64::NEG_INFINITY);
            }
            let mut ll = 0.0;
            for i in 0..data.nrows() {
                ll += mk_prob::normal::logpdf(data.matrix[(i, 0)], mu, sigma);
            }
            Ok(ll)
        }

        fn constraint(&self, params: &mut Params, _model: &Model) -> Result<f64> {
            crate::constraint::lower_bounds(params, &[(1, 0.0)], 1e-3)
        }
    }

    fn fit(data: &Dataset, settings: Option<MleSettings>) -> Model {
        let mut model = Model::new(Arc::new(FreeNormal));
        if let Some(s) = settings {
            model.settings.insert(s);
        }
        let mut d = data.clone();
        model.prep(&mut d).unwrap();
        estimate_mle(d, &mut model).unwrap();
        model
    }

    #[test]
    fn test_recovers_normal_parameters() {
        let data = Dataset::from_column(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let model = fit(&data, None);
        let p = model.params_ref().unwrap();
        assert_relative_eq!(p.vector[0], 3.0, epsilon = 1e-3);
        // MLE variance divides by n, so sigma = sqrt(2)
        assert_relative_eq!(p.vector[1], 2.0_f64.sqrt(), epsilon = 1e-3);
        assert!(model.info.named_scalar("log likelihood").is_some());
    }

    #[test]
    fn test_covariance_page_when_requested() {
        let data = Dataset::from_column(vec![0.5, 1.5, 2.5, 3.5, 4.5, 5.5]);
        let model = fit(&data, Some(MleSettings { want_cov: true, ..Default::default() }));
        let cov = model.info.page("<Covariance>").unwrap();
        assert_eq!(cov.matrix.nrows(), 2);
        // variance of the mean estimate is sigma^2 / n
        let p = model.params_ref().unwrap();
        let expected = p.vector[1] * p.vector[1] / data.nrows() as f64;
        assert_relative_eq!(cov.matrix[(0, 0)], expected, epsilon = 1e-2);
    }

    #[test]
    fn test_bad_starting_point_length() {
        let data = Dataset::from_column(vec![1.0, 2.0]);
        let mut model = Model::new(Arc::new(FreeNormal));
        model.settings.insert(MleSettings {
            starting_point: Some(vec![1.0]),
            ..Default::default()
        });
        let mut d = data.clone();
        model.prep(&mut d).unwrap();
        assert_eq!(estimate_mle(d, &mut model).unwrap_err().code(), 'v');
    }
}
