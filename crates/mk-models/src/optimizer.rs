//! Bounded quasi-Newton minimization for the estimation routines.
//!
//! The estimation code expresses its work as an [`ObjectiveFunction`] over
//! a flat parameter vector and hands it to [`LbfgsOptimizer::minimize`]
//! together with per-coordinate box bounds. Bounds are enforced by
//! clamping every point the solver proposes; at an active bound the
//! outward gradient component is zeroed so the line search cannot stall
//! against the box wall.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use mk_core::{Error, Result};

/// Solver knobs for [`LbfgsOptimizer`].
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Iteration cap.
    pub max_iter: u64,
    /// Gradient-norm tolerance.
    pub tol: f64,
    /// Number of stored corrections for the inverse-Hessian approximation.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Where a minimization run ended up.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best parameters found, inside the bounds.
    pub parameters: Vec<f64>,
    /// Objective value at the best parameters.
    pub fval: f64,
    /// Iterations used.
    pub n_iter: u64,
    /// True when the solver met a tolerance, false when it ran out of
    /// iterations or the line search gave up.
    pub converged: bool,
    /// Solver termination message.
    pub message: String,
}

/// A scalar objective over a flat parameter vector.
pub trait ObjectiveFunction: Send + Sync {
    /// Objective value at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at `params`; defaults to [`numeric_gradient`].
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        numeric_gradient(self, params)
    }
}

/// Central-difference gradient of `objective.eval`, with the step for each
/// coordinate scaled to the parameter magnitude.
///
/// This is the default [`ObjectiveFunction::gradient`]; it is public so
/// objectives that only sometimes have an analytic gradient can fall back
/// to it explicitly.
pub fn numeric_gradient(objective: &(impl ObjectiveFunction + ?Sized), at: &[f64]) -> Result<Vec<f64>> {
    let mut grad = vec![0.0; at.len()];
    let mut point = at.to_vec();
    for (i, g) in grad.iter_mut().enumerate() {
        let eps = 1e-8 * at[i].abs().max(1.0);
        point[i] = at[i] + eps;
        let up = objective.eval(&point)?;
        point[i] = at[i] - eps;
        let down = objective.eval(&point)?;
        point[i] = at[i];
        *g = (up - down) / (2.0 * eps);
    }
    Ok(grad)
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

/// Adapter presenting a clamped [`ObjectiveFunction`] to argmin.
struct BoxedProblem<'a> {
    inner: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
}

impl CostFunction for BoxedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        self.inner.eval(&clamped).map_err(argmin::core::Error::new)
    }
}

impl Gradient for BoxedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        let mut g = self.inner.gradient(&clamped).map_err(argmin::core::Error::new)?;

        // Projected gradient: a component pointing out of the box at an
        // active bound is not a descent direction.
        const ACTIVE: f64 = 1e-12;
        for ((gi, &x), &(lo, hi)) in g.iter_mut().zip(&clamped).zip(self.bounds) {
            if (x <= lo + ACTIVE && *gi > 0.0) || (x >= hi - ACTIVE && *gi < 0.0) {
                *gi = 0.0;
            }
        }
        Ok(g)
    }
}

/// L-BFGS with box bounds handled by clamping.
pub struct LbfgsOptimizer {
    config: OptimizerConfig,
}

impl LbfgsOptimizer {
    /// Build an optimizer with the given knobs.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` starting from `init_params`, keeping every
    /// coordinate inside its `(lower, upper)` bound.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }

        // argmin's default cost tolerance sits near machine epsilon, which
        // is too strict at log-likelihood scales.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("bad optimizer tolerance: {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| Error::Validation(format!("bad optimizer cost tolerance: {e}")))?;

        let problem = BoxedProblem { inner: objective, bounds };
        let start = clamp_params(init_params, bounds);
        let res = Executor::new(problem, solver)
            .configure(|state| state.param(start).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("optimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("optimizer returned no parameters".to_string()))?;
        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(OptimizationResult {
            parameters: clamp_params(best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            converged,
            message: termination.to_string(),
        })
    }
}

impl Default for LbfgsOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 4)^2 + 2 (y + 1)^2, minimum at (4, -1)
    struct Bowl;

    impl ObjectiveFunction for Bowl {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            let (x, y) = (params[0], params[1]);
            Ok((x - 4.0).powi(2) + 2.0 * (y + 1.0).powi(2))
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            let (x, y) = (params[0], params[1]);
            Ok(vec![2.0 * (x - 4.0), 4.0 * (y + 1.0)])
        }
    }

    // Same bowl, but relying on the numeric default gradient.
    struct BowlNumeric;

    impl ObjectiveFunction for BowlNumeric {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            Bowl.eval(params)
        }
    }

    #[test]
    fn test_unconstrained_minimum() {
        let result = LbfgsOptimizer::default()
            .minimize(&Bowl, &[0.0, 0.0], &[(-10.0, 10.0), (-10.0, 10.0)])
            .unwrap();
        assert!(result.converged, "status: {}", result.message);
        assert_relative_eq!(result.parameters[0], 4.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], -1.0, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_numeric_gradient_matches_analytic() {
        let g = BowlNumeric.gradient(&[1.0, 2.0]).unwrap();
        let e = Bowl.gradient(&[1.0, 2.0]).unwrap();
        assert_relative_eq!(g[0], e[0], epsilon = 1e-5);
        assert_relative_eq!(g[1], e[1], epsilon = 1e-5);

        let result = LbfgsOptimizer::default()
            .minimize(&BowlNumeric, &[0.0, 0.0], &[(-10.0, 10.0), (-10.0, 10.0)])
            .unwrap();
        assert_relative_eq!(result.parameters[0], 4.0, epsilon = 1e-3);
    }

    #[test]
    fn test_minimum_pinned_at_bound() {
        // unconstrained minimum (4, -1) lies outside x <= 2, y >= 0
        let result = LbfgsOptimizer::default()
            .minimize(&Bowl, &[1.0, 3.0], &[(0.0, 2.0), (0.0, 5.0)])
            .unwrap();
        assert!(result.converged, "status: {}", result.message);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(result.parameters[1], 0.0, epsilon = 1e-6);
        // f(2, 0) = 4 + 2 = 6
        assert_relative_eq!(result.fval, 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bounds_length_mismatch() {
        let err = LbfgsOptimizer::default()
            .minimize(&Bowl, &[0.0, 0.0], &[(-1.0, 1.0)])
            .unwrap_err();
        assert_eq!(err.code(), 'v');
    }
}
