//! Ordinary least squares and instrumental-variables regression.
//!
//! Both families share the affine data convention: the outcome lives in
//! the dataset's outcome column and the first matrix column holds the
//! constant one for the intercept. [`shape_affine`] rewrites a raw table
//! (outcome in the first matrix column) into that form and is a no-op on
//! data already shaped, so preparing twice is safe.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};
use statrs::distribution::{ContinuousCDF, StudentsT};

use mk_core::{
    Capabilities, Dataset, Error, Model, ModelFamily, ParamShape, Params, Result,
};

/// How an instrument column finds the endogenous column it replaces.
#[derive(Debug, Clone)]
pub enum InstrumentTarget {
    /// Matrix column index in the shaped data.
    Index(usize),
    /// Matrix column name.
    Name(String),
}

/// Instrument columns for two-stage estimation, one target per column.
#[derive(Debug, Clone)]
pub struct Instruments {
    /// One instrument column per endogenous regressor, row-parallel to
    /// the data.
    pub columns: DMatrix<f64>,
    /// Which regressor each column replaces.
    pub targets: Vec<InstrumentTarget>,
}

/// Configuration group for the linear families.
#[derive(Debug, Clone)]
pub struct LinearSettings {
    /// Attach a `<Covariance>` page and per-coefficient tests.
    pub want_cov: bool,
    /// Attach a `<Predicted>` page (observed, predicted, residual).
    pub want_expected: bool,
    /// Instrument columns; only the IV family reads these.
    pub instruments: Option<Instruments>,
    /// Distribution of the regressors, used by the sampler to draw x
    /// before drawing y given x.
    pub input_distribution: Option<Model>,
}

impl Default for LinearSettings {
    fn default() -> Self {
        Self {
            want_cov: true,
            want_expected: true,
            instruments: None,
            input_distribution: None,
        }
    }
}

/// Move the outcome out of the first matrix column and put the intercept's
/// column of ones in its place. No-op when an outcome is already set.
pub fn shape_affine(data: &mut Dataset) -> Result<()> {
    if data.outcome.is_some() {
        return Ok(());
    }
    if data.matrix.ncols() == 0 {
        return Err(Error::Validation(
            "cannot shape an empty table for regression".to_string(),
        ));
    }
    let n = data.matrix.nrows();
    data.outcome = Some(DVector::from_fn(n, |i, _| data.matrix[(i, 0)]));
    for i in 0..n {
        data.matrix[(i, 0)] = 1.0;
    }
    if !data.names.columns.is_empty() {
        data.names.outcome = Some(std::mem::replace(
            &mut data.names.columns[0],
            "1".to_string(),
        ));
    }
    Ok(())
}

/// Scale each row of the design and outcome by the square root of its
/// weight, so least squares on the result is weighted least squares.
fn apply_sqrt_weights(x: &mut DMatrix<f64>, y: &mut DVector<f64>, weights: &DVector<f64>) {
    for i in 0..x.nrows() {
        let s = weights[i].sqrt();
        y[i] *= s;
        for j in 0..x.ncols() {
            x[(i, j)] *= s;
        }
    }
}

struct FitSummary {
    beta: DVector<f64>,
    cov: Option<DMatrix<f64>>,
    sse: f64,
    df: f64,
}

/// Shared post-fit bookkeeping: diagnostics rows, the `<Predicted>` and
/// `<Covariance>` pages, per-coefficient tests, and the data handle.
fn record_fit(model: &mut Model, data: Dataset, fit: FitSummary, settings: &LinearSettings) -> Result<()> {
    let y = data
        .outcome
        .as_ref()
        .ok_or_else(|| Error::Structural("regression data lost its outcome".to_string()))?;
    let n = data.matrix.nrows() as f64;
    let predicted = &data.matrix * &fit.beta;

    if settings.want_expected {
        let mut page = Dataset::new(DMatrix::from_fn(y.len(), 3, |i, j| match j {
            0 => y[i],
            1 => predicted[i],
            _ => y[i] - predicted[i],
        }));
        page.names.columns =
            vec!["observed".to_string(), "predicted".to_string(), "residual".to_string()];
        model.info.add_page("<Predicted>", page);
    }

    // Total sum of squares around the weighted mean, so R squared and SSE
    // measure fit on the same scale when weights are attached.
    let total_w = data.weights.as_ref().map_or(n, |w| w.sum());
    let mean_y = data.weights.as_ref().map_or_else(
        || y.mean(),
        |w| y.iter().zip(w.iter()).map(|(v, wi)| v * wi).sum::<f64>() / total_w,
    );
    let tss: f64 = match &data.weights {
        Some(w) => y
            .iter()
            .zip(w.iter())
            .map(|(v, wi)| wi * (v - mean_y) * (v - mean_y))
            .sum(),
        None => y.iter().map(|v| (v - mean_y) * (v - mean_y)).sum(),
    };
    let r_sq = if tss > 0.0 { 1.0 - fit.sse / tss } else { f64::NAN };
    let p = fit.beta.len() as f64;

    model.info.add_named_scalar("SSE", fit.sse);
    model.info.add_named_scalar("df", fit.df);
    model.info.add_named_scalar("R squared", r_sq);
    model
        .info
        .add_named_scalar("R squared adj", 1.0 - (1.0 - r_sq) * (n - 1.0) / (n - p));

    model.params = Some(Params::from_vector(fit.beta.iter().copied().collect()));

    // The same likelihood log_density reports, so the recorded value honors
    // weights and any configured input distribution.
    let ll = linear_log_density(&data, model)?;
    if ll.is_finite() {
        model.info.add_named_scalar("log likelihood", ll);
    }

    if let Some(cov) = &fit.cov {
        let mut page = Dataset::new(cov.clone());
        page.names.columns = data.names.columns.clone();
        model.info.add_page("<Covariance>", page);
        if fit.df > 0.0 {
            let dist = StudentsT::new(0.0, 1.0, fit.df)
                .map_err(|e| Error::Computation(format!("t distribution: {e}")))?;
            let mut tests = Dataset::new(DMatrix::from_fn(fit.beta.len(), 3, |i, j| {
                let se = cov[(i, i)].max(0.0).sqrt();
                let t = if se > 0.0 { fit.beta[i] / se } else { f64::NAN };
                match j {
                    0 => se,
                    1 => t,
                    _ => 2.0 * (1.0 - dist.cdf(t.abs())),
                }
            }));
            tests.names.columns =
                vec!["std error".to_string(), "t statistic".to_string(), "p value".to_string()];
            tests.names.rows = data.names.columns.clone();
            model.info.add_page("<Tests>", tests);
        }
    }

    model.data = Some(Arc::new(data));
    Ok(())
}

/// Solve the normal equations, inverting the cross-product matrix only
/// when the covariance is wanted.
fn solve_normal_equations(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    want_cov: bool,
) -> Result<FitSummary> {
    let n = x.nrows() as f64;
    let p = x.ncols() as f64;
    let df = n - p;
    if df < 0.0 {
        return Err(Error::Validation(format!(
            "more regressors ({}) than observations ({})",
            x.ncols(),
            x.nrows()
        )));
    }
    let xpx = x.transpose() * x;
    let xpy = x.transpose() * y;
    let (beta, inv) = if want_cov {
        let inv = xpx
            .try_inverse()
            .ok_or_else(|| Error::Computation("design matrix is singular".to_string()))?;
        (&inv * &xpy, Some(inv))
    } else {
        let beta = xpx
            .lu()
            .solve(&xpy)
            .ok_or_else(|| Error::Computation("design matrix is singular".to_string()))?;
        (beta, None)
    };
    let resid = y - x * &beta;
    let sse = resid.dot(&resid);
    let cov = inv.map(|inv| {
        let s_sq = if df > 0.0 { sse / df } else { 0.0 };
        inv * s_sq
    });
    Ok(FitSummary { beta, cov, sse, df })
}

fn settings_or_default(model: &Model) -> LinearSettings {
    model.settings.get::<LinearSettings>().cloned().unwrap_or_default()
}

/// Residuals (actual minus expected outcome) for each row, for shaped or
/// raw data.
fn residuals(data: &Dataset, beta: &DVector<f64>) -> Result<Vec<f64>> {
    if data.matrix.ncols() != beta.len() {
        return Err(Error::Validation(format!(
            "data has {} columns, coefficients expect {}",
            data.matrix.ncols(),
            beta.len()
        )));
    }
    let n = data.matrix.nrows();
    let mut resid = Vec::with_capacity(n);
    for i in 0..n {
        let mut expected = 0.0;
        for j in 0..data.matrix.ncols() {
            expected += data.matrix[(i, j)] * beta[j];
        }
        let actual = match &data.outcome {
            Some(y) => y[i],
            None => {
                // unshaped row: the outcome still sits in column zero, so
                // the dot product charged beta[0] * actual instead of the
                // intercept
                let actual = data.matrix[(i, 0)];
                expected += beta[0] * (1.0 - actual);
                actual
            }
        };
        resid.push(actual - expected);
    }
    Ok(resid)
}

/// The value a row contributes to the design in column `j`: the matrix
/// entry, except that column zero of a raw table stands in for the
/// intercept's one.
fn design_entry(data: &Dataset, i: usize, j: usize) -> f64 {
    if j == 0 && data.outcome.is_none() {
        1.0
    } else {
        data.matrix[(i, j)]
    }
}

/// Log likelihood shared by the linear families: Gaussian errors around
/// the fitted line, with the error spread taken from the data at hand.
fn linear_log_density(data: &Dataset, model: &Model) -> Result<f64> {
    let beta = &model.params_ref()?.vector;
    let resid = residuals(data, beta)?;
    let n = resid.len();
    if n == 0 {
        return Ok(0.0);
    }
    let sigma_sq = resid.iter().map(|r| r * r).sum::<f64>() / n as f64;
    let sigma = sigma_sq.sqrt().max(f64::MIN_POSITIVE);
    let mut ll = 0.0;
    for (i, r) in resid.iter().enumerate() {
        let w = data.weights.as_ref().map_or(1.0, |w| w[i]);
        ll += w * mk_prob::normal::logpdf(*r, 0.0, sigma);
    }
    if let Some(input) = &settings_or_default(model).input_distribution {
        // the regressors alone, without the outcome or weights
        ll += input.log_density(&Dataset::new(data.matrix.clone()))?;
    }
    Ok(ll)
}

/// Gradient of the log likelihood in the coefficients, holding the error
/// spread at its in-sample value: sum over rows of `w r x / sigma^2`.
fn linear_score(data: &Dataset, model: &Model) -> Result<DVector<f64>> {
    let beta = &model.params_ref()?.vector;
    let resid = residuals(data, beta)?;
    let n = resid.len();
    let mut score = DVector::zeros(beta.len());
    if n == 0 {
        return Ok(score);
    }
    let sigma_sq =
        (resid.iter().map(|r| r * r).sum::<f64>() / n as f64).max(f64::MIN_POSITIVE);
    for (i, r) in resid.iter().enumerate() {
        let w = data.weights.as_ref().map_or(1.0, |w| w[i]);
        for j in 0..beta.len() {
            score[j] += w * r * design_entry(data, i, j) / sigma_sq;
        }
    }
    Ok(score)
}

/// Expected outcome for each row: the matrix times the coefficients,
/// written into the outcome column.
fn linear_predict(data: &mut Dataset, model: &Model) -> Result<()> {
    let beta = &model.params_ref()?.vector;
    if data.matrix.ncols() != beta.len() {
        return Err(Error::Validation(format!(
            "data has {} columns, coefficients expect {}",
            data.matrix.ncols(),
            beta.len()
        )));
    }
    data.outcome = Some(&data.matrix * beta);
    Ok(())
}

/// Draw a full observation: x from the configured input distribution,
/// then y from the fitted line plus Gaussian noise at the in-sample
/// error spread. The row comes back as `[y, x...]`.
fn linear_sample(out: &mut [f64], rng: &mut dyn RngCore, model: &Model) -> Result<()> {
    let beta = &model.params_ref()?.vector;
    let settings = settings_or_default(model);
    let input = settings.input_distribution.as_ref().ok_or_else(|| {
        Error::Structural(
            "drawing needs an input distribution for the regressors".to_string(),
        )
    })?;
    if out.len() != beta.len() + 1 {
        return Err(Error::Validation(format!(
            "draw buffer has length {}, expected {}",
            out.len(),
            beta.len() + 1
        )));
    }
    input.sample(&mut out[1..], rng)?;
    let sse = model.info.named_scalar("SSE").ok_or_else(|| {
        Error::Structural("drawing needs a fitted model with an SSE record".to_string())
    })?;
    let n = model.data.as_ref().map_or(0, |d| d.nrows()) as f64;
    let sigma = if n > 0.0 { (sse / n).sqrt() } else { 0.0 };
    let mut y = 0.0;
    for (j, b) in beta.iter().enumerate() {
        y += b * out[j + 1];
    }
    let z: f64 = StandardNormal.sample(rng);
    out[0] = y + sigma * z;
    Ok(())
}

/// Coefficient `index` as a Student-t centered on the estimate with the
/// coefficient's standard error and the residual degrees of freedom.
fn linear_parameter_model(index: usize, model: &Model) -> Result<Model> {
    let beta = &model.params_ref()?.vector;
    if index >= beta.len() {
        return Err(Error::Validation(format!(
            "no coefficient {index}, the model has {}",
            beta.len()
        )));
    }
    let cov = model.info.page("<Covariance>").ok_or_else(|| {
        Error::Structural(
            "parameter distribution needs a fit with covariance enabled".to_string(),
        )
    })?;
    let df = model
        .info
        .named_scalar("df")
        .ok_or_else(|| Error::Structural("fit carries no df record".to_string()))?;
    let se = cov.matrix[(index, index)].max(0.0).sqrt();
    Ok(crate::student_t::with(beta[index], se, df))
}

/// Ordinary least squares. The first matrix column is the intercept's
/// ones; weighted data is handled by square-root weight scaling.
pub struct OlsFamily;

/// An OLS model with no parameters set.
pub fn ols() -> Model {
    Model::new(Arc::new(OlsFamily))
}

impl ModelFamily for OlsFamily {
    fn name(&self) -> &'static str {
        "Ordinary Least Squares"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            estimate: true,
            log_density: true,
            score: true,
            sample: true,
            predict: true,
            parameter_model: true,
            ..Capabilities::default()
        }
    }

    fn param_shape(&self, data: Option<&Dataset>) -> ParamShape {
        ParamShape::vector(data.map_or(0, |d| d.matrix.ncols()))
    }

    fn draw_size(&self, model: &Model) -> usize {
        model.params.as_ref().map_or(1, |p| p.vector.len() + 1)
    }

    fn prep(&self, data: &mut Dataset, model: &mut Model) -> Result<()> {
        shape_affine(data)?;
        model.settings.get_or_insert_with(LinearSettings::default);
        Ok(())
    }

    fn estimate(&self, data: Dataset, model: &mut Model) -> Result<()> {
        let settings = settings_or_default(model);
        let y = data
            .outcome
            .clone()
            .ok_or_else(|| Error::Structural("regression data lost its outcome".to_string()))?;
        let mut xw = data.matrix.clone();
        let mut yw = y;
        if let Some(w) = &data.weights {
            apply_sqrt_weights(&mut xw, &mut yw, w);
        }
        let fit = solve_normal_equations(&xw, &yw, settings.want_cov)?;
        record_fit(model, data, fit, &settings)
    }

    fn log_density(&self, data: &Dataset, model: &Model) -> Result<f64> {
        linear_log_density(data, model)
    }

    fn score(&self, data: &Dataset, model: &Model) -> Result<DVector<f64>> {
        linear_score(data, model)
    }

    fn predict(&self, data: &mut Dataset, model: &Model) -> Result<()> {
        linear_predict(data, model)
    }

    fn sample(&self, out: &mut [f64], rng: &mut dyn RngCore, model: &Model) -> Result<()> {
        linear_sample(out, rng, model)
    }

    fn parameter_model(&self, index: usize, model: &Model) -> Result<Model> {
        linear_parameter_model(index, model)
    }
}

/// Instrumental variables via two-stage substitution: endogenous columns
/// are swapped for their instruments in the moment conditions, giving
/// `(Z'X)^-1 Z'y`. With no instruments configured this is plain OLS.
pub struct IvFamily;

/// An IV model with no parameters set.
pub fn iv() -> Model {
    Model::new(Arc::new(IvFamily))
}

fn resolve_target(target: &InstrumentTarget, data: &Dataset) -> Result<usize> {
    match target {
        InstrumentTarget::Index(i) => {
            if *i == 0 || *i >= data.matrix.ncols() {
                return Err(Error::Validation(format!(
                    "instrument target column {i} out of range"
                )));
            }
            Ok(*i)
        }
        InstrumentTarget::Name(name) => data
            .names
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| {
                Error::Validation(format!("no column named {name} to instrument"))
            }),
    }
}

impl ModelFamily for IvFamily {
    fn name(&self) -> &'static str {
        "Instrumental Variables"
    }

    fn capabilities(&self) -> Capabilities {
        OlsFamily.capabilities()
    }

    fn param_shape(&self, data: Option<&Dataset>) -> ParamShape {
        OlsFamily.param_shape(data)
    }

    fn draw_size(&self, model: &Model) -> usize {
        OlsFamily.draw_size(model)
    }

    fn prep(&self, data: &mut Dataset, model: &mut Model) -> Result<()> {
        OlsFamily.prep(data, model)
    }

    fn estimate(&self, data: Dataset, model: &mut Model) -> Result<()> {
        let mut settings = settings_or_default(model);
        let instruments = match settings.instruments.clone() {
            Some(inst) if inst.columns.ncols() > 0 => inst,
            _ => return OlsFamily.estimate(data, model),
        };
        if settings.want_cov {
            // the OLS covariance formula does not apply to the
            // substituted moment conditions
            log::warn!("covariance is not computed for instrumented fits");
            settings.want_cov = false;
        }
        if instruments.columns.nrows() != data.matrix.nrows() {
            return Err(Error::Validation(format!(
                "instrument columns have {} rows, data has {}",
                instruments.columns.nrows(),
                data.matrix.nrows()
            )));
        }
        if instruments.columns.ncols() != instruments.targets.len() {
            return Err(Error::Validation(format!(
                "{} instrument columns but {} targets",
                instruments.columns.ncols(),
                instruments.targets.len()
            )));
        }
        let y = data
            .outcome
            .clone()
            .ok_or_else(|| Error::Structural("regression data lost its outcome".to_string()))?;
        let mut z = data.matrix.clone();
        for (k, target) in instruments.targets.iter().enumerate() {
            let col = resolve_target(target, &data)?;
            for i in 0..z.nrows() {
                z[(i, col)] = instruments.columns[(i, k)];
            }
        }
        let mut xw = data.matrix.clone();
        let mut zw = z;
        let mut yw = y;
        if let Some(w) = &data.weights {
            let w = w.clone();
            apply_sqrt_weights(&mut xw, &mut yw, &w);
            let mut dummy = DVector::zeros(zw.nrows());
            apply_sqrt_weights(&mut zw, &mut dummy, &w);
        }
        let zpx = zw.transpose() * &xw;
        let zpy = zw.transpose() * &yw;
        let beta = zpx
            .lu()
            .solve(&zpy)
            .ok_or_else(|| Error::Computation("instrumented design is singular".to_string()))?;
        let resid = &yw - &xw * &beta;
        let sse = resid.dot(&resid);
        let df = xw.nrows() as f64 - xw.ncols() as f64;
        record_fit(model, data, FitSummary { beta, cov: None, sse, df }, &settings)
    }

    fn log_density(&self, data: &Dataset, model: &Model) -> Result<f64> {
        linear_log_density(data, model)
    }

    fn score(&self, data: &Dataset, model: &Model) -> Result<DVector<f64>> {
        linear_score(data, model)
    }

    fn predict(&self, data: &mut Dataset, model: &Model) -> Result<()> {
        linear_predict(data, model)
    }

    fn sample(&self, out: &mut [f64], rng: &mut dyn RngCore, model: &Model) -> Result<()> {
        linear_sample(out, rng, model)
    }

    fn parameter_model(&self, index: usize, model: &Model) -> Result<Model> {
        linear_parameter_model(index, model)
    }
}
