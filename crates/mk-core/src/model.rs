//! The polymorphic model descriptor and its family trait.
//!
//! A [`ModelFamily`] implements the behavior of one statistical family
//! (its likelihood, estimator, sampler, ...). A [`Model`] pairs a family
//! with everything instance-specific: parameters, the data it was fitted
//! to, diagnostics, configuration groups, and a non-fatal error mark.
//! Dispatch methods on [`Model`] check capabilities and fill in what can
//! be derived (density from log-density and vice versa) so callers never
//! hit an unimplemented hook unannounced.

use std::fmt;
use std::sync::Arc;

use rand::RngCore;

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::params::{ParamShape, Params};
use crate::settings::SettingsMap;

/// Which hooks a family actually implements.
///
/// The dispatch layer consults this before calling into the family, and
/// derives density from log-density (and the reverse) when only one side
/// is present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Has a native estimation routine.
    pub estimate: bool,
    /// Evaluates the density / mass function directly.
    pub density: bool,
    /// Evaluates the log density directly.
    pub log_density: bool,
    /// Provides an analytic score (gradient of the log density).
    pub score: bool,
    /// Draws observations.
    pub sample: bool,
    /// Fills in expected values for observed rows.
    pub predict: bool,
    /// Describes the distribution of a single fitted parameter.
    pub parameter_model: bool,
}

/// Behavior of one statistical family.
///
/// Every hook except [`ModelFamily::name`], [`ModelFamily::capabilities`],
/// and [`ModelFamily::param_shape`] has a default: preparation is a no-op,
/// the constraint is satisfied everywhere with zero penalty, and the rest
/// report [`Error::Unsupported`]. Families override exactly what their
/// [`Capabilities`] advertise.
pub trait ModelFamily: Send + Sync {
    /// Human-readable family name.
    fn name(&self) -> &'static str;

    /// Which hooks this family implements.
    fn capabilities(&self) -> Capabilities;

    /// Parameter dimensions, possibly derived from the data (a regression
    /// family sizes its coefficient vector from the column count).
    fn param_shape(&self, data: Option<&Dataset>) -> ParamShape;

    /// Width of one drawn observation.
    fn draw_size(&self, _model: &Model) -> usize {
        1
    }

    /// One-time setup before estimation or evaluation: reshape the data,
    /// attach default settings groups.
    fn prep(&self, _data: &mut Dataset, _model: &mut Model) -> Result<()> {
        Ok(())
    }

    /// Fit `model` to `data`, storing parameters and diagnostics.
    fn estimate(&self, _data: Dataset, _model: &mut Model) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{}: no estimation routine",
            self.name()
        )))
    }

    /// Log density of `data` under the model's current parameters.
    fn log_density(&self, _data: &Dataset, _model: &Model) -> Result<f64> {
        Err(Error::Unsupported(format!(
            "{}: no log density",
            self.name()
        )))
    }

    /// Density (or probability mass) of `data`.
    fn density(&self, _data: &Dataset, _model: &Model) -> Result<f64> {
        Err(Error::Unsupported(format!("{}: no density", self.name())))
    }

    /// Gradient of the log density with respect to the packed parameters.
    fn score(&self, _data: &Dataset, _model: &Model) -> Result<nalgebra::DVector<f64>> {
        Err(Error::Unsupported(format!("{}: no score", self.name())))
    }

    /// Draw one observation into `out` (length equals
    /// [`ModelFamily::draw_size`]).
    fn sample(&self, _out: &mut [f64], _rng: &mut dyn RngCore, _model: &Model) -> Result<()> {
        Err(Error::Unsupported(format!("{}: no sampler", self.name())))
    }

    /// Fill in expected values for the rows of `data`.
    fn predict(&self, _data: &mut Dataset, _model: &Model) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{}: no prediction routine",
            self.name()
        )))
    }

    /// Project `params` into the feasible region, returning the distance
    /// moved (zero when already feasible).
    fn constraint(&self, _params: &mut Params, _model: &Model) -> Result<f64> {
        Ok(0.0)
    }

    /// The distribution of fitted parameter `index` (for standard errors
    /// and test statistics).
    fn parameter_model(&self, _index: usize, _model: &Model) -> Result<Model> {
        Err(Error::Unsupported(format!(
            "{}: no parameter model",
            self.name()
        )))
    }
}

/// One statistical model: a family plus parameters, data, diagnostics,
/// configuration, and a non-fatal error mark.
///
/// Cloning produces an independent model with its own parameters and
/// settings; the fitted data is shared behind an [`Arc`].
#[derive(Clone)]
pub struct Model {
    family: Arc<dyn ModelFamily>,
    /// Parameter values; `None` until prepared or set explicitly.
    pub params: Option<Params>,
    /// The data this model was fitted to, if any.
    pub data: Option<Arc<Dataset>>,
    /// Estimation diagnostics as named scalar rows ("log likelihood",
    /// "R squared", ...) plus pages such as `<Covariance>`.
    pub info: Dataset,
    /// Non-fatal error mark left by a routine that produced a usable but
    /// degraded result.
    pub error: Option<Error>,
    /// Attached configuration groups.
    pub settings: SettingsMap,
    prepared: bool,
}

impl Model {
    /// Wrap a family with no parameters or data attached.
    pub fn new(family: Arc<dyn ModelFamily>) -> Self {
        Self {
            family,
            params: None,
            data: None,
            info: Dataset::scalars(),
            error: None,
            settings: SettingsMap::new(),
            prepared: false,
        }
    }

    /// The family name.
    pub fn name(&self) -> &'static str {
        self.family.name()
    }

    /// The family's advertised capabilities.
    pub fn capabilities(&self) -> Capabilities {
        self.family.capabilities()
    }

    /// The family behind this model.
    pub fn family(&self) -> &Arc<dyn ModelFamily> {
        &self.family
    }

    /// True once [`Model::prep`] has run.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Parameters, or a structural error if absent.
    pub fn params_ref(&self) -> Result<&Params> {
        self.params
            .as_ref()
            .ok_or_else(|| Error::Structural(format!("{}: parameters not set", self.name())))
    }

    /// Check that this model is usable for evaluation: parameters must be
    /// present and fully set, unless the family has none at all.
    pub fn require_params(&self) -> Result<()> {
        match &self.params {
            Some(p) => {
                if p.packed_len() == 0 || p.is_set() {
                    Ok(())
                } else {
                    Err(Error::Structural(format!(
                        "{}: parameters allocated but not set",
                        self.name()
                    )))
                }
            }
            None => {
                let shape = self.family.param_shape(self.data.as_deref());
                if shape.packed_len() == 0 {
                    Ok(())
                } else {
                    Err(Error::Structural(format!(
                        "{}: parameters not set",
                        self.name()
                    )))
                }
            }
        }
    }

    /// Run the family's one-time setup against `data` and allocate an
    /// unset parameter block if none is present. Idempotent.
    pub fn prep(&mut self, data: &mut Dataset) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        let family = self.family.clone();
        family.prep(data, self)?;
        if self.params.is_none() {
            self.params = Some(Params::nan(&family.param_shape(Some(data))));
        }
        self.prepared = true;
        Ok(())
    }

    /// Fit a copy of this model to `data`, leaving both `self` and `data`
    /// untouched.
    pub fn estimate(&self, data: &Dataset) -> Result<Model> {
        self.estimate_owned(data.clone())
    }

    /// Fit a copy of this model, consuming `data`. Avoids the defensive
    /// copy of [`Model::estimate`]; preparation may reshape the data in
    /// place before fitting.
    pub fn estimate_owned(&self, mut data: Dataset) -> Result<Model> {
        let mut fitted = self.clone();
        fitted.error = None;
        // re-run setup even when estimating from an already-fitted model;
        // preparation is idempotent on shaped data
        fitted.prepared = false;
        fitted.prep(&mut data)?;
        if !self.family.capabilities().estimate {
            return Err(Error::Unsupported(format!(
                "{}: no estimation routine",
                self.name()
            )));
        }
        let family = fitted.family.clone();
        family.estimate(data, &mut fitted)?;
        Ok(fitted)
    }

    /// Log density of `data` under the current parameters. Falls back to
    /// `ln(density)` when the family only implements the plain density.
    pub fn log_density(&self, data: &Dataset) -> Result<f64> {
        self.require_params()?;
        let caps = self.family.capabilities();
        if caps.log_density {
            self.family.log_density(data, self)
        } else if caps.density {
            Ok(self.family.density(data, self)?.ln())
        } else {
            Err(Error::Unsupported(format!(
                "{}: no density in either form",
                self.name()
            )))
        }
    }

    /// Density (or probability mass) of `data`. Falls back to
    /// `exp(log_density)` when only the log form is implemented.
    pub fn density(&self, data: &Dataset) -> Result<f64> {
        self.require_params()?;
        let caps = self.family.capabilities();
        if caps.density {
            self.family.density(data, self)
        } else if caps.log_density {
            Ok(self.family.log_density(data, self)?.exp())
        } else {
            Err(Error::Unsupported(format!(
                "{}: no density in either form",
                self.name()
            )))
        }
    }

    /// Gradient of the log density with respect to the packed parameters.
    pub fn score(&self, data: &Dataset) -> Result<nalgebra::DVector<f64>> {
        self.require_params()?;
        if !self.family.capabilities().score {
            return Err(Error::Unsupported(format!(
                "{}: no analytic score",
                self.name()
            )));
        }
        self.family.score(data, self)
    }

    /// Width of one drawn observation.
    pub fn draw_size(&self) -> usize {
        self.family.draw_size(self)
    }

    /// Draw one observation into `out`, whose length must equal
    /// [`Model::draw_size`].
    pub fn sample(&self, out: &mut [f64], rng: &mut dyn RngCore) -> Result<()> {
        self.require_params()?;
        if !self.family.capabilities().sample {
            return Err(Error::Unsupported(format!(
                "{}: no sampler",
                self.name()
            )));
        }
        let want = self.family.draw_size(self);
        if out.len() != want {
            return Err(Error::Validation(format!(
                "{}: draw buffer has length {}, expected {}",
                self.name(),
                out.len(),
                want
            )));
        }
        self.family.sample(out, rng, self)
    }

    /// Draw `n` observations into a fresh dataset, one row per draw.
    pub fn sample_dataset(&self, n: usize, rng: &mut dyn RngCore) -> Result<Dataset> {
        let width = self.family.draw_size(self);
        let mut rows = Vec::with_capacity(n);
        let mut buf = vec![0.0; width];
        for _ in 0..n {
            self.sample(&mut buf, rng)?;
            rows.push(buf.clone());
        }
        Dataset::from_rows(rows)
    }

    /// Fill in expected values for the rows of `data`.
    pub fn predict(&self, data: &mut Dataset) -> Result<()> {
        self.require_params()?;
        if !self.family.capabilities().predict {
            return Err(Error::Unsupported(format!(
                "{}: no prediction routine",
                self.name()
            )));
        }
        self.family.predict(data, self)
    }

    /// Project `params` into this model's feasible region, returning the
    /// distance moved (zero when already feasible).
    pub fn constraint(&self, params: &mut Params) -> Result<f64> {
        self.family.constraint(params, self)
    }

    /// The distribution of fitted parameter `index`.
    pub fn parameter_model(&self, index: usize) -> Result<Model> {
        self.require_params()?;
        if !self.family.capabilities().parameter_model {
            return Err(Error::Unsupported(format!(
                "{}: no parameter model",
                self.name()
            )));
        }
        self.family.parameter_model(index, self)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("family", &self.family.name())
            .field("params", &self.params)
            .field("error", &self.error)
            .field("prepared", &self.prepared)
            .finish()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name())?;
        match &self.params {
            Some(p) if p.is_set() => {
                write!(f, "parameters:")?;
                for v in p.pack().iter() {
                    write!(f, " {v:.6}")?;
                }
                writeln!(f)?;
            }
            Some(_) => writeln!(f, "parameters: not yet set")?,
            None => writeln!(f, "parameters: none")?,
        }
        for (i, row_name) in self.info.names.rows.iter().enumerate() {
            if i < self.info.matrix.nrows() {
                writeln!(f, "{row_name}: {:.6}", self.info.matrix[(i, 0)])?;
            }
        }
        if let Some(e) = &self.error {
            writeln!(f, "error mark: {}", e.code())?;
        }
        Ok(())
    }
}
