//! Empirical distributions: the data is the model.
//!
//! A PMF model treats each row of its dataset as an outcome with mass
//! proportional to its weight (uniform when no weights are attached).
//! Estimation just links the data; nothing is fitted. Drawing builds a
//! cumulative mass table lazily, once, shared across clones of the fitted
//! model.

use std::sync::{Arc, OnceLock};

use rand::{Rng, RngCore};

use mk_core::{Capabilities, Dataset, Error, Model, ModelFamily, ParamShape, Result};

/// Configuration and draw-time cache for the PMF family.
#[derive(Debug, Clone, Default)]
pub struct PmfSettings {
    /// Draw the row index instead of the row's values.
    pub draw_index: bool,
    /// Cumulative weights, built on first draw. Clones share the table.
    cmf: Arc<OnceLock<std::result::Result<Vec<f64>, Error>>>,
}

/// The empirical distribution over the rows of a dataset.
pub struct PmfFamily;

/// An unfitted PMF model; estimate it against data to give it mass.
pub fn model() -> Model {
    Model::new(Arc::new(PmfFamily))
}

/// Total mass of the data: the weight sum, or the row count when no
/// weights are attached.
fn total_mass(data: &Dataset) -> f64 {
    match &data.weights {
        Some(w) => w.iter().sum(),
        None => data.nrows() as f64,
    }
}

fn linked_data(model: &Model) -> Result<&Arc<Dataset>> {
    model.data.as_ref().ok_or_else(|| {
        Error::Structural("PMF model has no data attached, estimate it first".to_string())
    })
}

/// Merge duplicate rows in place, summing their weights. Rows compare
/// with NaN equal to NaN, text included. Unweighted data gains a weight
/// vector (each row starting at one) so the merge has somewhere to
/// accumulate.
pub fn compress(data: &mut Dataset) -> Result<()> {
    let n = data.nrows();
    let mut weights: Vec<f64> = match data.weights.take() {
        Some(w) => w.iter().copied().collect(),
        None => vec![1.0; n],
    };
    let mut cut = vec![false; n];
    for i in 0..n {
        if cut[i] {
            continue;
        }
        for j in (i + 1)..n {
            if !cut[j] && data.rows_equal(i, data, j) {
                weights[i] += weights[j];
                cut[j] = true;
            }
        }
    }
    let kept: Vec<f64> = weights
        .iter()
        .zip(cut.iter())
        .filter(|(_, &c)| !c)
        .map(|(&w, _)| w)
        .collect();
    data.remove_rows(&cut)?;
    data.set_weights(kept)?;
    Ok(())
}

impl ModelFamily for PmfFamily {
    fn name(&self) -> &'static str {
        "PMF"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            estimate: true,
            density: true,
            sample: true,
            ..Capabilities::default()
        }
    }

    fn param_shape(&self, _data: Option<&Dataset>) -> ParamShape {
        ParamShape::vector(0)
    }

    fn draw_size(&self, model: &Model) -> usize {
        if model.settings.get::<PmfSettings>().is_some_and(|s| s.draw_index) {
            return 1;
        }
        model.data.as_ref().map_or(1, |d| d.row_width())
    }

    fn estimate(&self, data: Dataset, model: &mut Model) -> Result<()> {
        if data.nrows() == 0 {
            return Err(Error::Validation("no rows to build a PMF from".to_string()));
        }
        let total = total_mass(&data);
        if !total.is_finite() || total <= 0.0 {
            log::warn!("PMF weights sum to {total}; draws and densities will fail");
            model.error = Some(Error::Weight(format!("weights sum to {total}")));
        }
        let draw_index =
            model.settings.get::<PmfSettings>().is_some_and(|s| s.draw_index);
        // fresh cache: a fitted model never shares a table with its source
        model.settings.insert(PmfSettings { draw_index, ..Default::default() });
        model.data = Some(Arc::new(data));
        Ok(())
    }

    fn density(&self, query: &Dataset, model: &Model) -> Result<f64> {
        if let Some(e) = &model.error {
            return Err(e.clone());
        }
        let data = linked_data(model)?;
        let total = total_mass(data);
        let mut mass = 1.0;
        for qi in 0..query.nrows() {
            let mut found = 0.0;
            for di in 0..data.nrows() {
                if query.rows_equal(qi, data, di) {
                    found = data.weights.as_ref().map_or(1.0, |w| w[di]) / total;
                    break;
                }
            }
            mass *= found;
            if mass == 0.0 {
                break;
            }
        }
        Ok(mass)
    }

    fn sample(&self, out: &mut [f64], rng: &mut dyn RngCore, model: &Model) -> Result<()> {
        if let Some(e) = &model.error {
            return Err(e.clone());
        }
        let data = linked_data(model)?;
        let n = data.nrows();
        let idx = match &data.weights {
            None => rng.gen_range(0..n),
            Some(_) => {
                let settings = model.settings.get::<PmfSettings>().ok_or_else(|| {
                    Error::Structural("PMF model lost its settings group".to_string())
                })?;
                let cmf = settings
                    .cmf
                    .get_or_init(|| build_cmf(data))
                    .as_ref()
                    .map_err(|e| e.clone())?;
                let total = *cmf.last().ok_or_else(|| {
                    Error::Structural("empty cumulative mass table".to_string())
                })?;
                let u: f64 = rng.gen::<f64>() * total;
                cmf.partition_point(|&c| c <= u).min(n - 1)
            }
        };
        let values = data.row_values(idx);
        if model.settings.get::<PmfSettings>().is_some_and(|s| s.draw_index) {
            out[0] = idx as f64;
        } else {
            out.copy_from_slice(&values);
        }
        Ok(())
    }
}

fn build_cmf(data: &Dataset) -> std::result::Result<Vec<f64>, Error> {
    let w = data
        .weights
        .as_ref()
        .ok_or_else(|| Error::Structural("cumulative table needs weights".to_string()))?;
    let mut cmf = Vec::with_capacity(w.len());
    let mut acc = 0.0;
    for &v in w.iter() {
        if v < 0.0 || v.is_nan() {
            return Err(Error::Weight(format!("bad weight {v} in PMF data")));
        }
        acc += v;
        cmf.push(acc);
    }
    if acc <= 0.0 {
        return Err(Error::Weight("PMF weights sum to zero".to_string()));
    }
    Ok(cmf)
}
