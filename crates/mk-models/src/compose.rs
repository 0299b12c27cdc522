//! Composition of a generator model with a likelihood model.
//!
//! The composed model's parameter vector is the two sub-models' packed
//! parameters laid end to end (generator first). Its log likelihood is
//! stochastic: draw a batch from the generator at the candidate
//! parameters, then evaluate the likelihood model's log density on that
//! batch. Fitting the composition by maximum likelihood therefore tunes
//! both sub-models at once.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use mk_core::{
    Capabilities, Dataset, Error, Model, ModelFamily, ParamShape, Params, Result,
};

use crate::mle::estimate_mle;

/// Configuration group for a composed model: the two sub-models, the
/// batch size, and the shared draw state.
#[derive(Clone)]
pub struct CompositionSettings {
    /// The model drawn from.
    pub generator: Model,
    /// The model whose log density scores the drawn batch.
    pub likelihood: Model,
    /// Draws per likelihood evaluation.
    pub draw_count: usize,
    /// Draw one batch and reuse it for every evaluation. The objective
    /// becomes deterministic, at the price of optimizing against a single
    /// realization.
    pub reuse_draws: bool,
    rng: Arc<Mutex<StdRng>>,
    cache: Arc<Mutex<Option<Dataset>>>,
}

impl CompositionSettings {
    /// Pair a generator with a likelihood model.
    pub fn new(generator: Model, likelihood: Model) -> Self {
        Self {
            generator,
            likelihood,
            draw_count: 1000,
            reuse_draws: false,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(0))),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Reset the draw stream and discard any cached batch.
    pub fn seed(&self, seed: u64) -> Result<()> {
        *lock(&self.rng)? = StdRng::seed_from_u64(seed);
        *lock(&self.cache)? = None;
        Ok(())
    }
}

fn lock<T>(m: &Arc<Mutex<T>>) -> Result<std::sync::MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| Error::Computation("composition draw state poisoned".to_string()))
}

/// Compose a generator with a likelihood model.
pub fn compose(generator: Model, likelihood: Model) -> Model {
    let mut m = Model::new(Arc::new(CompositionFamily));
    m.settings.insert(CompositionSettings::new(generator, likelihood));
    m
}

/// The composed family; built through [`compose`].
pub struct CompositionFamily;

fn settings(model: &Model) -> Result<&CompositionSettings> {
    model.settings.get::<CompositionSettings>().ok_or_else(|| {
        Error::Structural("composed model has no composition settings attached".to_string())
    })
}

/// Split the composed packed vector back into the two sub-models,
/// returning clones with their parameters set.
fn unpack_into_submodels(
    s: &CompositionSettings,
    packed: &nalgebra::DVector<f64>,
) -> Result<(Model, Model)> {
    let mut generator = s.generator.clone();
    let mut likelihood = s.likelihood.clone();
    let gen_params = generator.params.as_mut().ok_or_else(|| {
        Error::Structural("composition generator has unallocated parameters".to_string())
    })?;
    let ll_params = likelihood.params.as_mut().ok_or_else(|| {
        Error::Structural("composition likelihood has unallocated parameters".to_string())
    })?;
    let split = gen_params.packed_len();
    if packed.len() != split + ll_params.packed_len() {
        return Err(Error::Structural(format!(
            "composed parameter vector has length {}, sub-models expect {}",
            packed.len(),
            split + ll_params.packed_len()
        )));
    }
    gen_params.unpack(&nalgebra::DVector::from_fn(split, |i, _| packed[i]))?;
    let rest = packed.len() - split;
    ll_params.unpack(&nalgebra::DVector::from_fn(rest, |i, _| packed[split + i]))?;
    Ok((generator, likelihood))
}

impl ModelFamily for CompositionFamily {
    fn name(&self) -> &'static str {
        "composed model"
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
        // the real length comes from the sub-models during prep
        ParamShape::vector(0)
    }

    fn draw_size(&self, model: &Model) -> usize {
        settings(model).map_or(1, |s| s.generator.draw_size())
    }

    fn prep(&self, data: &mut Dataset, model: &mut Model) -> Result<()> {
        let mut s = settings(model)?.clone();
        if s.generator.params.is_none() {
            s.generator.params = Some(Params::nan(
                &s.generator.family().param_shape(Some(data)),
            ));
        }
        if s.likelihood.params.is_none() {
            s.likelihood.params = Some(Params::nan(
                &s.likelihood.family().param_shape(Some(data)),
            ));
        }
        let mut packed: Vec<f64> = Vec::new();
        for sub in [&s.generator, &s.likelihood] {
            if let Some(p) = &sub.params {
                packed.extend(p.pack().iter());
            }
        }
        model.params = Some(Params::from_vector(packed));
        model.settings.insert(s);
        Ok(())
    }

    fn estimate(&self, data: Dataset, model: &mut Model) -> Result<()> {
        estimate_mle(data, model)
    }

    fn log_density(&self, _data: &Dataset, model: &Model) -> Result<f64> {
        let s = settings(model)?;
        let packed = model.params_ref()?.pack();
        let (generator, likelihood) = unpack_into_submodels(s, &packed)?;
        let batch = if s.reuse_draws {
            let mut cache = lock(&s.cache)?;
            match cache.as_ref() {
                Some(b) => b.clone(),
                None => {
                    let b = {
                        let mut rng = lock(&s.rng)?;
                        generator.sample_dataset(s.draw_count, &mut *rng)?
                    };
                    *cache = Some(b.clone());
                    b
                }
            }
        } else {
            let mut rng = lock(&s.rng)?;
            generator.sample_dataset(s.draw_count, &mut *rng)?
        };
        likelihood.log_density(&batch)
    }

    fn sample(&self, out: &mut [f64], rng: &mut dyn RngCore, model: &Model) -> Result<()> {
        let s = settings(model)?;
        let packed = model.params_ref()?.pack();
        let (generator, _) = unpack_into_submodels(s, &packed)?;
        generator.sample(out, rng)
    }

    fn constraint(&self, params: &mut Params, model: &Model) -> Result<f64> {
        let s = settings(model)?;
        let packed = params.pack();
        let (mut generator, mut likelihood) = unpack_into_submodels(s, &packed)?;
        let mut penalty = 0.0;
        let mut merged: Vec<f64> = Vec::with_capacity(packed.len());
        if let Some(p) = generator.params.take() {
            let mut p = p;
            penalty += s.generator.constraint(&mut p)?;
            merged.extend(p.pack().iter());
        }
        if let Some(p) = likelihood.params.take() {
            let mut p = p;
            penalty += s.likelihood.constraint(&mut p)?;
            merged.extend(p.pack().iter());
        }
        params.unpack(&nalgebra::DVector::from_vec(merged))?;
        Ok(penalty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn composed_normals() -> Model {
        compose(
            crate::normal::with_mean_sd(1.0, 2.0),
            crate::normal::with_mean_sd(0.0, 1.0),
        )
    }

    #[test]
    fn test_prep_concatenates_parameters() {
        let mut m = composed_normals();
        let mut data = Dataset::from_column(vec![0.0]);
        m.prep(&mut data).unwrap();
        let p = m.params_ref().unwrap();
        assert_eq!(p.packed_len(), 4);
        assert_eq!(p.vector[0], 1.0);
        assert_eq!(p.vector[1], 2.0);
    }

    #[test]
    fn test_log_density_deterministic_after_reseed() {
        let mut m = composed_normals();
        let mut data = Dataset::from_column(vec![0.0]);
        m.prep(&mut data).unwrap();
        let s = m.settings.get::<CompositionSettings>().unwrap().clone();
        s.seed(17).unwrap();
        let a = m.log_density(&data).unwrap();
        s.seed(17).unwrap();
        let b = m.log_density(&data).unwrap();
        assert_relative_eq!(a, b, epsilon = 1e-12);
    }

    #[test]
    fn test_reused_batch_freezes_objective() {
        let mut m = composed_normals();
        let mut data = Dataset::from_column(vec![0.0]);
        m.prep(&mut data).unwrap();
        m.settings
            .get_mut::<CompositionSettings>()
            .unwrap()
            .reuse_draws = true;
        let a = m.log_density(&data).unwrap();
        let b = m.log_density(&data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_constraint_projects_both_submodels() {
        let mut m = composed_normals();
        let mut data = Dataset::from_column(vec![0.0]);
        m.prep(&mut data).unwrap();
        // sigma entries of both normals pushed infeasible
        let mut p = Params::from_vector(vec![0.0, -1.0, 0.0, -2.0]);
        let penalty = m.constraint(&mut p).unwrap();
        assert!(penalty > 0.0);
        assert_relative_eq!(p.vector[1], 1e-3, epsilon = 1e-12);
        assert_relative_eq!(p.vector[3], 1e-3, epsilon = 1e-12);
    }

    #[test]
    fn test_sample_comes_from_generator() {
        let mut m = composed_normals();
        let mut data = Dataset::from_column(vec![0.0]);
        m.prep(&mut data).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(23);
        let draws = m.sample_dataset(10_000, &mut rng).unwrap();
        assert_relative_eq!(draws.matrix.column(0).mean(), 1.0, epsilon = 0.1);
    }

    #[test]
    fn test_missing_settings_reported() {
        let m = Model::new(Arc::new(CompositionFamily));
        let data = Dataset::from_column(vec![0.0]);
        assert_eq!(m.log_density(&data).unwrap_err().code(), 's');
    }
}
