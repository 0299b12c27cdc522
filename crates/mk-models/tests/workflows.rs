//! End-to-end workflows across families.

use approx::assert_relative_eq;
use rand::SeedableRng;

use mk_core::Dataset;
use mk_models::linear::{self, LinearSettings};
use mk_models::{compose, normal, pmf, student_t, waring};

/// y = 1.5 + 0.5 x with small noise, raw layout.
fn regression_data() -> Dataset {
    let noise = [0.03, -0.01, 0.02, -0.04, 0.01, 0.0, -0.02, 0.01, 0.02, -0.02];
    Dataset::from_rows(
        (0..10)
            .map(|i| {
                let x = i as f64;
                vec![1.5 + 0.5 * x + noise[i], x]
            })
            .collect(),
    )
    .unwrap()
}

#[test]
fn regression_fit_predict_and_parameter_distribution() {
    let fitted = linear::ols().estimate(&regression_data()).unwrap();
    let p = fitted.params_ref().unwrap();
    assert_relative_eq!(p.vector[0], 1.5, epsilon = 0.05);
    assert_relative_eq!(p.vector[1], 0.5, epsilon = 0.02);

    // prediction on new regressors (intercept column of ones)
    let mut fresh = Dataset::from_rows(vec![vec![1.0, 12.0], vec![1.0, 20.0]]).unwrap();
    fitted.predict(&mut fresh).unwrap();
    let y = fresh.outcome.unwrap();
    assert_relative_eq!(y[0], 7.5, epsilon = 0.1);

    // the slope's sampling distribution is a tight Student-t around 0.5
    let slope = fitted.parameter_model(1).unwrap();
    assert_eq!(slope.name(), "t distribution");
    let sp = slope.params_ref().unwrap();
    assert_relative_eq!(sp.vector[0], 0.5, epsilon = 0.02);
    assert!(sp.vector[1] < 0.01);
    assert_eq!(sp.vector[2], 8.0);

    // a clearly false slope is many standard errors away
    assert!((sp.vector[0] - 2.0).abs() / sp.vector[1] > 10.0);
}

#[test]
fn simulate_then_refit_regression() {
    let fitted = linear::ols().estimate(&regression_data()).unwrap();

    // regressor rows resampled from the fitted design itself
    let design = Dataset::new(fitted.data.as_ref().unwrap().matrix.clone());
    let inputs = pmf::model().estimate_owned(design).unwrap();

    let mut with_input = fitted.clone();
    let mut settings = with_input
        .settings
        .get::<LinearSettings>()
        .cloned()
        .unwrap_or_default();
    settings.input_distribution = Some(inputs);
    with_input.settings.insert(settings);

    let mut rng = rand::rngs::StdRng::seed_from_u64(31);
    let sim = with_input.sample_dataset(500, &mut rng).unwrap();
    // drawn rows are [y, 1, x]; rebuild a raw table from y and x
    let raw = Dataset::from_rows(
        (0..sim.nrows())
            .map(|i| vec![sim.matrix[(i, 0)], sim.matrix[(i, 2)]])
            .collect::<Vec<_>>(),
    )
    .unwrap();
    let refit = linear::ols().estimate_owned(raw).unwrap();
    let p0 = fitted.params_ref().unwrap();
    let p1 = refit.params_ref().unwrap();
    assert_relative_eq!(p1.vector[1], p0.vector[1], epsilon = 0.05);
    assert_relative_eq!(p1.vector[0], p0.vector[0], epsilon = 0.1);
}

#[test]
fn empirical_model_of_residuals() {
    let fitted = linear::ols().estimate(&regression_data()).unwrap();
    let predicted = fitted.info.page("<Predicted>").unwrap();
    let residuals: Vec<f64> = (0..predicted.nrows())
        .map(|i| predicted.matrix[(i, 2)])
        .collect();

    let empirical = pmf::model()
        .estimate_owned(Dataset::from_column(residuals.clone()))
        .unwrap();
    let q = Dataset::from_column(vec![residuals[0]]);
    assert!(empirical.density(&q).unwrap() > 0.0);

    let mut rng = rand::rngs::StdRng::seed_from_u64(8);
    let draws = empirical.sample_dataset(200, &mut rng).unwrap();
    for i in 0..draws.nrows() {
        assert!(residuals.iter().any(|&r| r == draws.matrix[(i, 0)]));
    }
}

#[test]
fn compression_preserves_the_distribution() {
    let rows = vec![
        vec![1.0],
        vec![2.0],
        vec![1.0],
        vec![3.0],
        vec![1.0],
        vec![2.0],
    ];
    let mut compact = Dataset::from_rows(rows).unwrap();
    pmf::compress(&mut compact).unwrap();
    assert_eq!(compact.nrows(), 3);
    let compressed = pmf::model().estimate_owned(compact).unwrap();

    // the same distribution written down directly: each distinct value
    // once, weighted by its count
    let mut support = Dataset::from_rows(vec![vec![1.0], vec![2.0], vec![3.0]]).unwrap();
    support.set_weights(vec![3.0, 2.0, 1.0]).unwrap();
    let by_hand = pmf::model().estimate_owned(support).unwrap();

    let mut total = 0.0;
    for v in [1.0, 2.0, 3.0, 4.0] {
        let q = Dataset::from_column(vec![v]);
        let mass = compressed.density(&q).unwrap();
        assert_relative_eq!(by_hand.density(&q).unwrap(), mass, epsilon = 1e-12);
        total += mass;
    }
    // 4.0 is not in the support, so the three atoms carry all the mass
    assert_relative_eq!(total, 1.0, epsilon = 1e-12);
}

#[test]
fn simulate_then_refit_counts() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(19);
    let sim = waring::with(2.4, 0.6).sample_dataset(3_000, &mut rng).unwrap();
    let fitted = waring::model().estimate_owned(sim).unwrap();
    let p = fitted.params_ref().unwrap();
    assert!(p.vector[0] > 1.0);
    assert!(p.vector[1] > 0.0);
    assert_relative_eq!(p.vector[0], 2.4, epsilon = 0.6);
}

#[test]
fn standard_errors_shrink_with_sample_size() {
    fn noisy_line(n: usize) -> Dataset {
        let noise = [0.05, -0.05, 0.03, -0.03];
        Dataset::from_rows(
            (0..n)
                .map(|i| {
                    let x = i as f64;
                    vec![1.5 + 0.5 * x + noise[i % 4], x]
                })
                .collect(),
        )
        .unwrap()
    }
    let small = linear::ols().estimate(&noisy_line(10)).unwrap();
    let large = linear::ols().estimate(&noisy_line(100)).unwrap();
    let se_small = small.parameter_model(1).unwrap().params_ref().unwrap().vector[1];
    let se_large = large.parameter_model(1).unwrap().params_ref().unwrap().vector[1];
    assert!(se_small > 0.0);
    // ten times the observations pin the slope down much more tightly
    assert!(se_large < se_small / 3.0);
}

#[test]
fn composite_objective_noise_shrinks_with_draw_count() {
    fn normalized_spread(draw_count: usize) -> f64 {
        let mut composed = compose::compose(
            normal::with_mean_sd(0.0, 1.0),
            normal::with_mean_sd(0.0, 1.0),
        );
        let mut data = Dataset::from_column(vec![0.0]);
        composed.prep(&mut data).unwrap();
        composed
            .settings
            .get_mut::<mk_models::compose::CompositionSettings>()
            .unwrap()
            .draw_count = draw_count;
        let evals: Vec<f64> = (0..6)
            .map(|_| composed.log_density(&data).unwrap() / draw_count as f64)
            .collect();
        let lo = evals.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = evals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        // every evaluation resamples, so repeated calls disagree
        assert!(hi > lo);
        hi - lo
    }
    // the per-draw objective settles as the batch grows
    assert!(normalized_spread(10_000) < normalized_spread(100) / 2.0);
}

#[test]
fn composition_links_generator_and_likelihood() {
    let mut composed = compose::compose(
        normal::with_mean_sd(0.0, 1.0),
        student_t::with(0.0, 1.0, 5.0),
    );
    let mut data = Dataset::from_column(vec![0.0]);
    composed.prep(&mut data).unwrap();
    assert_eq!(composed.params_ref().unwrap().packed_len(), 5);

    let settings = composed
        .settings
        .get::<mk_models::compose::CompositionSettings>()
        .unwrap()
        .clone();
    settings.seed(4).unwrap();
    let a = composed.log_density(&data).unwrap();
    settings.seed(4).unwrap();
    let b = composed.log_density(&data).unwrap();
    assert_eq!(a, b);
    assert!(a.is_finite());
}
