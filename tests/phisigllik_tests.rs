use approx::assert_relative_eq;
use gpds::{
    ErrorKind, EvaluatorConfig, KernelKind, LikelihoodError, LikelihoodResult, Matrix, Vector,
    phisig_loglik_value, phisigllik, phisigllik_per_channel, phisigllik_with_config,
};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn distance_matrix(points: &[f64]) -> Matrix {
    let n = points.len();
    Matrix::from(Array2::from_shape_fn((n, n), |(i, j)| {
        (points[i] - points[j]).abs()
    }))
}

/// Irregular sample points with two noisy output channels.
fn random_problem(n: usize, seed: u64) -> (Matrix, Matrix) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..4.0)).collect();
    points.sort_by(|a, b| a.total_cmp(b));
    let rows: Vec<Vec<f64>> = (0..2)
        .map(|row| {
            points
                .iter()
                .map(|&t| (t + row as f64).sin() + rng.gen_range(-0.1..0.1))
                .collect()
        })
        .collect();
    (Matrix::from_rows(&rows).unwrap(), distance_matrix(&points))
}

fn sample_phisig(kind: KernelKind) -> Vec<f64> {
    match kind {
        KernelKind::Matern | KernelKind::Rbf | KernelKind::GeneralMatern => vec![1.2, 0.9, 0.3],
        KernelKind::RationalQuadratic => vec![1.2, 0.9, 1.6, 0.3],
        KernelKind::Compact1 | KernelKind::Compact2 => vec![1.2, 2.5, 0.3],
        KernelKind::PeriodicMatern => vec![1.2, 0.9, 2.3, 0.3],
    }
}

fn central_difference(f: impl Fn(&[f64]) -> f64, x: &[f64]) -> Vec<f64> {
    (0..x.len())
        .map(|p| {
            let h = 1e-6 * x[p].abs().max(1.0);
            let mut plus = x.to_vec();
            let mut minus = x.to_vec();
            plus[p] += h;
            minus[p] -= h;
            (f(&plus) - f(&minus)) / (2.0 * h)
        })
        .collect()
}

fn assert_gradient_close(analytic: &LikelihoodResult, numeric: &[f64]) {
    assert_eq!(analytic.gradient.len(), numeric.len());
    for (p, (&a, &n)) in analytic.gradient.iter().zip(numeric).enumerate() {
        let scale = a.abs().max(n.abs()).max(1.0);
        assert!(
            (a - n).abs() / scale < 1e-4,
            "gradient entry {p}: analytic {a}, finite difference {n}"
        );
    }
}

#[test]
fn matern_calibration_scenario() {
    init_logging();
    let points: Vec<f64> = (0..10).map(|i| i as f64).collect();
    let yobs = Matrix::row_vector(&points);
    let dist = distance_matrix(&points);
    let phisig = Vector::from(vec![1.0, 0.5, 2.0]);

    let result = phisigllik(&phisig, &yobs, &dist, "matern", None).unwrap();

    assert_relative_eq!(result.value, -44.43196495494328, epsilon = 1e-9);
    assert_eq!(result.gradient.len(), 3);
    assert_relative_eq!(result.gradient[0], 5.43441, max_relative = 1e-4);
    assert_relative_eq!(result.gradient[1], 7.77066, max_relative = 1e-4);
    assert_relative_eq!(result.gradient[2], 16.7644, max_relative = 1e-4);
}

#[test]
fn analytic_gradient_matches_finite_differences_for_every_kernel() {
    init_logging();
    let (yobs, dist) = random_problem(9, 2024);
    for kind in KernelKind::ALL {
        let phisig = sample_phisig(kind);
        let result = phisigllik(&Vector::from(phisig.clone()), &yobs, &dist, kind.name(), None)
            .unwrap_or_else(|err| panic!("{kind} failed: {err}"));
        let numeric = central_difference(
            |x| {
                phisig_loglik_value(&Vector::from_slice(x), &yobs, &dist, kind.name(), None)
                    .unwrap()
            },
            &phisig,
        );
        assert_gradient_close(&result, &numeric);
    }
}

#[test]
fn per_channel_gradient_matches_finite_differences() {
    let (yobs, dist) = random_problem(7, 99);
    let phisig = vec![1.1, 0.8, 0.6, 1.4, 0.25];
    let result =
        phisigllik_per_channel(&Vector::from(phisig.clone()), &yobs, &dist, "rbf", None).unwrap();
    let numeric = central_difference(
        |x| {
            phisigllik_per_channel(&Vector::from_slice(x), &yobs, &dist, "rbf", None)
                .unwrap()
                .value
        },
        &phisig,
    );
    assert_gradient_close(&result, &numeric);
}

#[test]
fn repeated_calls_are_bit_identical() {
    let (yobs, dist) = random_problem(12, 5);
    let phisig = Vector::from(sample_phisig(KernelKind::GeneralMatern));
    let first = phisigllik(&phisig, &yobs, &dist, "generalMatern", None).unwrap();
    let second = phisigllik(&phisig, &yobs, &dist, "generalMatern", None).unwrap();
    assert_eq!(first.value.to_bits(), second.value.to_bits());
    for (a, b) in first.gradient.iter().zip(second.gradient.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn coincident_points_never_produce_nan() {
    init_logging();
    let dist = Matrix::zeros(4, 4);
    let yobs = Matrix::row_vector(&[0.5, 0.5, 0.5, 0.5]);
    let config = EvaluatorConfig {
        nugget: 0.0,
        ..EvaluatorConfig::default()
    };
    for sigma in [0.1, 1e-12] {
        let phisig = Vector::from(vec![1.0, 1.0, sigma]);
        match phisigllik_with_config(&phisig, &yobs, &dist, "rbf", None, &config) {
            Ok(result) => {
                assert!(result.value.is_finite());
                assert!(result.gradient.iter().all(|g| g.is_finite()));
            }
            Err(err) => assert_eq!(err.kind(), ErrorKind::Factorization),
        }
    }
}

#[test]
fn unknown_kernel_fails_before_any_matrix_work() {
    // The shapes are inconsistent too; the kernel name is checked first.
    let yobs = Matrix::row_vector(&[1.0, 2.0, 3.0]);
    let dist = Matrix::zeros(2, 5);
    let err = phisigllik(&Vector::from(vec![1.0, 1.0, 1.0]), &yobs, &dist, "not_a_kernel", None)
        .unwrap_err();
    assert!(matches!(err, LikelihoodError::UnsupportedKernel(ref name) if name == "not_a_kernel"));
    assert_eq!(err.kind(), ErrorKind::UnsupportedKernel);
}

#[test]
fn wrong_phi_length_is_a_shape_error() {
    let (yobs, dist) = random_problem(5, 8);
    for phisig in [vec![1.0, 0.3], vec![1.0, 1.0, 1.0, 0.3]] {
        let err = phisigllik(&Vector::from(phisig), &yobs, &dist, "matern", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }
    let err = phisigllik(
        &Vector::from(vec![1.0, 1.0, 0.3]),
        &yobs,
        &dist,
        "matern",
        Some(0.3),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        LikelihoodError::PhiArity {
            expected: 2,
            found: 3,
            ..
        }
    ));
}

#[test]
fn negative_lengthscale_is_a_domain_error() {
    let (yobs, dist) = random_problem(5, 8);
    let err = phisigllik(&Vector::from(vec![1.0, -0.5, 0.3]), &yobs, &dist, "rbf", None)
        .unwrap_err();
    assert!(matches!(err, LikelihoodError::Domain { index: 1, .. }));
    assert_eq!(err.kind(), ErrorKind::Domain);
}

#[test]
fn asymmetric_distances_are_rejected() {
    let yobs = Matrix::row_vector(&[1.0, 2.0]);
    let dist = Matrix::from_rows(&[[0.0, 1.0], [2.0, 0.0]]).unwrap();
    let err = phisigllik(&Vector::from(vec![1.0, 1.0, 0.5]), &yobs, &dist, "rbf", None)
        .unwrap_err();
    assert!(matches!(
        err,
        LikelihoodError::AsymmetricDistance { row: 0, col: 1 }
    ));
    assert_eq!(err.kind(), ErrorKind::Shape);
}

#[test]
fn results_serialize_to_json() {
    let (yobs, dist) = random_problem(6, 3);
    let result = phisigllik(
        &Vector::from(sample_phisig(KernelKind::Compact2)),
        &yobs,
        &dist,
        "compact2",
        None,
    )
    .unwrap();
    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("\"value\""));
    assert!(json.contains("\"gradient\""));
    let back: LikelihoodResult = serde_json::from_str(&json).unwrap();
    assert_relative_eq!(back.value, result.value, max_relative = 1e-15);
    assert_eq!(back.gradient.len(), result.gradient.len());
    for (a, b) in back.gradient.iter().zip(result.gradient.iter()) {
        assert_relative_eq!(a, b, max_relative = 1e-15);
    }
}

#[test]
fn vanishing_lengthscale_reduces_to_independent_noise() {
    let points = [0.0, 1.0, 2.5, 3.0];
    let y = [0.3, -0.2, 0.5, 0.1];
    let yobs = Matrix::row_vector(&y);
    let dist = distance_matrix(&points);
    let (variance, sigma): (f64, f64) = (1.0, 0.5);
    let c = variance + sigma * sigma + EvaluatorConfig::default().nugget;
    let n = y.len() as f64;
    let sum_sq: f64 = y.iter().map(|v| v * v).sum();
    let expected = -0.5 * (sum_sq / c + n * c.ln() + n * (2.0 * std::f64::consts::PI).ln());

    for kind in KernelKind::ALL {
        let mut phisig = sample_phisig(kind);
        let last = phisig.len() - 1;
        phisig[0] = variance;
        phisig[1] = 1e-160;
        phisig[last] = sigma;
        let result = phisigllik(&Vector::from(phisig), &yobs, &dist, kind.name(), None)
            .unwrap_or_else(|err| panic!("{kind} failed: {err}"));
        assert_relative_eq!(result.value, expected, max_relative = 1e-12);
        assert!(result.gradient.iter().all(|g| g.is_finite()), "{kind}");
        assert_relative_eq!(
            result.gradient[0],
            0.5 * (sum_sq / (c * c) - n / c),
            max_relative = 1e-10
        );
    }
}

#[test]
fn negative_distances_are_a_shape_error() {
    let yobs = Matrix::row_vector(&[1.0, 2.0]);
    let dist = Matrix::from_rows(&[[0.0, -1.0], [-1.0, 0.0]]).unwrap();
    let err = phisigllik(&Vector::from(vec![1.0, 1.0, 0.5]), &yobs, &dist, "rbf", None)
        .unwrap_err();
    assert!(matches!(
        err,
        LikelihoodError::InvalidDistance { row: 0, col: 1, .. }
    ));
    assert_eq!(err.kind(), ErrorKind::Shape);
}
