use int8mm::compare::count_not_close;
use int8mm::quant::{int8_matmul, quantize};
use int8mm::{init, plain_matmul, quantized_matmul, DType, DenseMatrix, MatmulConfig, MatmulState, OutlierPolicy};
use pretty_assertions::assert_eq;
use rand::rngs::SmallRng;
use rand::SeedableRng;

fn assert_within_bounds(out: &DenseMatrix, reference: &DenseMatrix, label: &str) {
    let n = out.len() as f64;
    let loose = count_not_close(out, reference, 0.01, 0.1);
    assert!((loose as f64) < n * 0.0175, "{}: {} of {} outside atol 0.01 rtol 0.1", label, loose, n);
    let wide = count_not_close(out, reference, 0.035, 0.2);
    assert!((wide as f64) < n * 0.001, "{}: {} of {} outside atol 0.035 rtol 0.2", label, wide, n);
}

fn operands(seed: u64, outliers: bool) -> (DenseMatrix, DenseMatrix) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut a = init::randn(64, 64, &mut rng);
    if outliers {
        let cols = init::random_columns(64, 64 / 8, &mut rng);
        init::fill_columns(&mut a, &cols, 6.0);
    }
    let b = init::xavier_uniform(64, 64, &mut rng);
    (a, b)
}

#[test]
fn zero_threshold_matches_plain_int8_path() {
    let (a, b) = operands(1, false);
    let mut state = MatmulState::new(MatmulConfig::new(0.0, true).unwrap()).unwrap();
    let out = quantized_matmul(&a, &b, &mut state).unwrap();
    let direct = int8_matmul(&quantize(&a, false).unwrap(), &quantize(&b, true).unwrap()).unwrap();
    assert_eq!(out, direct);
}

#[test]
fn threshold_never_reached_matches_zero_threshold() {
    let (a, b) = operands(2, false);
    let mut s0 = MatmulState::new(MatmulConfig::new(0.0, true).unwrap()).unwrap();
    let mut s1 = MatmulState::new(MatmulConfig::new(100.0, true).unwrap()).unwrap();
    assert_eq!(quantized_matmul(&a, &b, &mut s0).unwrap(), quantized_matmul(&a, &b, &mut s1).unwrap());
}

#[test]
fn accuracy_without_outliers() {
    for seed in 0..5 {
        let (a, b) = operands(100 + seed, false);
        let reference = plain_matmul(&a, &b).unwrap();
        let mut state = MatmulState::new(MatmulConfig::new(0.0, true).unwrap()).unwrap();
        let out = quantized_matmul(&a, &b, &mut state).unwrap();
        assert_within_bounds(&out, &reference, "no outliers");
    }
}

#[test]
fn decomposition_compensates_injected_outliers() {
    for seed in 0..5 {
        let (a, b) = operands(200 + seed, true);
        let reference = plain_matmul(&a, &b).unwrap();
        let mut state = MatmulState::new(MatmulConfig::new(6.0, true).unwrap()).unwrap();
        let out = quantized_matmul(&a, &b, &mut state).unwrap();
        assert_within_bounds(&out, &reference, "outliers, threshold 6");
    }
}

#[test]
fn element_policy_also_compensates_outliers() {
    let (a, b) = operands(300, true);
    let reference = plain_matmul(&a, &b).unwrap();
    let cfg = MatmulConfig::new(6.0, true).unwrap().with_policy(OutlierPolicy::Element);
    let mut state = MatmulState::new(cfg).unwrap();
    let out = quantized_matmul(&a, &b, &mut state).unwrap();
    assert_within_bounds(&out, &reference, "element policy");
}

#[test]
fn f16_operands_produce_f16_output() {
    let (a, b) = operands(400, false);
    let a = a.with_dtype(DType::F16);
    let b = b.with_dtype(DType::F16);
    let reference = plain_matmul(&a, &b).unwrap();
    let mut state = MatmulState::new(MatmulConfig::new(0.0, true).unwrap()).unwrap();
    let out = quantized_matmul(&a, &b, &mut state).unwrap();
    assert_eq!(out.dtype(), DType::F16);
    assert!(out.data().iter().all(|&v| DType::F16.round(v) == v));
    assert_within_bounds(&out, &reference, "f16");
}

#[test]
fn transposed_operand_variants() {
    // operands stored in the other orientation and transposed before the call
    let mut rng = SmallRng::seed_from_u64(500);
    let a = init::randn(48, 80, &mut rng);
    let a_stored_t = init::randn(80, 48, &mut rng);
    let b = init::xavier_uniform(80, 32, &mut rng);
    let b_stored_t = init::xavier_uniform(32, 80, &mut rng);
    let cfg = MatmulConfig::new(0.0, true).unwrap();
    let cases = [
        ("NN", a.clone(), b.clone()),
        ("NT", a.clone(), b_stored_t.transpose()),
        ("TN", a_stored_t.transpose(), b.clone()),
        ("TT", a_stored_t.transpose(), b_stored_t.transpose()),
    ];
    for (label, x, y) in cases {
        let reference = plain_matmul(&x, &y).unwrap();
        let mut state = MatmulState::new(cfg).unwrap();
        let out = quantized_matmul(&x, &y, &mut state).unwrap();
        assert_eq!(out.shape(), (48, 32));
        assert_within_bounds(&out, &reference, label);
    }
}

#[test]
fn inner_mismatch_is_rejected() {
    let a = DenseMatrix::zeros(4, 5);
    let b = DenseMatrix::zeros(6, 3);
    let mut state = MatmulState::default();
    assert!(quantized_matmul(&a, &b, &mut state).is_err());
    assert!(plain_matmul(&a, &b).is_err());
}
