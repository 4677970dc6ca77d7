use int8mm::compare::count_not_close;
use int8mm::{
    double_quantize, init, plain_matmul, quantized_matmul, DenseMatrix, MatmulConfig, MatmulError, MatmulState, WeightCache, WeightLayout,
};
use pretty_assertions::assert_eq;
use rand::rngs::SmallRng;
use rand::SeedableRng;

fn operands(seed: u64, outliers: bool) -> (DenseMatrix, DenseMatrix) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut a = init::randn(64, 64, &mut rng);
    if outliers {
        let cols = init::random_columns(64, 8, &mut rng);
        init::fill_columns(&mut a, &cols, 6.0);
    }
    (a, init::xavier_uniform(64, 64, &mut rng))
}

fn assert_within_bounds(out: &DenseMatrix, reference: &DenseMatrix) {
    let n = out.len() as f64;
    assert!((count_not_close(out, reference, 0.01, 0.1) as f64) < n * 0.0175);
    assert!((count_not_close(out, reference, 0.035, 0.2) as f64) < n * 0.001);
}

fn inference_config(threshold: f32) -> MatmulConfig {
    MatmulConfig::new(threshold, false).unwrap()
}

#[test]
fn first_inference_call_populates_cache_once() {
    let (a, b) = operands(1, false);
    let mut state = MatmulState::new(inference_config(0.0)).unwrap();
    assert_eq!(state.cache(), &WeightCache::Uncached);
    let first = quantized_matmul(&a, &b, &mut state).unwrap();
    assert!(state.is_cached());
    let cached = state.cached().unwrap().clone();

    // a different weight of the same shape hits the cache and is not re-quantized
    let (_, other_b) = operands(2, false);
    let second = quantized_matmul(&a, &other_b, &mut state).unwrap();
    assert_eq!(first, second);
    assert_eq!(state.cached().unwrap(), &cached);
}

#[test]
fn training_mode_never_caches() {
    let (a, b) = operands(3, false);
    let mut state = MatmulState::new(MatmulConfig::new(0.0, true).unwrap()).unwrap();
    quantized_matmul(&a, &b, &mut state).unwrap();
    quantized_matmul(&a, &b, &mut state).unwrap();
    assert!(!state.is_cached());
    assert_eq!(state.forward_cached(&a).unwrap_err(), MatmulError::NotCached);
}

#[test]
fn cached_path_matches_fresh_path() {
    for (seed, threshold, outliers) in [(10, 0.0, false), (11, 6.0, true)] {
        let (a, b) = operands(seed, outliers);
        let mut fresh = MatmulState::new(MatmulConfig::new(threshold, true).unwrap()).unwrap();
        let mut cached = MatmulState::new(inference_config(threshold)).unwrap();
        let out_fresh = quantized_matmul(&a, &b, &mut fresh).unwrap();
        let out_cached = quantized_matmul(&a, &b, &mut cached).unwrap();
        assert_within_bounds(&out_cached, &out_fresh);
        assert_within_bounds(&out_cached, &plain_matmul(&a, &b).unwrap());
    }
}

#[test]
fn zero_threshold_cache_is_bit_identical_to_fresh() {
    // both paths quantize B per column the same way when nothing is decomposed
    let (a, b) = operands(12, false);
    let mut fresh = MatmulState::new(MatmulConfig::new(0.0, true).unwrap()).unwrap();
    let mut cached = MatmulState::new(inference_config(0.0)).unwrap();
    assert_eq!(quantized_matmul(&a, &b, &mut fresh).unwrap(), quantized_matmul(&a, &b, &mut cached).unwrap());
}

#[test]
fn prepopulated_state_skips_quantization() {
    let (a, b) = operands(13, false);
    let dq = double_quantize(&b).unwrap();
    let mut state = MatmulState::with_cached_weight(inference_config(0.0), dq, WeightLayout::InnerMajor).unwrap();
    assert!(state.is_cached());
    let via_call = quantized_matmul(&a, &b, &mut state).unwrap();
    assert_eq!(state.forward_cached(&a).unwrap(), via_call);
}

#[test]
fn output_major_weight_matches_inner_major() {
    // weight stored like a linear layer (n x k) and double-quantized in that layout
    let (a, b) = operands(14, false);
    let w = b.transpose();
    let outer = MatmulState::with_cached_weight(inference_config(0.0), double_quantize(&w).unwrap(), WeightLayout::OuterMajor).unwrap();
    let inner = MatmulState::with_cached_weight(inference_config(0.0), double_quantize(&b).unwrap(), WeightLayout::InnerMajor).unwrap();
    assert_eq!(outer.cached().unwrap().shape(), (64, 64));
    assert_eq!(outer.forward_cached(&a).unwrap(), inner.forward_cached(&a).unwrap());
}

#[test]
fn output_major_weight_with_outliers() {
    let (a, b) = operands(15, true);
    let w = b.transpose();
    let mut state = MatmulState::with_cached_weight(inference_config(6.0), double_quantize(&w).unwrap(), WeightLayout::OuterMajor).unwrap();
    let out = quantized_matmul(&a, &b, &mut state).unwrap();
    assert_within_bounds(&out, &plain_matmul(&a, &b).unwrap());
}

#[test]
fn cached_shape_change_is_rejected() {
    let mut rng = SmallRng::seed_from_u64(16);
    let a = init::randn(8, 32, &mut rng);
    let b = init::xavier_uniform(32, 16, &mut rng);
    let mut state = MatmulState::new(inference_config(0.0)).unwrap();
    quantized_matmul(&a, &b, &mut state).unwrap();

    let a2 = init::randn(8, 24, &mut rng);
    let b2 = init::xavier_uniform(24, 16, &mut rng);
    assert_eq!(
        quantized_matmul(&a2, &b2, &mut state).unwrap_err(),
        MatmulError::CachedShapeMismatch { cached: (32, 16), given: (24, 16) }
    );

    state.reset();
    assert!(!state.is_cached());
    assert_eq!(quantized_matmul(&a2, &b2, &mut state).unwrap().shape(), (8, 16));
}

#[test]
fn cached_reads_can_run_concurrently() {
    let (a, b) = operands(17, false);
    let mut state = MatmulState::new(inference_config(0.0)).unwrap();
    let expected = quantized_matmul(&a, &b, &mut state).unwrap();
    let state = &state;
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4).map(|_| s.spawn(|| state.forward_cached(&a).unwrap())).collect();
        for h in handles { assert_eq!(h.join().unwrap(), expected); }
    });
}

#[test]
fn negative_threshold_fails_state_construction() {
    let cfg = MatmulConfig { threshold: -0.5, ..MatmulConfig::default() };
    assert_eq!(MatmulState::new(cfg).unwrap_err(), MatmulError::InvalidThreshold(-0.5));
}
