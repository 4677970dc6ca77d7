use int8mm::quant::{dequantize, quantize, quantize::from_parts, QMAX};
use int8mm::{init, DenseMatrix, MatmulError};
use pretty_assertions::assert_eq;
use rand::rngs::SmallRng;
use rand::SeedableRng;

#[test]
fn round_trip_within_one_step() {
    let mut rng = SmallRng::seed_from_u64(7);
    let m = init::randn(32, 96, &mut rng);
    let q = quantize(&m, false).unwrap();
    let back = dequantize(&q);
    let absmax = m.row_absmax();
    for i in 0..m.rows() {
        let step = 2.0 * absmax[i] / QMAX;
        for j in 0..m.cols() {
            let d = (back.get(i, j) - m.get(i, j)).abs();
            assert!(d <= step, "row {} col {}: error {} above step {}", i, j, d, step);
        }
    }
}

#[test]
fn codes_stay_in_symmetric_range() {
    let mut rng = SmallRng::seed_from_u64(11);
    let mut m = init::randn(16, 16, &mut rng);
    m.set(3, 3, 1e6);
    m.set(4, 4, -1e6);
    let q = quantize(&m, true).unwrap();
    assert!(q.data.iter().all(|&c| (-127..=127).contains(&c)));
    assert!(q.transposed.as_ref().unwrap().data.iter().all(|&c| (-127..=127).contains(&c)));
    assert_eq!(q.data[3 * 16 + 3], 127);
    assert_eq!(q.data[4 * 16 + 4], -127);
}

#[test]
fn zero_row_gets_unit_scale() {
    let m = DenseMatrix::from_rows(&[vec![0.0, 0.0, 0.0], vec![1.0, -2.0, 0.5]]).unwrap();
    let q = quantize(&m, false).unwrap();
    assert_eq!(q.row_scale, vec![1.0, 2.0]);
    assert_eq!(&q.data[..3], &[0, 0, 0]);
    assert_eq!(&q.data[3..], &[64, -127, 32]);
}

#[test]
fn transposed_layout_uses_column_absmax() {
    let m = DenseMatrix::from_rows(&[vec![1.0, -4.0], vec![-3.0, 2.0], vec![0.5, 0.0]]).unwrap();
    let q = quantize(&m, true).unwrap();
    let t = q.transposed.as_ref().unwrap();
    assert_eq!(t.col_scale, vec![3.0, 4.0]);
    assert_eq!(t.data.len(), 6);
    // column 1 of m is row 1 of the transposed codes
    assert_eq!(&t.data[3..], &[-127, 64, 0]);
    let view = q.transposed_view().unwrap();
    assert_eq!((view.rows, view.cols), (2, 3));
}

#[test]
fn quantization_is_deterministic() {
    let mut rng = SmallRng::seed_from_u64(3);
    let m = init::randn(20, 40, &mut rng);
    assert_eq!(quantize(&m, true).unwrap(), quantize(&m, true).unwrap());
}

#[test]
fn non_finite_input_is_rejected() {
    let m = DenseMatrix::from_rows(&[vec![1.0, f32::NAN]]).unwrap();
    assert!(matches!(quantize(&m, false), Err(MatmulError::NonFinite { row: 0, col: 1, .. })));
}

#[test]
fn from_parts_checks_invariants() {
    assert_eq!(from_parts(1, 2, vec![-128, 0], vec![1.0], None).unwrap_err(), MatmulError::CodeOutOfRange);
    assert_eq!(from_parts(1, 2, vec![1, 0], vec![0.0], None).unwrap_err(), MatmulError::NonPositiveScale);
    assert_eq!(from_parts(1, 2, vec![1, 0], vec![f32::INFINITY], None).unwrap_err(), MatmulError::NonPositiveScale);
    assert_eq!(from_parts(1, 2, vec![1, 0], vec![f32::NAN], None).unwrap_err(), MatmulError::NonPositiveScale);
    assert!(from_parts(1, 2, vec![1], vec![1.0], None).is_err());
    assert!(from_parts(1, 2, vec![1, 2], vec![1.0], None).is_ok());
}
