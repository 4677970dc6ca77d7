pub mod quantize;
pub mod outlier;
pub mod gemm;
pub mod combine;

use crate::config::OutlierPolicy;
use crate::error::Result;
use crate::matrix::DenseMatrix;
use serde::{Deserialize, Serialize};

pub use combine::{add_weight_outliers, combine, combine_gathered, gather_rows};
pub use gemm::{int8_matmul, int8_matmul_nt, int8_product_nt, MAX_INNER_DIM};
pub use outlier::{extract_outliers, extract_outliers_in_place, OutlierEntry, OutlierSet};
pub use quantize::{dequantize, quantize, quantize_columns, Int8View, QuantizedMatrix, Transposed, QMAX};

/// Both int8 layouts of a matrix plus the outliers removed before quantizing.
///
/// `cb`/`scb` quantize the rows, `cbt`/`scbt` the columns (stored transposed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleQuant {
    quant: QuantizedMatrix,
    outliers: OutlierSet,
}

impl DoubleQuant {
    pub(crate) fn from_parts(quant: QuantizedMatrix, outliers: OutlierSet) -> Self {
        debug_assert!(quant.transposed.is_some());
        Self { quant, outliers }
    }

    #[inline] pub fn shape(&self) -> (usize, usize) { self.quant.shape() }
    #[inline] pub fn quantized(&self) -> &QuantizedMatrix { &self.quant }
    #[inline] pub fn outliers(&self) -> &OutlierSet { &self.outliers }

    pub fn cb(&self) -> &[i8] { &self.quant.data }
    pub fn scb(&self) -> &[f32] { &self.quant.row_scale }
    pub fn cbt(&self) -> &[i8] { self.quant.transposed.as_ref().map_or(&[][..], |t| t.data.as_slice()) }
    pub fn scbt(&self) -> &[f32] { self.quant.transposed.as_ref().map_or(&[][..], |t| t.col_scale.as_slice()) }

    pub fn row_view(&self) -> Int8View<'_> { self.quant.view() }

    pub fn col_view(&self) -> Int8View<'_> {
        let (rows, cols) = self.shape();
        Int8View { rows: cols, cols: rows, data: self.cbt(), scale: self.scbt() }
    }

    /// Row-layout dequantization with the outliers added back.
    pub fn reconstruct(&self) -> DenseMatrix {
        let mut m = self.quant.dequantize();
        for e in self.outliers.entries() { m.set(e.row, e.col, m.get(e.row, e.col) + e.value); }
        m
    }
}

/// Quantize `b` along rows and columns in one pass, without outlier extraction.
pub fn double_quantize(b: &DenseMatrix) -> Result<DoubleQuant> {
    double_quantize_with_threshold(b, 0.0, OutlierPolicy::Column)
}

/// Like [`double_quantize`], first moving values at or above `threshold`
/// out of the int8 layouts.
pub fn double_quantize_with_threshold(b: &DenseMatrix, threshold: f32, policy: OutlierPolicy) -> Result<DoubleQuant> {
    let (retained, outliers) = extract_outliers(b, threshold, policy)?;
    let quant = quantize(&retained, true)?;
    Ok(DoubleQuant::from_parts(quant, outliers))
}
