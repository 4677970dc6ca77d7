use crate::error::{MatmulError, Result};
use half::f16;
use serde::{Deserialize, Serialize};

/// Floating type a dense matrix is carried in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DType {
    #[default]
    F32,
    F16,
}

impl DType {
    /// Round `v` to the nearest value representable in this type.
    #[inline]
    pub fn round(self, v: f32) -> f32 {
        match self {
            DType::F32 => v,
            DType::F16 => f16::from_f32(v).to_f32(),
        }
    }

    /// Result type of a binary op: f16 only when both sides are f16.
    pub fn promote(self, other: DType) -> DType {
        if self == DType::F16 && other == DType::F16 { DType::F16 } else { DType::F32 }
    }
}

/// Row-major 2-D matrix of floats.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
    dtype: DType,
}

impl DenseMatrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(MatmulError::InvalidBuffer { rows, cols, got: data.len() });
        }
        Ok(Self { rows, cols, data, dtype: DType::F32 })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols], dtype: DType::F32 }
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols { data.push(f(i, j)); }
        }
        Self { rows, cols, data, dtype: DType::F32 }
    }

    /// Build from nested rows; every row must have the same length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for r in rows {
            if r.len() != cols {
                return Err(MatmulError::InvalidBuffer { rows: rows.len(), cols, got: r.len() });
            }
            data.extend_from_slice(r);
        }
        Ok(Self { rows: rows.len(), cols, data, dtype: DType::F32 })
    }

    pub fn from_f16(rows: usize, cols: usize, data: &[f16]) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(MatmulError::InvalidBuffer { rows, cols, got: data.len() });
        }
        let data = data.iter().map(|v| v.to_f32()).collect();
        Ok(Self { rows, cols, data, dtype: DType::F16 })
    }

    /// Convert to `dtype`, rounding every value when narrowing to f16.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        if dtype == DType::F16 {
            for v in &mut self.data { *v = DType::F16.round(*v); }
        }
        self.dtype = dtype;
        self
    }

    pub fn to_f16_vec(&self) -> Vec<f16> {
        self.data.iter().map(|&v| f16::from_f32(v)).collect()
    }

    #[inline] pub fn rows(&self) -> usize { self.rows }
    #[inline] pub fn cols(&self) -> usize { self.cols }
    #[inline] pub fn shape(&self) -> (usize, usize) { (self.rows, self.cols) }
    #[inline] pub fn dtype(&self) -> DType { self.dtype }
    #[inline] pub fn len(&self) -> usize { self.data.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.data.is_empty() }
    #[inline] pub fn data(&self) -> &[f32] { &self.data }
    #[inline] pub fn data_mut(&mut self) -> &mut [f32] { &mut self.data }
    pub fn into_data(self) -> Vec<f32> { self.data }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f32 { self.data[i * self.cols + j] }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: f32) { self.data[i * self.cols + j] = v; }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] { &self.data[i * self.cols..(i + 1) * self.cols] }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        let c = self.cols;
        &mut self.data[i * c..(i + 1) * c]
    }

    pub fn transpose(&self) -> Self {
        let mut data = vec![0f32; self.data.len()];
        for i in 0..self.rows {
            for j in 0..self.cols { data[j * self.rows + i] = self.data[i * self.cols + j]; }
        }
        Self { rows: self.cols, cols: self.rows, data, dtype: self.dtype }
    }

    /// Largest magnitude in each row.
    pub fn row_absmax(&self) -> Vec<f32> {
        (0..self.rows)
            .map(|i| self.row(i).iter().fold(0f32, |m, v| m.max(v.abs())))
            .collect()
    }

    /// Elementwise `self += other`.
    pub fn add_assign(&mut self, other: &DenseMatrix) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(MatmulError::shape("add", self.shape(), other.shape()));
        }
        for (a, b) in self.data.iter_mut().zip(&other.data) { *a += *b; }
        Ok(())
    }

    /// Fail on the first NaN or infinity.
    pub fn check_finite(&self) -> Result<()> {
        match self.data.iter().position(|v| !v.is_finite()) {
            None => Ok(()),
            Some(p) => Err(MatmulError::NonFinite { row: p / self.cols.max(1), col: p % self.cols.max(1), value: self.data[p] }),
        }
    }

    /// Stack matrices with equal column counts on top of each other.
    pub fn vstack(parts: &[DenseMatrix]) -> Result<Self> {
        let first = parts.first().ok_or(MatmulError::EmptyBatch)?;
        let cols = first.cols;
        let mut dtype = first.dtype;
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for p in parts {
            if p.cols != cols {
                return Err(MatmulError::shape("vstack", first.shape(), p.shape()));
            }
            dtype = dtype.promote(p.dtype);
            data.extend_from_slice(&p.data);
        }
        let rows = parts.iter().map(|p| p.rows).sum();
        Ok(Self { rows, cols, data, dtype })
    }

    /// Split into consecutive row blocks of the given heights.
    pub fn split_rows(&self, heights: &[usize]) -> Result<Vec<DenseMatrix>> {
        let total: usize = heights.iter().sum();
        if total != self.rows {
            return Err(MatmulError::shape("split_rows", self.shape(), (total, self.cols)));
        }
        let mut out = Vec::with_capacity(heights.len());
        let mut start = 0usize;
        for &h in heights {
            let data = self.data[start * self.cols..(start + h) * self.cols].to_vec();
            out.push(Self { rows: h, cols: self.cols, data, dtype: self.dtype });
            start += h;
        }
        Ok(out)
    }
}
