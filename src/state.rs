//! Weight caching across forward calls.
//!
//! A [`MatmulState`] is created once per logical weight. With
//! `has_fp16_weights = true` it never caches: the weight is re-quantized on
//! every call so its full-precision values stay authoritative. With
//! `has_fp16_weights = false` the first call double-quantizes the weight and
//! moves the state from [`WeightCache::Uncached`] to [`WeightCache::Cached`];
//! every later call reuses that quantization. The cached weight is never
//! mutated after the transition, so `&MatmulState` may be shared across
//! threads for [`MatmulState::forward_cached`]. Going back to `Uncached`
//! requires [`MatmulState::reset`], which is the same as building a new state.

use crate::config::MatmulConfig;
use crate::error::{MatmulError, Result};
use crate::matmul::run_decomposed;
use crate::matrix::{DType, DenseMatrix};
use crate::quant::{self, DoubleQuant, Int8View, OutlierSet, QuantizedMatrix};
use serde::{Deserialize, Serialize};

/// Orientation the cached weight was quantized in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightLayout {
    /// `inner x outer` (k x n), used as `A · B`.
    InnerMajor,
    /// `outer x inner` (n x k), used as `A · Wᵀ` like a linear layer weight.
    OuterMajor,
}

/// Quantized weight owned by a [`MatmulState`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedWeight {
    quant: DoubleQuant,
    layout: WeightLayout,
    // weight outliers in inner x outer coordinates
    outliers: OutlierSet,
}

impl CachedWeight {
    pub fn new(quant: DoubleQuant, layout: WeightLayout) -> Self {
        let outliers = match layout {
            WeightLayout::InnerMajor => quant.outliers().clone(),
            WeightLayout::OuterMajor => quant.outliers().transposed(),
        };
        Self { quant, layout, outliers }
    }

    /// Double-quantize a `k x n` weight.
    pub fn from_weight(b: &DenseMatrix) -> Result<Self> {
        Ok(Self::new(quant::double_quantize(b)?, WeightLayout::InnerMajor))
    }

    /// `(inner, outer)`, i.e. the `k x n` shape of the logical weight.
    pub fn shape(&self) -> (usize, usize) {
        let (r, c) = self.quant.shape();
        match self.layout {
            WeightLayout::InnerMajor => (r, c),
            WeightLayout::OuterMajor => (c, r),
        }
    }

    #[inline] pub fn layout(&self) -> WeightLayout { self.layout }
    #[inline] pub fn double_quant(&self) -> &DoubleQuant { &self.quant }
    #[inline] pub fn weight_outliers(&self) -> &OutlierSet { &self.outliers }

    /// Weight quantized per output column, as `n x k` rows for the GEMM.
    pub fn gemm_operand(&self) -> Int8View<'_> {
        match self.layout {
            WeightLayout::InnerMajor => self.quant.col_view(),
            WeightLayout::OuterMajor => self.quant.row_view(),
        }
    }

    /// Weight quantized per inner row, as `k x n`.
    pub fn inner_rows(&self) -> Int8View<'_> {
        match self.layout {
            WeightLayout::InnerMajor => self.quant.row_view(),
            WeightLayout::OuterMajor => self.quant.col_view(),
        }
    }

    /// Reconstructed rows of the `k x n` weight, outliers included.
    pub fn gather_rows(&self, indices: &[usize]) -> DenseMatrix {
        let mut rows = self.inner_rows().dequantize_rows(indices);
        if !self.outliers.is_empty() {
            for (r, &k) in indices.iter().enumerate() {
                for e in self.outliers.row_entries(k) { rows.set(r, e.col, rows.get(r, e.col) + e.value); }
            }
        }
        rows
    }

    /// Full `k x n` reconstruction.
    pub fn reconstruct(&self) -> DenseMatrix {
        let mut m = self.inner_rows().dequantize();
        for e in self.outliers.entries() { m.set(e.row, e.col, m.get(e.row, e.col) + e.value); }
        m
    }

    fn check_shape(&self, given: (usize, usize)) -> Result<()> {
        if self.shape() != given {
            return Err(MatmulError::CachedShapeMismatch { cached: self.shape(), given });
        }
        Ok(())
    }
}

/// Lifecycle of the weight quantization held by a state.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WeightCache {
    #[default]
    Uncached,
    Cached(CachedWeight),
}

/// Configuration plus the cached weight for one logical weight matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatmulState {
    config: MatmulConfig,
    cache: WeightCache,
}

impl MatmulState {
    pub fn new(config: MatmulConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, cache: WeightCache::Uncached })
    }

    /// Start in the cached state from a caller-computed double quantization.
    pub fn with_cached_weight(config: MatmulConfig, quant: DoubleQuant, layout: WeightLayout) -> Result<Self> {
        config.validate()?;
        if config.has_fp16_weights {
            log::warn!("cached weight supplied with has_fp16_weights = true; it will be ignored");
        }
        Ok(Self { config, cache: WeightCache::Cached(CachedWeight::new(quant, layout)) })
    }

    #[inline] pub fn config(&self) -> &MatmulConfig { &self.config }
    #[inline] pub fn cache(&self) -> &WeightCache { &self.cache }
    #[inline] pub fn is_cached(&self) -> bool { matches!(self.cache, WeightCache::Cached(_)) }

    pub fn cached(&self) -> Option<&CachedWeight> {
        match &self.cache {
            WeightCache::Cached(w) => Some(w),
            WeightCache::Uncached => None,
        }
    }

    /// Drop the cached weight; the next call re-quantizes.
    pub fn reset(&mut self) {
        if self.is_cached() { log::debug!("dropping cached weight"); }
        self.cache = WeightCache::Uncached;
    }

    /// Resolve the weight operand for one call, caching it on first use when
    /// the state is in inference mode.
    pub(crate) fn prepare<'w>(&'w mut self, b: &'w DenseMatrix) -> Result<Weight<'w>> {
        if self.config.has_fp16_weights {
            return Ok(Weight::Fresh { full: b, cols: quant::quantize_columns(b)? });
        }
        if let WeightCache::Uncached = self.cache {
            let w = CachedWeight::from_weight(b)?;
            log::info!("cached int8 weight {}x{}", b.rows(), b.cols());
            self.cache = WeightCache::Cached(w);
        }
        let WeightCache::Cached(w) = &self.cache else { return Err(MatmulError::NotCached) };
        w.check_shape(b.shape())?;
        Ok(Weight::Cached(w))
    }

    /// Run the decomposed matmul against the cached weight only.
    pub fn forward_cached(&self, a: &DenseMatrix) -> Result<DenseMatrix> {
        let w = self.cached().ok_or(MatmulError::NotCached)?;
        run_decomposed(a, &Weight::Cached(w), &self.config).map(|(out, _)| out)
    }
}

/// Weight operand of a single call.
pub(crate) enum Weight<'w> {
    Fresh { full: &'w DenseMatrix, cols: QuantizedMatrix },
    Cached(&'w CachedWeight),
}

impl Weight<'_> {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Weight::Fresh { full, .. } => full.shape(),
            Weight::Cached(w) => w.shape(),
        }
    }

    /// Float type of a full-precision weight; int8 caches carry none.
    pub fn dtype(&self) -> Option<DType> {
        match self {
            Weight::Fresh { full, .. } => Some(full.dtype()),
            Weight::Cached(_) => None,
        }
    }

    pub fn gemm_operand(&self) -> Int8View<'_> {
        match self {
            Weight::Fresh { cols, .. } => cols.view(),
            Weight::Cached(w) => w.gemm_operand(),
        }
    }

    /// Full-precision rows the combiner multiplies outliers against.
    pub fn gather_rows(&self, indices: &[usize]) -> DenseMatrix {
        match self {
            Weight::Fresh { full, .. } => quant::gather_rows(full, indices),
            Weight::Cached(w) => w.gather_rows(indices),
        }
    }

    pub fn weight_outliers(&self) -> Option<&OutlierSet> {
        match self {
            Weight::Fresh { .. } => None,
            Weight::Cached(w) => Some(w.weight_outliers()).filter(|o| !o.is_empty()),
        }
    }

    /// What the GEMM saw of the weight, as a dense `k x n` matrix.
    pub fn reconstruct(&self) -> DenseMatrix {
        match self {
            Weight::Fresh { cols, .. } => cols.dequantize().transpose(),
            Weight::Cached(w) => w.reconstruct(),
        }
    }

    pub fn trainable(&self) -> bool { matches!(self, Weight::Fresh { .. }) }
}
