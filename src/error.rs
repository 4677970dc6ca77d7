use thiserror::Error;

/// Errors raised by quantization, GEMM and state handling.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatmulError {
    #[error("shape mismatch in {op}: left is {left:?}, right is {right:?}")]
    ShapeMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("cached weight has shape {cached:?} (inner, outer) but input weight is {given:?}")]
    CachedShapeMismatch {
        cached: (usize, usize),
        given: (usize, usize),
    },

    #[error("buffer of length {got} cannot back a {rows}x{cols} matrix")]
    InvalidBuffer { rows: usize, cols: usize, got: usize },

    #[error("outlier threshold must be finite and >= 0, got {0}")]
    InvalidThreshold(f32),

    #[error("inner dimension {inner} exceeds the i32 accumulator limit of {max}")]
    InnerDimTooLarge { inner: usize, max: usize },

    #[error("non-finite value {value} at ({row}, {col})")]
    NonFinite { row: usize, col: usize, value: f32 },

    #[error("gradient unavailable: {0}")]
    GradientUnavailable(&'static str),

    #[error("int8 code -128 is outside the symmetric range [-127, 127]")]
    CodeOutOfRange,

    #[error("quantization scales must be finite and > 0")]
    NonPositiveScale,

    #[error("right-hand operand was quantized without its transposed layout")]
    MissingTransposedLayout,

    #[error("state holds no cached weight")]
    NotCached,

    #[error("batched matmul needs at least one matrix")]
    EmptyBatch,
}

pub type Result<T> = std::result::Result<T, MatmulError>;

impl MatmulError {
    pub(crate) fn shape(op: &'static str, left: (usize, usize), right: (usize, usize)) -> Self {
        MatmulError::ShapeMismatch { op, left, right }
    }
}
