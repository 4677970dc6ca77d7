// Mixed-precision int8 matmul with outlier decomposition
pub mod error;
pub mod matrix;
pub mod config;
pub mod quant;
pub mod state;
pub mod matmul;
pub mod autograd;
pub mod cache_file;
pub mod compare;
pub mod init;

pub use autograd::{forward, forward_with_context, gradients, Context, Gradients, NeedsGrad};
pub use config::{MatmulConfig, OutlierPolicy};
pub use error::{MatmulError, Result};
pub use matmul::{plain_bmm, plain_matmul, quantized_bmm, quantized_matmul, quantized_matmul_batched};
pub use matrix::{DType, DenseMatrix};
pub use quant::{double_quantize, double_quantize_with_threshold, DoubleQuant, OutlierSet, QuantizedMatrix};
pub use state::{CachedWeight, MatmulState, WeightCache, WeightLayout};
