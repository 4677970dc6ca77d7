//! Forward/backward entry points for an external differentiation host.
//!
//! Gradients are computed against what the forward pass actually used: the
//! dequantized activation (with exact outliers added back) and the
//! dequantized weight. They carry quantization noise and only agree with a
//! full-precision backward statistically.

use crate::error::{MatmulError, Result};
use crate::matmul::{plain_matmul, run_decomposed};
use crate::matrix::DenseMatrix;
use crate::state::MatmulState;

/// Which inputs the host wants gradients for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeedsGrad {
    pub a: bool,
    pub b: bool,
}

impl NeedsGrad {
    pub const NONE: Self = Self { a: false, b: false };
    pub const A: Self = Self { a: true, b: false };
    pub const B: Self = Self { a: false, b: true };
    pub const BOTH: Self = Self { a: true, b: true };

    pub fn any(&self) -> bool { self.a || self.b }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gradients {
    pub grad_a: Option<DenseMatrix>,
    pub grad_b: Option<DenseMatrix>,
}

/// Tensors saved by the forward pass for the backward pass.
#[derive(Debug, Clone)]
pub struct Context {
    a_hat: DenseMatrix,
    b_hat: DenseMatrix,
    weight_trainable: bool,
}

impl Context {
    pub fn a_hat(&self) -> &DenseMatrix { &self.a_hat }
    pub fn b_hat(&self) -> &DenseMatrix { &self.b_hat }

    /// `dA = G · B̂ᵀ`, `dB = Âᵀ · G`.
    pub fn backward(&self, grad_output: &DenseMatrix, needs: NeedsGrad) -> Result<Gradients> {
        let expected = (self.a_hat.rows(), self.b_hat.cols());
        if grad_output.shape() != expected {
            return Err(MatmulError::shape("backward", expected, grad_output.shape()));
        }
        if needs.b && !self.weight_trainable {
            return Err(MatmulError::GradientUnavailable("weight is cached as int8 (has_fp16_weights = false)"));
        }
        let grad_a = if needs.a {
            Some(plain_matmul(grad_output, &self.b_hat.transpose())?.with_dtype(self.a_hat.dtype()))
        } else {
            None
        };
        let grad_b = if needs.b {
            Some(plain_matmul(&self.a_hat.transpose(), grad_output)?.with_dtype(self.b_hat.dtype()))
        } else {
            None
        };
        Ok(Gradients { grad_a, grad_b })
    }
}

/// Decomposed int8 forward; same as [`crate::quantized_matmul`].
pub fn forward(a: &DenseMatrix, b: &DenseMatrix, state: &mut MatmulState) -> Result<DenseMatrix> {
    crate::matmul::quantized_matmul(a, b, state)
}

/// Forward pass that also returns the context needed by [`Context::backward`].
pub fn forward_with_context(a: &DenseMatrix, b: &DenseMatrix, state: &mut MatmulState) -> Result<(DenseMatrix, Context)> {
    let config = *state.config();
    let w = state.prepare(b)?;
    let (out, d) = run_decomposed(a, &w, &config)?;
    let mut b_hat = w.reconstruct();
    if let Some(dt) = w.dtype() { b_hat = b_hat.with_dtype(dt); }
    let ctx = Context { a_hat: d.reconstruct(), b_hat, weight_trainable: w.trainable() };
    Ok((out, ctx))
}

/// One-shot gradients for upstream gradient `grad_output`.
pub fn gradients(a: &DenseMatrix, b: &DenseMatrix, state: &mut MatmulState, grad_output: &DenseMatrix, needs: NeedsGrad) -> Result<Gradients> {
    if !needs.any() { return Ok(Gradients::default()); }
    let (_, ctx) = forward_with_context(a, b, state)?;
    ctx.backward(grad_output, needs)
}
