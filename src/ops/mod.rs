// Numeric helpers shared by the layer kernels
pub mod matmul;

pub use matmul::AffineRoutines;

use crate::error::{Result, TideError};
use crate::tensor::TensorView;

/// Ensure two operands share per-item shape and batch count.
pub(crate) fn check_same(op: &str, a: &TensorView<'_>, b: &TensorView<'_>) -> Result<()> {
    if a.shape != b.shape || a.batch_count != b.batch_count {
        return Err(TideError::shape(
            format!("{op}: {:?} x {} vs {:?} x {}", a.shape, a.batch_count, b.shape, b.batch_count),
            a.data.len(),
            b.data.len(),
        ));
    }
    Ok(())
}

pub(crate) fn zip_map(a: &[f32], b: &[f32], f: impl Fn(f32, f32) -> f32) -> Vec<f32> {
    a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()
}
