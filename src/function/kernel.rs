use crate::error::Result;
use crate::function::Arity;
use crate::nn::layers::{ActivationKind, LayerKind};
use crate::tensor::TensorView;

// ===== KERNEL CONTRACT =====

/// One output buffer produced by a kernel's forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelOutput {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
    pub batch_count: usize,
}

/// Everything a kernel sees during backward.
///
/// `outputs` are the kernel's own forward results (pre-activation values when an
/// activation is fused onto the function), and `output_grads[i]` is the gradient
/// of the loss with respect to `outputs[i]`. Outputs nobody consumed arrive as
/// zeros.
pub struct BackwardArgs<'a> {
    pub inputs: &'a [TensorView<'a>],
    pub outputs: &'a [TensorView<'a>],
    pub output_grads: &'a [Vec<f32>],
    pub params: &'a [TensorView<'a>],
}

/// Gradient contributions computed by a kernel.
///
/// `inputs[i]` matches `BackwardArgs::inputs[i]`; `None` means "no contribution".
/// Same for `params`.
#[derive(Debug, Default, Clone)]
pub struct KernelGrads {
    pub inputs: Vec<Option<Vec<f32>>>,
    pub params: Vec<Option<Vec<f32>>>,
}

/// Operator implementation plugged into a [`Function`](crate::Function).
///
/// The engine is agnostic of the math: shapes in, shapes out on forward, and
/// gradients shaped like the inputs (and parameters) on backward.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    fn arity(&self) -> Arity;

    fn forward(
        &self,
        inputs: &[TensorView<'_>],
        params: &[TensorView<'_>],
    ) -> Result<Vec<KernelOutput>>;

    fn backward(&self, args: &BackwardArgs<'_>) -> Result<KernelGrads>;

    /// Whether an activation may be fused onto this kernel's output.
    fn accepts_activation(&self) -> bool {
        false
    }

    /// The activation this kernel computes, if it is a pure activation.
    fn activation(&self) -> Option<Box<dyn Activation>> {
        None
    }

    /// Descriptor used to rebuild the kernel after deserialization.
    fn kind(&self) -> LayerKind;
}

/// Element-wise activation, usable standalone or fused into a function's
/// second kernel slot.
pub trait Activation: Send + Sync {
    fn name(&self) -> &'static str;

    fn forward(&self, x: f32) -> f32;

    /// d(loss)/dx given the input `x`, the output `y` and d(loss)/dy.
    fn backward(&self, x: f32, y: f32, gy: f32) -> f32;

    fn kind(&self) -> ActivationKind;

    fn clone_box(&self) -> Box<dyn Activation>;

    fn apply(&self, xs: &[f32]) -> Vec<f32> {
        xs.iter().map(|&x| self.forward(x)).collect()
    }

    fn apply_backward(&self, xs: &[f32], ys: &[f32], gys: &[f32]) -> Vec<f32> {
        xs.iter()
            .zip(ys)
            .zip(gys)
            .map(|((&x, &y), &gy)| self.backward(x, y, gy))
            .collect()
    }
}
