use crate::error::Result;
use crate::function::{Activation, Arity, BackwardArgs, Kernel, KernelGrads, KernelOutput};
use crate::nn::layers::{ActivationKind, LayerKind};
use crate::tensor::TensorView;

/// max(0, x)
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

/// x for x > 0, slope * x otherwise
#[derive(Debug, Clone, Copy)]
pub struct LeakyReLU {
    slope: f32,
}

impl LeakyReLU {
    #[must_use]
    pub fn new(slope: f32) -> Self {
        LeakyReLU { slope }
    }
}

impl Default for LeakyReLU {
    fn default() -> Self {
        LeakyReLU::new(0.2)
    }
}

/// 1 / (1 + e^-x)
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl Activation for ReLU {
    fn name(&self) -> &'static str {
        "ReLU"
    }

    fn forward(&self, x: f32) -> f32 {
        x.max(0.0)
    }

    fn backward(&self, x: f32, _y: f32, gy: f32) -> f32 {
        if x > 0.0 { gy } else { 0.0 }
    }

    fn kind(&self) -> ActivationKind {
        ActivationKind::ReLU
    }

    fn clone_box(&self) -> Box<dyn Activation> {
        Box::new(*self)
    }
}

impl Activation for LeakyReLU {
    fn name(&self) -> &'static str {
        "LeakyReLU"
    }

    fn forward(&self, x: f32) -> f32 {
        if x > 0.0 { x } else { self.slope * x }
    }

    fn backward(&self, x: f32, _y: f32, gy: f32) -> f32 {
        if x > 0.0 { gy } else { self.slope * gy }
    }

    fn kind(&self) -> ActivationKind {
        ActivationKind::LeakyReLU { slope: self.slope }
    }

    fn clone_box(&self) -> Box<dyn Activation> {
        Box::new(*self)
    }
}

impl Activation for Sigmoid {
    fn name(&self) -> &'static str {
        "Sigmoid"
    }

    fn forward(&self, x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    // σ'(x) = σ(x)(1 - σ(x)) = y(1 - y)
    fn backward(&self, _x: f32, y: f32, gy: f32) -> f32 {
        gy * y * (1.0 - y)
    }

    fn kind(&self) -> ActivationKind {
        ActivationKind::Sigmoid
    }

    fn clone_box(&self) -> Box<dyn Activation> {
        Box::new(*self)
    }
}

impl Activation for Tanh {
    fn name(&self) -> &'static str {
        "Tanh"
    }

    fn forward(&self, x: f32) -> f32 {
        x.tanh()
    }

    fn backward(&self, _x: f32, y: f32, gy: f32) -> f32 {
        gy * (1.0 - y * y)
    }

    fn kind(&self) -> ActivationKind {
        ActivationKind::Tanh
    }

    fn clone_box(&self) -> Box<dyn Activation> {
        Box::new(*self)
    }
}

/// Standalone single-input kernel for an activation.
macro_rules! activation_kernel {
    ($($ty:ty),* $(,)?) => {$(
        impl Kernel for $ty {
            fn name(&self) -> &str {
                Activation::name(self)
            }

            fn arity(&self) -> Arity {
                Arity::SingleInput
            }

            fn forward(
                &self,
                inputs: &[TensorView<'_>],
                _params: &[TensorView<'_>],
            ) -> Result<Vec<KernelOutput>> {
                let x = &inputs[0];
                Ok(vec![KernelOutput {
                    data: self.apply(x.data),
                    shape: x.shape.to_vec(),
                    batch_count: x.batch_count,
                }])
            }

            fn backward(&self, args: &BackwardArgs<'_>) -> Result<KernelGrads> {
                let gx = self.apply_backward(
                    args.inputs[0].data,
                    args.outputs[0].data,
                    &args.output_grads[0],
                );
                Ok(KernelGrads {
                    inputs: vec![Some(gx)],
                    params: Vec::new(),
                })
            }

            fn activation(&self) -> Option<Box<dyn Activation>> {
                Some(self.clone_box())
            }

            fn kind(&self) -> LayerKind {
                LayerKind::Activation(Activation::kind(self))
            }
        }
    )*};
}

activation_kernel!(ReLU, LeakyReLU, Sigmoid, Tanh);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Graph;
    use crate::function::Function;
    use approx::assert_relative_eq;

    #[test]
    fn test_relu_masks_negative_gradients() {
        let mut graph = Graph::new();
        let f = graph.add_function(Function::from(ReLU));
        let x = graph.input(vec![-1.0, 0.5, 2.0], &[3], 1).unwrap();
        let y = graph.forward_one(f, &[x]).unwrap();
        assert_eq!(graph.data(y).unwrap(), &[0.0, 0.5, 2.0]);
        graph.seed_ones(y).unwrap();
        graph.backward(y).unwrap();
        assert_eq!(graph.grad(x).unwrap(), Some(&[0.0, 1.0, 1.0][..]));
    }

    #[test]
    fn test_leaky_relu_slope() {
        let act: Box<dyn Activation> = Box::new(LeakyReLU::new(0.1));
        assert_relative_eq!(act.forward(-2.0), -0.2);
        assert_relative_eq!(act.backward(-2.0, -0.2, 1.0), 0.1);
        assert_relative_eq!(act.backward(3.0, 3.0, 1.0), 1.0);
    }

    #[test]
    fn test_sigmoid_and_tanh_derivatives() {
        let s = ActivationKind::Sigmoid.build();
        let y = s.forward(0.0);
        assert_relative_eq!(y, 0.5);
        assert_relative_eq!(s.backward(0.0, y, 1.0), 0.25);

        let t = ActivationKind::Tanh.build();
        let y = t.forward(0.5);
        assert_relative_eq!(t.backward(0.5, y, 2.0), 2.0 * (1.0 - 0.5f32.tanh().powi(2)));
    }

    #[test]
    fn test_activation_kernel_reports_itself() {
        let f = Function::from(Tanh);
        assert_eq!(f.name(), "Tanh");
        assert!(f.kernel().activation().is_some());
        assert_eq!(
            f.kernel().kind(),
            LayerKind::Activation(ActivationKind::Tanh)
        );
    }
}
