use crate::error::{Result, TideError};
use crate::function::{Arity, BackwardArgs, Kernel, KernelGrads, KernelOutput};
use crate::nn::layers::LayerKind;
use crate::ops::{check_same, zip_map};
use crate::tensor::TensorView;

/// a + b
#[derive(Debug, Clone, Copy, Default)]
pub struct Add;

/// a - b
#[derive(Debug, Clone, Copy, Default)]
pub struct Sub;

/// a * b (Hadamard)
#[derive(Debug, Clone, Copy, Default)]
pub struct Mul;

/// Sum of any number of same-shaped tensors
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

fn binary_output(
    name: &str,
    inputs: &[TensorView<'_>],
    f: impl Fn(f32, f32) -> f32,
) -> Result<Vec<KernelOutput>> {
    let (a, b) = (&inputs[0], &inputs[1]);
    check_same(name, a, b)?;
    Ok(vec![KernelOutput {
        data: zip_map(a.data, b.data, f),
        shape: a.shape.to_vec(),
        batch_count: a.batch_count,
    }])
}

impl Kernel for Add {
    fn name(&self) -> &str {
        "Add"
    }

    fn arity(&self) -> Arity {
        Arity::DualInput
    }

    fn forward(
        &self,
        inputs: &[TensorView<'_>],
        _params: &[TensorView<'_>],
    ) -> Result<Vec<KernelOutput>> {
        binary_output("Add", inputs, |a, b| a + b)
    }

    fn backward(&self, args: &BackwardArgs<'_>) -> Result<KernelGrads> {
        let gy = &args.output_grads[0];
        Ok(KernelGrads {
            inputs: vec![Some(gy.clone()), Some(gy.clone())],
            params: Vec::new(),
        })
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Add
    }
}

impl Kernel for Sub {
    fn name(&self) -> &str {
        "Sub"
    }

    fn arity(&self) -> Arity {
        Arity::DualInput
    }

    fn forward(
        &self,
        inputs: &[TensorView<'_>],
        _params: &[TensorView<'_>],
    ) -> Result<Vec<KernelOutput>> {
        binary_output("Sub", inputs, |a, b| a - b)
    }

    fn backward(&self, args: &BackwardArgs<'_>) -> Result<KernelGrads> {
        let gy = &args.output_grads[0];
        Ok(KernelGrads {
            inputs: vec![Some(gy.clone()), Some(gy.iter().map(|g| -g).collect())],
            params: Vec::new(),
        })
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Sub
    }
}

impl Kernel for Mul {
    fn name(&self) -> &str {
        "Mul"
    }

    fn arity(&self) -> Arity {
        Arity::DualInput
    }

    fn forward(
        &self,
        inputs: &[TensorView<'_>],
        _params: &[TensorView<'_>],
    ) -> Result<Vec<KernelOutput>> {
        binary_output("Mul", inputs, |a, b| a * b)
    }

    // da = gy * b, db = gy * a
    fn backward(&self, args: &BackwardArgs<'_>) -> Result<KernelGrads> {
        let gy = &args.output_grads[0];
        let (a, b) = (args.inputs[0].data, args.inputs[1].data);
        Ok(KernelGrads {
            inputs: vec![
                Some(zip_map(gy, b, |g, b| g * b)),
                Some(zip_map(gy, a, |g, a| g * a)),
            ],
            params: Vec::new(),
        })
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Mul
    }
}

impl Kernel for Sum {
    fn name(&self) -> &str {
        "Sum"
    }

    fn arity(&self) -> Arity {
        Arity::MultiInput
    }

    fn forward(
        &self,
        inputs: &[TensorView<'_>],
        _params: &[TensorView<'_>],
    ) -> Result<Vec<KernelOutput>> {
        let first = inputs.first().ok_or_else(|| TideError::Arity {
            function: "Sum".into(),
            expected: "at least 1 input".into(),
            actual: 0,
        })?;
        let mut acc = first.data.to_vec();
        for x in &inputs[1..] {
            check_same("Sum", first, x)?;
            for (a, v) in acc.iter_mut().zip(x.data) {
                *a += v;
            }
        }
        Ok(vec![KernelOutput {
            data: acc,
            shape: first.shape.to_vec(),
            batch_count: first.batch_count,
        }])
    }

    fn backward(&self, args: &BackwardArgs<'_>) -> Result<KernelGrads> {
        let gy = &args.output_grads[0];
        Ok(KernelGrads {
            inputs: vec![Some(gy.clone()); args.inputs.len()],
            params: Vec::new(),
        })
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Graph;
    use crate::function::Function;

    #[test]
    fn test_sub_negates_second_gradient() {
        let mut graph = Graph::new();
        let sub = graph.add_function(Function::from(Sub));
        let a = graph.input(vec![5.0, 1.0], &[2], 1).unwrap();
        let b = graph.input(vec![2.0, 3.0], &[2], 1).unwrap();
        let y = graph.forward_one(sub, &[a, b]).unwrap();
        assert_eq!(graph.data(y).unwrap(), &[3.0, -2.0]);
        graph.seed_grad(y, &[1.0, 2.0]).unwrap();
        graph.backward(y).unwrap();
        assert_eq!(graph.grad(a).unwrap(), Some(&[1.0, 2.0][..]));
        assert_eq!(graph.grad(b).unwrap(), Some(&[-1.0, -2.0][..]));
    }

    #[test]
    fn test_mismatched_shapes_fail_before_recording() {
        let mut graph = Graph::new();
        let add = graph.add_function(Function::from(Add));
        let a = graph.input(vec![1.0, 2.0], &[2], 1).unwrap();
        let b = graph.input(vec![1.0, 2.0, 3.0], &[3], 1).unwrap();
        assert!(matches!(
            graph.forward(add, &[a, b]),
            Err(TideError::ShapeMismatch { .. })
        ));
        assert_eq!(graph.tensor(a).unwrap().consumer_count(), 0);
        assert!(graph.function(add).unwrap().pending().is_empty());
    }

    #[test]
    fn test_sum_fans_gradient_to_every_input() {
        let mut graph = Graph::new();
        let sum = graph.add_function(Function::from(Sum));
        let xs: Vec<_> = (0..3)
            .map(|i| graph.input(vec![i as f32], &[1], 1).unwrap())
            .collect();
        let y = graph.forward_one(sum, &xs).unwrap();
        assert_eq!(graph.data(y).unwrap(), &[3.0]);
        graph.seed_grad(y, &[4.0]).unwrap();
        graph.backward(y).unwrap();
        for x in xs {
            assert_eq!(graph.grad(x).unwrap(), Some(&[4.0][..]));
        }
    }

    #[test]
    fn test_mul_product_rule() {
        let mut graph = Graph::new();
        let mul = graph.add_function(Function::from(Mul));
        let a = graph.input(vec![2.0], &[1], 1).unwrap();
        let b = graph.input(vec![-3.0], &[1], 1).unwrap();
        let y = graph.forward_one(mul, &[a, b]).unwrap();
        graph.seed_ones(y).unwrap();
        graph.backward(y).unwrap();
        assert_eq!(graph.grad(a).unwrap(), Some(&[-3.0][..]));
        assert_eq!(graph.grad(b).unwrap(), Some(&[2.0][..]));
    }
}
