//! Finite-difference gradient checking.
//!
//! The analytical gradient comes from one forward/backward pass with the
//! output seeded with ones, i.e. the loss is the sum of the output values.
//! The numerical gradient is the central difference
//! (L(x + ε) - L(x - ε)) / 2ε per element. Every evaluation starts from a
//! freshly released graph, so `graph` must not hold activations the caller
//! still needs.
//!
//! Errors are relative where |numerical| > 1 and absolute below.

use crate::error::Result;
use crate::graph::{Graph, ParamRef, TensorId};
use crate::tensor::NdArray;

/// Outcome of a gradient check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradCheck {
    pub max_error: f32,
    pub mean_error: f32,
    pub passed: bool,
}

/// Check d(sum(loss_fn(x)))/dx against central differences.
pub fn check_gradients<F>(
    graph: &mut Graph,
    input: &NdArray,
    mut loss_fn: F,
    epsilon: f32,
    tolerance: f32,
) -> Result<GradCheck>
where
    F: FnMut(&mut Graph, TensorId) -> Result<TensorId>,
{
    let mut eval = |graph: &mut Graph, x: NdArray, backward: bool| -> Result<(f32, Vec<f32>)> {
        graph.release_activations();
        let mut x = x;
        x.clear_grad();
        let x = graph.insert(x);
        let y = loss_fn(graph, x)?;
        let value = graph.data(y)?.iter().sum();
        if !backward {
            return Ok((value, Vec::new()));
        }
        graph.seed_ones(y)?;
        graph.backward(y)?;
        Ok((value, graph.tensor(x)?.grad_or_zeros()))
    };

    let saved = graph.take_param_grads();
    let result = (|| -> Result<GradCheck> {
        let (_, analytical) = eval(graph, input.clone(), true)?;
        let mut numerical = vec![0.0; analytical.len()];
        for (i, n) in numerical.iter_mut().enumerate() {
            let mut plus = input.clone();
            plus.data[i] += epsilon;
            let mut minus = input.clone();
            minus.data[i] -= epsilon;
            let (hi, _) = eval(graph, plus, false)?;
            let (lo, _) = eval(graph, minus, false)?;
            *n = (hi - lo) / (2.0 * epsilon);
        }
        Ok(compare(&analytical, &numerical, tolerance))
    })();
    graph.release_activations();
    graph.restore_param_grads(saved);
    result
}

/// Check d(sum(loss_fn(x)))/dθ for one parameter θ against central differences.
///
/// θ is restored to its original values even when `loss_fn` fails.
pub fn check_param_gradients<F>(
    graph: &mut Graph,
    param: ParamRef,
    input: &NdArray,
    mut loss_fn: F,
    epsilon: f32,
    tolerance: f32,
) -> Result<GradCheck>
where
    F: FnMut(&mut Graph, TensorId) -> Result<TensorId>,
{
    let mut eval = |graph: &mut Graph| -> Result<(f32, TensorId)> {
        graph.release_activations();
        let x = graph.insert(input.clone());
        let y = loss_fn(graph, x)?;
        Ok((graph.data(y)?.iter().sum(), y))
    };

    let original = graph.param(param)?.data.clone();
    let saved = graph.take_param_grads();
    let result = (|| -> Result<GradCheck> {
        let (_, y) = eval(graph)?;
        graph.seed_ones(y)?;
        graph.backward(y)?;
        let analytical = graph.param(param)?.grad_or_zeros();

        let mut numerical = vec![0.0; original.len()];
        for (i, n) in numerical.iter_mut().enumerate() {
            let mut loss_at = |graph: &mut Graph, value: f32| -> Result<f32> {
                graph.param_mut(param)?.data[i] = value;
                let loss = eval(graph);
                graph.param_mut(param)?.data[i] = original[i];
                Ok(loss?.0)
            };
            let hi = loss_at(graph, original[i] + epsilon)?;
            let lo = loss_at(graph, original[i] - epsilon)?;
            *n = (hi - lo) / (2.0 * epsilon);
        }
        Ok(compare(&analytical, &numerical, tolerance))
    })();
    graph.release_activations();
    graph.restore_param_grads(saved);
    result
}

fn compare(analytical: &[f32], numerical: &[f32], tolerance: f32) -> GradCheck {
    let mut max_error: f32 = 0.0;
    let mut total_error: f32 = 0.0;
    for (i, (&a, &n)) in analytical.iter().zip(numerical).enumerate() {
        let error = (a - n).abs();
        let relative = error / n.abs().max(1.0);
        max_error = max_error.max(relative);
        total_error += relative;
        if relative > tolerance {
            log::warn!(
                "gradient mismatch at {i}: analytical={a:.6e}, numerical={n:.6e}, error={relative:.6e}"
            );
        }
    }
    let mean_error = total_error / analytical.len().max(1) as f32;
    GradCheck {
        max_error,
        mean_error,
        passed: max_error <= tolerance,
    }
}
