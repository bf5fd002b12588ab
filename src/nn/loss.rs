//! Loss functions.
//!
//! A loss reads the prediction and target, returns the scalar loss and seeds
//! the prediction's gradient so [`Graph::backward`] can start from it.

use crate::error::{Result, TideError};
use crate::graph::{Graph, TensorId};

/// Mean squared error over every element.
///
/// loss = Σ(y - t)² / N, ∂loss/∂y = 2(y - t) / N
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl MeanSquaredError {
    pub fn evaluate(&self, graph: &mut Graph, y: TensorId, target: &[f32]) -> Result<f32> {
        let data = graph.data(y)?;
        if data.len() != target.len() {
            return Err(TideError::shape("MSE target", data.len(), target.len()));
        }
        let n = data.len().max(1) as f32;
        let diff: Vec<f32> = data.iter().zip(target).map(|(y, t)| y - t).collect();
        let loss = diff.iter().map(|d| d * d).sum::<f32>() / n;
        let grad: Vec<f32> = diff.iter().map(|d| 2.0 * d / n).collect();
        graph.seed_grad(y, &grad)?;
        Ok(loss)
    }
}

/// Softmax over each batch item's logits followed by negative log-likelihood,
/// averaged over the batch.
///
/// ∂loss/∂logits = (softmax - onehot(label)) / batch
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftmaxCrossEntropy;

impl SoftmaxCrossEntropy {
    pub fn evaluate(&self, graph: &mut Graph, logits: TensorId, labels: &[usize]) -> Result<f32> {
        let t = graph.tensor(logits)?;
        if labels.len() != t.batch_count {
            return Err(TideError::shape(
                "cross entropy labels",
                t.batch_count,
                labels.len(),
            ));
        }
        let classes = t.length();
        let batch = t.batch_count.max(1) as f32;
        let mut loss = 0.0;
        let mut grad = Vec::with_capacity(t.data.len());
        for (row, &label) in t.data.chunks(classes.max(1)).zip(labels) {
            if label >= classes {
                return Err(TideError::InvalidParameter(format!(
                    "label {label} out of range for {classes} classes"
                )));
            }
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            loss -= (exps[label] / sum).ln();
            for (c, e) in exps.iter().enumerate() {
                let onehot = if c == label { 1.0 } else { 0.0 };
                grad.push((e / sum - onehot) / batch);
            }
        }
        graph.seed_grad(logits, &grad)?;
        Ok(loss / batch)
    }
}
