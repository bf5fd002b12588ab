//! Arena holding tensors, invocation records and functions.
//!
//! The computation graph is never materialized as a DAG. It exists implicitly
//! through `producer` links on tensors, per-tensor consumer counts and each
//! function's stack of pending calls; all of them are addressed by stable
//! indices into this arena instead of shared references.

use crate::error::{Result, TideError};
use crate::function::{Evaluation, Function, Invocation, InvocationState};
use crate::tensor::{NdArray, TensorView};

/// Index of a tensor in a [`Graph`]. Invalidated by [`Graph::release_activations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId {
    epoch: u32,
    index: usize,
}

/// Index of an invocation record in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId {
    epoch: u32,
    index: usize,
}

impl InvocationId {
    pub(crate) fn new(epoch: u32, index: usize) -> Self {
        InvocationId { epoch, index }
    }
}

/// Index of a function registered in a [`Graph`]. Stable for the graph's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(usize);

impl FunctionId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A parameter tensor, addressed through the function that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub function: FunctionId,
    pub index: usize,
}

/// Per-function parameter gradients and update counts, see [`Graph::take_param_grads`].
pub(crate) type SavedGrads = Vec<Vec<(Option<Vec<f32>>, usize)>>;

#[derive(Debug, Default)]
pub struct Graph {
    epoch: u32,
    tensors: Vec<NdArray>,
    pub(crate) invocations: Vec<Invocation>,
    pub(crate) functions: Vec<Function>,
}

// ===== FUNCTIONS & PARAMETERS =====
impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, function: Function) -> FunctionId {
        self.functions.push(function);
        FunctionId(self.functions.len() - 1)
    }

    pub fn function(&self, id: FunctionId) -> Result<&Function> {
        self.functions
            .get(id.0)
            .ok_or(TideError::UnknownFunction(id))
    }

    pub fn function_mut(&mut self, id: FunctionId) -> Result<&mut Function> {
        self.functions
            .get_mut(id.0)
            .ok_or(TideError::UnknownFunction(id))
    }

    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// References to every parameter owned by `id`
    pub fn params_of(&self, id: FunctionId) -> Result<Vec<ParamRef>> {
        let count = self.function(id)?.params().len();
        Ok((0..count)
            .map(|index| ParamRef {
                function: id,
                index,
            })
            .collect())
    }

    pub fn param(&self, p: ParamRef) -> Result<&NdArray> {
        let function = self.function(p.function)?;
        function.params().get(p.index).ok_or_else(|| {
            TideError::InvalidParameter(format!(
                "`{}` has no parameter #{}",
                function.name(),
                p.index
            ))
        })
    }

    pub fn param_mut(&mut self, p: ParamRef) -> Result<&mut NdArray> {
        let function = self.function_mut(p.function)?;
        let name = function.name().to_string();
        function.params_mut().get_mut(p.index).ok_or_else(|| {
            TideError::InvalidParameter(format!("`{name}` has no parameter #{}", p.index))
        })
    }

    /// Detach every parameter gradient and its update count, leaving them clear.
    pub(crate) fn take_param_grads(&mut self) -> SavedGrads {
        self.functions
            .iter_mut()
            .map(|f| {
                f.params_mut()
                    .iter_mut()
                    .map(|p| (p.grad.take(), std::mem::take(&mut p.pending_update_count)))
                    .collect()
            })
            .collect()
    }

    /// Put back gradients detached by [`take_param_grads`](Self::take_param_grads),
    /// dropping whatever accumulated in between.
    pub(crate) fn restore_param_grads(&mut self, saved: SavedGrads) {
        for (f, grads) in self.functions.iter_mut().zip(saved) {
            for (p, (grad, count)) in f.params_mut().iter_mut().zip(grads) {
                p.grad = grad;
                p.pending_update_count = count;
            }
        }
    }

    /// Clear the gradient of every parameter in the graph.
    pub fn zero_grads(&mut self) {
        for f in &mut self.functions {
            f.zero_grad();
        }
    }
}

// ===== TENSORS =====
impl Graph {
    /// Place a user-created tensor in the arena as a leaf.
    pub fn insert(&mut self, mut tensor: NdArray) -> TensorId {
        tensor.producer = None;
        tensor.consumer_count = 0;
        self.push_tensor(tensor)
    }

    /// Create a leaf input from raw values.
    pub fn input(
        &mut self,
        data: Vec<f32>,
        shape: &[usize],
        batch_count: usize,
    ) -> Result<TensorId> {
        let t = NdArray::wrap(data, shape, batch_count, None)?;
        Ok(self.push_tensor(t))
    }

    fn push_tensor(&mut self, tensor: NdArray) -> TensorId {
        self.tensors.push(tensor);
        TensorId {
            epoch: self.epoch,
            index: self.tensors.len() - 1,
        }
    }

    pub fn tensor(&self, id: TensorId) -> Result<&NdArray> {
        if id.epoch != self.epoch {
            return Err(TideError::UnknownTensor(id));
        }
        self.tensors.get(id.index).ok_or(TideError::UnknownTensor(id))
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> Result<&mut NdArray> {
        if id.epoch != self.epoch {
            return Err(TideError::UnknownTensor(id));
        }
        self.tensors
            .get_mut(id.index)
            .ok_or(TideError::UnknownTensor(id))
    }

    /// Values of a tensor
    pub fn data(&self, id: TensorId) -> Result<&[f32]> {
        Ok(&self.tensor(id)?.data)
    }

    /// Accumulated gradient of a tensor, if any
    pub fn grad(&self, id: TensorId) -> Result<Option<&[f32]>> {
        Ok(self.tensor(id)?.grad.as_deref())
    }

    /// Seed (accumulate into) the gradient of a tensor, typically a loss.
    pub fn seed_grad(&mut self, id: TensorId, grad: &[f32]) -> Result<()> {
        self.tensor_mut(id)?.accumulate_grad(grad)
    }

    /// Seed a gradient of ones.
    pub fn seed_ones(&mut self, id: TensorId) -> Result<()> {
        let len = self.tensor(id)?.data.len();
        self.seed_grad(id, &vec![1.0; len])
    }

    #[must_use]
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Ids of every live tensor
    pub fn tensor_ids(&self) -> impl Iterator<Item = TensorId> + '_ {
        let epoch = self.epoch;
        (0..self.tensors.len()).map(move |index| TensorId { epoch, index })
    }

    /// Drop every activation tensor and invocation record.
    ///
    /// Parameters live on their functions and survive. All `TensorId`s handed
    /// out before the call become invalid, and every function's pending history
    /// is cleared.
    pub fn release_activations(&mut self) {
        log::debug!(
            "releasing {} tensors and {} invocations",
            self.tensors.len(),
            self.invocations.len()
        );
        self.epoch = self.epoch.wrapping_add(1);
        self.tensors.clear();
        self.invocations.clear();
        for f in &mut self.functions {
            f.pending.clear();
        }
    }
}

// ===== INVOCATIONS =====
impl Graph {
    pub fn invocation(&self, id: InvocationId) -> Result<&Invocation> {
        if id.epoch != self.epoch {
            return Err(TideError::InvalidParameter(format!(
                "invocation {id:?} was released"
            )));
        }
        self.invocations.get(id.index).ok_or_else(|| {
            TideError::InvalidParameter(format!("unknown invocation {id:?}"))
        })
    }

    pub(crate) fn invocation_mut(&mut self, id: InvocationId) -> Result<&mut Invocation> {
        if id.epoch != self.epoch {
            return Err(TideError::InvalidParameter(format!(
                "invocation {id:?} was released"
            )));
        }
        self.invocations.get_mut(id.index).ok_or_else(|| {
            TideError::InvalidParameter(format!("unknown invocation {id:?}"))
        })
    }

    /// Forget a function's pending calls. Their outputs can no longer be
    /// backpropagated through this function.
    pub fn reset_history(&mut self, id: FunctionId) -> Result<()> {
        let dropped = self.function_mut(id)?.pending.clear();
        for call in &dropped {
            if let Ok(record) = self.invocation_mut(*call) {
                record.state = InvocationState::Abandoned;
                record.pre_activation = None;
            }
        }
        if !dropped.is_empty() {
            log::debug!("reset {} pending calls on {:?}", dropped.len(), id);
        }
        Ok(())
    }
}

// ===== FORWARD & PREDICT =====
impl Graph {
    fn evaluate(&self, id: FunctionId, inputs: &[TensorId]) -> Result<Evaluation> {
        let function = self.function(id)?;
        let views = inputs
            .iter()
            .map(|&x| self.tensor(x).map(NdArray::view))
            .collect::<Result<Vec<TensorView<'_>>>>()?;
        function.evaluate(&views)
    }

    /// Invoke a function, recording the call for backward.
    ///
    /// Pushes the invocation on the function's pending stack, marks every input
    /// consumed once per use and wraps the outputs with this invocation as
    /// their producer. Nothing is recorded if evaluation fails.
    pub fn forward(&mut self, id: FunctionId, inputs: &[TensorId]) -> Result<Vec<TensorId>> {
        let evaluation = self.evaluate(id, inputs)?;
        let call = InvocationId::new(self.epoch, self.invocations.len());

        let wrapped = evaluation
            .outputs
            .into_iter()
            .map(|out| NdArray::wrap(out.data, &out.shape, out.batch_count, Some(call)))
            .collect::<Result<Vec<_>>>()?;
        let outputs: Vec<TensorId> = wrapped.into_iter().map(|t| self.push_tensor(t)).collect();

        for &x in inputs {
            let t = self.tensor_mut(x)?;
            t.mark_consumed();
            log::trace!("{x:?} consumed, count {}", t.consumer_count);
        }

        self.invocations.push(Invocation {
            function: id,
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
            pre_activation: evaluation.pre_activation,
            state: InvocationState::Pending,
        });
        self.function_mut(id)?.pending.push(call);
        Ok(outputs)
    }

    /// [`forward`](Self::forward) for functions with a single output.
    pub fn forward_one(&mut self, id: FunctionId, inputs: &[TensorId]) -> Result<TensorId> {
        let outputs = self.forward(id, inputs)?;
        self.single(id, outputs)
    }

    /// Inference-only evaluation: no history, no consumer marks, leaf outputs.
    pub fn predict(&mut self, id: FunctionId, inputs: &[TensorId]) -> Result<Vec<TensorId>> {
        let evaluation = self.evaluate(id, inputs)?;
        let wrapped = evaluation
            .outputs
            .into_iter()
            .map(|out| NdArray::wrap(out.data, &out.shape, out.batch_count, None))
            .collect::<Result<Vec<_>>>()?;
        Ok(wrapped.into_iter().map(|t| self.push_tensor(t)).collect())
    }

    pub fn predict_one(&mut self, id: FunctionId, inputs: &[TensorId]) -> Result<TensorId> {
        let outputs = self.predict(id, inputs)?;
        self.single(id, outputs)
    }

    fn single(&self, id: FunctionId, outputs: Vec<TensorId>) -> Result<TensorId> {
        match outputs.as_slice() {
            [only] => Ok(*only),
            _ => Err(TideError::Arity {
                function: self.function(id)?.name().to_string(),
                expected: "exactly 1 output".to_string(),
                actual: outputs.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::layers::{Add, Linear};

    #[test]
    fn test_forward_records_history_and_consumers() {
        let mut graph = Graph::new();
        let add = graph.add_function(Function::from(Add));
        let a = graph.input(vec![1.0, 2.0], &[2], 1).unwrap();
        let b = graph.input(vec![3.0, 4.0], &[2], 1).unwrap();

        let y = graph.forward_one(add, &[a, b]).unwrap();
        assert_eq!(graph.data(y).unwrap(), &[4.0, 6.0]);
        assert_eq!(graph.tensor(a).unwrap().consumer_count(), 1);
        assert_eq!(graph.function(add).unwrap().pending().len(), 1);

        let call = graph.tensor(y).unwrap().producer().unwrap();
        assert_eq!(graph.invocation(call).unwrap().inputs(), &[a, b]);
    }

    #[test]
    fn test_same_tensor_twice_counts_twice() {
        let mut graph = Graph::new();
        let add = graph.add_function(Function::from(Add));
        let a = graph.input(vec![1.0], &[1], 1).unwrap();
        graph.forward_one(add, &[a, a]).unwrap();
        assert_eq!(graph.tensor(a).unwrap().consumer_count(), 2);
    }

    #[test]
    fn test_failed_forward_records_nothing() {
        let mut graph = Graph::new();
        let add = graph.add_function(Function::from(Add));
        let a = graph.input(vec![1.0, 2.0], &[2], 1).unwrap();
        let b = graph.input(vec![1.0], &[1], 1).unwrap();
        assert!(graph.forward(add, &[a, b]).is_err());
        assert_eq!(graph.tensor(a).unwrap().consumer_count(), 0);
        assert!(graph.function(add).unwrap().pending().is_empty());
    }

    #[test]
    fn test_predict_leaves_no_trace() {
        let mut graph = Graph::new();
        let lin =
            graph.add_function(Linear::from_weights(vec![2.0], Some(vec![1.0]), 1, 1).unwrap());
        let x = graph.input(vec![3.0], &[1], 1).unwrap();
        let y = graph.predict_one(lin, &[x]).unwrap();
        assert_eq!(graph.data(y).unwrap(), &[7.0]);
        assert!(graph.tensor(y).unwrap().is_leaf());
        assert_eq!(graph.tensor(x).unwrap().consumer_count(), 0);
        assert!(graph.function(lin).unwrap().pending().is_empty());
    }

    #[test]
    fn test_release_invalidates_ids_keeps_params() {
        let mut graph = Graph::new();
        let lin = graph.add_function(Linear::from_weights(vec![2.0], None, 1, 1).unwrap());
        let x = graph.input(vec![3.0], &[1], 1).unwrap();
        graph.forward(lin, &[x]).unwrap();
        graph.release_activations();

        assert!(matches!(graph.tensor(x), Err(TideError::UnknownTensor(_))));
        assert_eq!(graph.tensor_count(), 0);
        assert!(graph.function(lin).unwrap().pending().is_empty());
        assert_eq!(graph.function(lin).unwrap().params()[0].data, vec![2.0]);
    }

    #[test]
    fn test_reset_history_abandons_calls() {
        let mut graph = Graph::new();
        let lin = graph.add_function(Linear::from_weights(vec![2.0], None, 1, 1).unwrap());
        let x = graph.input(vec![3.0], &[1], 1).unwrap();
        let y = graph.forward_one(lin, &[x]).unwrap();
        graph.reset_history(lin).unwrap();

        let call = graph.tensor(y).unwrap().producer().unwrap();
        assert_eq!(
            graph.invocation(call).unwrap().state(),
            InvocationState::Abandoned
        );
    }
}
