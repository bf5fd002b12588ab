use crate::error::{Result, TideError};
use crate::function::{InvocationState, KernelGrads, Taken};
use crate::graph::{Graph, InvocationId, TensorId};
use crate::tensor::{NdArray, TensorView};

// ===== BACKPROPAGATION =====

impl Graph {
    /// Propagate gradients from `output` back to every reachable tensor.
    ///
    /// The caller seeds `output`'s gradient first (see [`Graph::seed_grad`] or a
    /// loss function). Each producing invocation runs its backward exactly once,
    /// and only after every consumer of its outputs has contributed:
    ///
    /// 1. A leaf output (no producer) is a no-op.
    /// 2. The producer's backward decrements the consumer count of each input.
    /// 3. An input whose count drops to zero has received all its gradient and
    ///    is recursed into; one with a positive count is left for the consumers
    ///    still outstanding, whose backward will bring it to zero later.
    ///
    /// No visit set or topological order is built; the live consumer counts
    /// alone decide the traversal.
    ///
    /// Each producer is paired with its own recorded invocation rather than
    /// with whatever call sits on top of its function's pending stack. In the
    /// usual LIFO order the two coincide; when an older call is backpropagated
    /// first (two independent outputs of one function, say), the exact call is
    /// taken out from under the newer ones and a debug line is logged.
    ///
    /// # Errors
    /// `UnseededGradient` if `output` has a producer but no gradient;
    /// `StaleBackward` if its producer already ran backward (or was reset).
    pub fn backward(&mut self, output: TensorId) -> Result<()> {
        let tensor = self.tensor(output)?;
        let Some(producer) = tensor.producer() else {
            return Ok(());
        };
        if tensor.grad.is_none() {
            return Err(TideError::UnseededGradient);
        }
        if tensor.consumer_count() > 0 {
            log::debug!(
                "backward from {output:?} while {} consumers are still pending",
                tensor.consumer_count()
            );
        }
        self.propagate(producer)
    }

    fn propagate(&mut self, call: InvocationId) -> Result<()> {
        if !self.outputs_settled(call)? {
            log::debug!("deferring {call:?}: outputs still awaiting consumers");
            return Ok(());
        }

        let inputs = self.backward_invocation(call)?;

        // Reverse order: a function applied to several inputs in sequence is
        // popped most-recent-first.
        let mut ready: Vec<InvocationId> = Vec::new();
        for &x in inputs.iter().rev() {
            let t = self.tensor(x)?;
            if t.consumer_count() == 0
                && let Some(producer) = t.producer()
                && !ready.contains(&producer)
            {
                ready.push(producer);
            }
        }
        for producer in ready {
            // a sibling's recursion may already have run it
            if self.invocation(producer)?.state() == InvocationState::Completed {
                continue;
            }
            self.propagate(producer)?;
        }
        Ok(())
    }

    /// A multi-output invocation may only run once no output awaits a consumer.
    fn outputs_settled(&self, call: InvocationId) -> Result<bool> {
        let record = self.invocation(call)?;
        if record.outputs.len() < 2 {
            return Ok(true);
        }
        for &y in &record.outputs {
            if self.tensor(y)?.consumer_count() > 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run one invocation's backward: pair it with its function's pending call,
    /// visit its inputs and accumulate gradients onto inputs and parameters.
    ///
    /// Returns the invocation's inputs.
    fn backward_invocation(&mut self, call: InvocationId) -> Result<Vec<TensorId>> {
        let (fid, state) = {
            let record = self.invocation(call)?;
            (record.function, record.state)
        };
        if state != InvocationState::Pending {
            return Err(TideError::StaleBackward {
                function: self.function(fid)?.name().to_string(),
            });
        }

        let grads = self.invocation_gradients(call)?;

        let function = self.function_mut(fid)?;
        match function.pending.take(call) {
            Some(Taken::Top) => {}
            Some(Taken::Buried) => log::debug!(
                "`{}`: {call:?} taken below {} newer pending calls",
                function.name(),
                function.pending.len()
            ),
            None => {
                return Err(TideError::StaleBackward {
                    function: function.name().to_string(),
                });
            }
        }
        log::debug!("backward `{}` {call:?}", function.name());

        for (p, g) in function.params_mut().iter_mut().zip(&grads.params) {
            if let Some(g) = g {
                p.accumulate_grad(g)?;
                p.count_update();
            }
        }

        let inputs = {
            let record = self.invocation_mut(call)?;
            record.state = InvocationState::Completed;
            record.pre_activation = None;
            record.inputs.clone()
        };
        for (&x, g) in inputs.iter().zip(&grads.inputs) {
            let t = self.tensor_mut(x)?;
            t.mark_visited();
            log::trace!("{x:?} visited, count {}", t.consumer_count());
            if let Some(g) = g {
                t.accumulate_grad(g)?;
            }
        }
        Ok(inputs)
    }

    fn invocation_gradients(&self, call: InvocationId) -> Result<KernelGrads> {
        let record = self.invocation(call)?;
        let function = self.function(record.function)?;
        let inputs = record
            .inputs
            .iter()
            .map(|&x| self.tensor(x).map(NdArray::view))
            .collect::<Result<Vec<TensorView<'_>>>>()?;
        let output_tensors = record
            .outputs
            .iter()
            .map(|&y| self.tensor(y))
            .collect::<Result<Vec<&NdArray>>>()?;
        let outputs: Vec<TensorView<'_>> = output_tensors.iter().map(|t| t.view()).collect();
        let output_grads: Vec<Vec<f32>> =
            output_tensors.iter().map(|t| t.grad_or_zeros()).collect();
        function.gradients(
            &inputs,
            &outputs,
            record.pre_activation.as_deref(),
            output_grads,
        )
    }
}
