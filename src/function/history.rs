use crate::graph::{FunctionId, InvocationId, TensorId};

/// Lifecycle of one recorded forward call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// Recorded, waiting for its backward
    Pending,
    /// Backward ran
    Completed,
    /// Dropped by a history reset before its backward ran
    Abandoned,
}

/// One call of a function on a specific set of inputs.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub(crate) function: FunctionId,
    pub(crate) inputs: Vec<TensorId>,
    pub(crate) outputs: Vec<TensorId>,
    /// Kernel outputs before the fused activation, if any
    pub(crate) pre_activation: Option<Vec<Vec<f32>>>,
    pub(crate) state: InvocationState,
}

impl Invocation {
    #[must_use]
    pub fn function(&self) -> FunctionId {
        self.function
    }

    #[must_use]
    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    #[must_use]
    pub fn state(&self) -> InvocationState {
        self.state
    }
}

/// Where [`PendingCalls::take`] found the requested invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Taken {
    /// It was the most recent pending call
    Top,
    /// It sat below more recent calls
    Buried,
}

/// LIFO stack of a function's forward calls still awaiting backward.
///
/// Forward pushes; backward takes. A function reused before its earlier outputs
/// are backpropagated (a recurrent cell, a shared layer) pairs every backward
/// with the most recent unprocessed call.
#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    stack: Vec<InvocationId>,
}

impl PendingCalls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: InvocationId) {
        self.stack.push(call);
    }

    /// Most recent unprocessed call
    #[must_use]
    pub fn latest(&self) -> Option<InvocationId> {
        self.stack.last().copied()
    }

    /// Pop the most recent unprocessed call.
    pub fn pop(&mut self) -> Option<InvocationId> {
        self.stack.pop()
    }

    /// Remove `call`, normally the top of the stack.
    ///
    /// Returns `None` when the call is not pending (already processed or reset).
    pub fn take(&mut self, call: InvocationId) -> Option<Taken> {
        if self.stack.last() == Some(&call) {
            self.stack.pop();
            return Some(Taken::Top);
        }
        let pos = self.stack.iter().rposition(|&c| c == call)?;
        self.stack.remove(pos);
        Some(Taken::Buried)
    }

    /// Drop every pending call, returning them oldest first.
    pub fn clear(&mut self) -> Vec<InvocationId> {
        std::mem::take(&mut self.stack)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = InvocationId> + '_ {
        self.stack.iter().copied()
    }
}
