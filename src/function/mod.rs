// Operator model: a kernel, its arity, an optional fused activation, owned
// parameters and the stack of forward calls awaiting backward.
pub mod history;
pub mod kernel;

pub use history::{Invocation, InvocationState, PendingCalls, Taken};
pub use kernel::{Activation, BackwardArgs, Kernel, KernelGrads, KernelOutput};

use crate::error::{Result, TideError};
use crate::tensor::{NdArray, TensorView};

/// Input/output cardinality of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// One input, one output
    SingleInput,
    /// Exactly two inputs, one output
    DualInput,
    /// One or more inputs, one output
    MultiInput,
    /// One input, one or more outputs
    MultiOutput,
}

impl Arity {
    fn expected_inputs(self) -> &'static str {
        match self {
            Arity::SingleInput | Arity::MultiOutput => "exactly 1 input",
            Arity::DualInput => "exactly 2 inputs",
            Arity::MultiInput => "at least 1 input",
        }
    }

    fn accepts_inputs(self, n: usize) -> bool {
        match self {
            Arity::SingleInput | Arity::MultiOutput => n == 1,
            Arity::DualInput => n == 2,
            Arity::MultiInput => n >= 1,
        }
    }

    fn accepts_outputs(self, n: usize) -> bool {
        match self {
            Arity::MultiOutput => n >= 1,
            _ => n == 1,
        }
    }
}

/// Forward results of one evaluation, before they are placed in a graph.
#[derive(Debug)]
pub(crate) struct Evaluation {
    pub outputs: Vec<KernelOutput>,
    pub pre_activation: Option<Vec<Vec<f32>>>,
}

/// A stateful unit of computation, reused across many invocations.
pub struct Function {
    name: String,
    arity: Arity,
    kernel: Box<dyn Kernel>,
    activation: Option<Box<dyn Activation>>,
    params: Vec<NdArray>,
    pub(crate) pending: PendingCalls,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("activation", &self.activation.as_ref().map(|a| a.name()))
            .field("params", &self.params.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<K: Kernel + 'static> From<K> for Function {
    fn from(kernel: K) -> Self {
        Function::new(kernel, Vec::new())
    }
}

impl Function {
    pub fn new(kernel: impl Kernel + 'static, params: Vec<NdArray>) -> Self {
        Self::from_boxed(Box::new(kernel), params)
    }

    pub fn from_boxed(kernel: Box<dyn Kernel>, params: Vec<NdArray>) -> Self {
        Function {
            name: kernel.name().to_string(),
            arity: kernel.arity(),
            kernel,
            activation: None,
            params,
            pending: PendingCalls::new(),
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fuse `activation` onto this function's output.
    pub fn with_activation(mut self, activation: Box<dyn Activation>) -> Result<Self> {
        self.set_activation(activation)?;
        Ok(self)
    }

    pub fn set_activation(&mut self, activation: Box<dyn Activation>) -> Result<()> {
        if !self.kernel.accepts_activation() {
            return Err(TideError::InvalidParameter(format!(
                "`{}` cannot carry a fused activation",
                self.name
            )));
        }
        if self.activation.is_some() {
            return Err(TideError::InvalidParameter(format!(
                "`{}` already carries a fused activation",
                self.name
            )));
        }
        self.activation = Some(activation);
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn arity(&self) -> Arity {
        self.arity
    }

    #[must_use]
    pub fn kernel(&self) -> &dyn Kernel {
        self.kernel.as_ref()
    }

    #[must_use]
    pub fn activation(&self) -> Option<&dyn Activation> {
        self.activation.as_deref()
    }

    #[must_use]
    pub fn params(&self) -> &[NdArray] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [NdArray] {
        &mut self.params
    }

    #[must_use]
    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    pub fn zero_grad(&mut self) {
        for p in &mut self.params {
            p.clear_grad();
        }
    }

    fn check_inputs(&self, n: usize) -> Result<()> {
        if self.arity.accepts_inputs(n) {
            Ok(())
        } else {
            Err(TideError::Arity {
                function: self.name.clone(),
                expected: self.arity.expected_inputs().to_string(),
                actual: n,
            })
        }
    }

    /// Run the kernel and the fused activation, if any.
    ///
    /// Shared by training forward and predict, so both produce identical values.
    pub(crate) fn evaluate(&self, inputs: &[TensorView<'_>]) -> Result<Evaluation> {
        self.check_inputs(inputs.len())?;
        let params: Vec<TensorView<'_>> = self.params.iter().map(NdArray::view).collect();
        let mut outputs = self.kernel.forward(inputs, &params)?;
        if !self.arity.accepts_outputs(outputs.len()) {
            let expected = match self.arity {
                Arity::MultiOutput => "at least 1 output",
                _ => "exactly 1 output",
            };
            return Err(TideError::Arity {
                function: self.name.clone(),
                expected: expected.to_string(),
                actual: outputs.len(),
            });
        }
        let pre_activation = self.activation.as_ref().map(|act| {
            outputs
                .iter_mut()
                .map(|out| {
                    let activated = act.apply(&out.data);
                    std::mem::replace(&mut out.data, activated)
                })
                .collect()
        });
        Ok(Evaluation {
            outputs,
            pre_activation,
        })
    }

    /// Compute input and parameter gradients for one recorded invocation.
    ///
    /// `outputs` are the values stored in the graph (post-activation) and
    /// `output_grads` their gradients; the fused activation is unwound before
    /// the kernel sees them.
    pub(crate) fn gradients(
        &self,
        inputs: &[TensorView<'_>],
        outputs: &[TensorView<'_>],
        pre_activation: Option<&[Vec<f32>]>,
        output_grads: Vec<Vec<f32>>,
    ) -> Result<KernelGrads> {
        let params: Vec<TensorView<'_>> = self.params.iter().map(NdArray::view).collect();
        let grads = match (&self.activation, pre_activation) {
            (Some(act), Some(pre)) => {
                let unwound: Vec<Vec<f32>> = pre
                    .iter()
                    .zip(outputs)
                    .zip(&output_grads)
                    .map(|((x, y), gy)| act.apply_backward(x, y.data, gy))
                    .collect();
                let kernel_outputs: Vec<TensorView<'_>> = pre
                    .iter()
                    .zip(outputs)
                    .map(|(x, y)| TensorView {
                        data: x,
                        shape: y.shape,
                        batch_count: y.batch_count,
                    })
                    .collect();
                self.kernel.backward(&BackwardArgs {
                    inputs,
                    outputs: &kernel_outputs,
                    output_grads: &unwound,
                    params: &params,
                })?
            }
            _ => self.kernel.backward(&BackwardArgs {
                inputs,
                outputs,
                output_grads: &output_grads,
                params: &params,
            })?,
        };
        if grads.inputs.len() != inputs.len() || grads.params.len() > self.params.len() {
            return Err(TideError::InvalidParameter(format!(
                "kernel `{}` returned {} input / {} param gradients for {} inputs / {} params",
                self.name,
                grads.inputs.len(),
                grads.params.len(),
                inputs.len(),
                self.params.len()
            )));
        }
        for (i, (g, x)) in grads.inputs.iter().zip(inputs).enumerate() {
            if let Some(g) = g
                && g.len() != x.data.len()
            {
                return Err(TideError::shape(
                    format!("`{}` gradient of input #{i}", self.name),
                    x.data.len(),
                    g.len(),
                ));
            }
        }
        for (i, (g, p)) in grads.params.iter().zip(&self.params).enumerate() {
            if let Some(g) = g
                && g.len() != p.data.len()
            {
                return Err(TideError::shape(
                    format!("`{}` gradient of param #{i}", self.name),
                    p.data.len(),
                    g.len(),
                ));
            }
        }
        Ok(grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::layers::{Add, Linear, ReLU, Sigmoid};

    #[test]
    fn test_dual_input_rejects_other_counts() {
        let add = Function::from(Add);
        let x = NdArray::filled(1.0, &[2], 1);
        let err = add.evaluate(&[x.view()]).unwrap_err();
        assert!(matches!(err, TideError::Arity { actual: 1, .. }));
        let err = add.evaluate(&[x.view(), x.view(), x.view()]).unwrap_err();
        assert!(matches!(err, TideError::Arity { actual: 3, .. }));
        assert!(add.evaluate(&[x.view(), x.view()]).is_ok());
    }

    #[test]
    fn test_activation_slot_requires_supporting_kernel() {
        let err = Function::from(Add).with_activation(Box::new(ReLU)).unwrap_err();
        assert!(matches!(err, TideError::InvalidParameter(_)));

        let fused = Linear::from_weights(vec![1.0, -1.0], None, 2, 1)
            .unwrap()
            .with_activation(Box::new(ReLU))
            .unwrap();
        assert_eq!(fused.activation().map(|a| a.name()), Some("ReLU"));
        let err = fused.with_activation(Box::new(Sigmoid)).unwrap_err();
        assert!(matches!(err, TideError::InvalidParameter(_)));
    }

    #[test]
    fn test_fused_evaluation_keeps_pre_activation() {
        let f = Linear::from_weights(vec![1.0, -1.0], None, 2, 1)
            .unwrap()
            .with_activation(Box::new(Sigmoid))
            .unwrap();
        let x = NdArray::from_vec(vec![3.0, 3.0], &[2]).unwrap();
        let eval = f.evaluate(&[x.view()]).unwrap();
        assert_eq!(eval.outputs[0].data, vec![0.5]);
        assert_eq!(eval.pre_activation, Some(vec![vec![0.0]]));
    }
}
