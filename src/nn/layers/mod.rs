pub mod activation;
pub mod concat;
pub mod elementwise;
pub mod linear;

pub use activation::{LeakyReLU, ReLU, Sigmoid, Tanh};
pub use concat::{Concat, Split};
pub use elementwise::{Add, Mul, Sub, Sum};
pub use linear::Linear;

use crate::device::Device;
use crate::error::{Result, TideError};
use crate::function::{Activation, Function};
use crate::tensor::NdArray;
use bincode::{Decode, Encode};

/// Serializable descriptor of an element-wise activation.
#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub enum ActivationKind {
    ReLU,
    LeakyReLU { slope: f32 },
    Sigmoid,
    Tanh,
}

impl ActivationKind {
    #[must_use]
    pub fn build(self) -> Box<dyn Activation> {
        match self {
            ActivationKind::ReLU => Box::new(ReLU),
            ActivationKind::LeakyReLU { slope } => Box::new(LeakyReLU::new(slope)),
            ActivationKind::Sigmoid => Box::new(Sigmoid),
            ActivationKind::Tanh => Box::new(Tanh),
        }
    }

    /// Standalone activation function
    #[must_use]
    pub fn function(self) -> Function {
        match self {
            ActivationKind::ReLU => Function::from(ReLU),
            ActivationKind::LeakyReLU { slope } => Function::from(LeakyReLU::new(slope)),
            ActivationKind::Sigmoid => Function::from(Sigmoid),
            ActivationKind::Tanh => Function::from(Tanh),
        }
    }
}

/// Serializable descriptor of a layer kernel.
///
/// Deserialized functions are rebuilt from this, which rebinds their forward and
/// backward routines.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum LayerKind {
    Linear {
        in_features: usize,
        out_features: usize,
        bias: bool,
    },
    Activation(ActivationKind),
    Add,
    Sub,
    Mul,
    Sum,
    Concat,
    Split { sections: Vec<usize> },
}

impl LayerKind {
    /// Rebuild a function around saved parameters.
    pub fn instantiate(&self, params: Vec<NdArray>, device: &Device) -> Result<Function> {
        let expect_params = |n: usize| -> Result<()> {
            if params.len() == n {
                Ok(())
            } else {
                Err(TideError::InvalidParameter(format!(
                    "{self:?} takes {n} parameters, got {}",
                    params.len()
                )))
            }
        };
        let function = match self {
            LayerKind::Linear {
                in_features,
                out_features,
                bias,
            } => {
                expect_params(if *bias { 2 } else { 1 })?;
                Linear::from_params(*in_features, *out_features, params, device)?
            }
            LayerKind::Activation(kind) => {
                expect_params(0)?;
                kind.function()
            }
            LayerKind::Add => {
                expect_params(0)?;
                Function::from(Add)
            }
            LayerKind::Sub => {
                expect_params(0)?;
                Function::from(Sub)
            }
            LayerKind::Mul => {
                expect_params(0)?;
                Function::from(Mul)
            }
            LayerKind::Sum => {
                expect_params(0)?;
                Function::from(Sum)
            }
            LayerKind::Concat => {
                expect_params(0)?;
                Function::from(Concat)
            }
            LayerKind::Split { sections } => {
                expect_params(0)?;
                Function::from(Split::new(sections.clone()))
            }
        };
        Ok(function)
    }
}
