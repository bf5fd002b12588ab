//! Eager reverse-mode automatic differentiation.
//!
//! Functions are invoked on tensors held in a [`Graph`] arena. Every call
//! records an invocation on the function's pending stack and bumps the
//! consumer count of its inputs; [`Graph::backward`] then walks producers
//! back from a seeded output, running each invocation's backward only once
//! all consumers of its outputs have contributed. No explicit DAG or
//! topological order is ever built.
//!
//! ```
//! use tidegrad::{FunctionStack, Graph, Linear, MeanSquaredError, OptimizerConfig, Sgd};
//!
//! let mut graph = Graph::new();
//! let mut model = FunctionStack::builder()
//!     .add(Linear::layer(2, 1, true, Some(42)).unwrap())
//!     .build(&mut graph);
//! model.set_optimizer(&graph, &OptimizerConfig::Sgd(Sgd::new(0.1))).unwrap();
//!
//! let x = graph.input(vec![1.0, 2.0], &[2], 1).unwrap();
//! let y = model.forward(&mut graph, x).unwrap();
//! MeanSquaredError.evaluate(&mut graph, y, &[1.0]).unwrap();
//! model.backward(&mut graph, y).unwrap();
//! model.update(&mut graph).unwrap();
//! graph.release_activations();
//! ```

mod autograd;
pub mod config;
pub mod device;
pub mod error;
pub mod function;
pub mod gradcheck;
pub mod graph;
pub mod io;
pub mod nn;
pub mod ops;
pub mod tensor;

pub use config::RuntimeConfig;
pub use device::Device;
pub use error::{Result, TideError};
pub use function::{
    Activation, Arity, BackwardArgs, Function, Invocation, InvocationState, Kernel, KernelGrads,
    KernelOutput, PendingCalls,
};
pub use gradcheck::{GradCheck, check_gradients, check_param_gradients};
pub use graph::{FunctionId, Graph, InvocationId, ParamRef, TensorId};
pub use io::{load_stack, save_stack};
pub use nn::layers::{
    ActivationKind, Add, Concat, LayerKind, LeakyReLU, Linear, Mul, ReLU, Sigmoid, Split, Sub,
    Sum, Tanh,
};
pub use nn::loss::{MeanSquaredError, SoftmaxCrossEntropy};
pub use nn::optim::{
    AdaBound, AdaGrad, Adam, AdamW, Accumulation, MomentumSgd, Optimizer, OptimizerConfig, RAdam,
    RmsProp, RuleState, Sgd, UpdateRule,
};
pub use nn::{Block, FunctionDictionary, FunctionStack, FunctionStackBuilder, LayerEntry, Values};
pub use tensor::{NdArray, TensorView};
