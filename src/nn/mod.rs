pub mod dictionary;
pub mod layers;
pub mod loss;
pub mod optim;
pub mod stack;

pub use dictionary::{Block, FunctionDictionary, Values};
pub use layers::{
    ActivationKind, Add, Concat, LayerKind, LeakyReLU, Linear, Mul, ReLU, Sigmoid, Split, Sub,
    Sum, Tanh,
};
pub use loss::{MeanSquaredError, SoftmaxCrossEntropy};
pub use optim::{Accumulation, Optimizer, OptimizerConfig, UpdateRule};
pub use stack::{FunctionStack, FunctionStackBuilder, LayerEntry};

use crate::error::Result;
use crate::graph::{FunctionId, Graph};

/// One optimizer per function that owns parameters.
pub(crate) fn bind_optimizers(
    graph: &Graph,
    functions: impl IntoIterator<Item = FunctionId>,
    config: &OptimizerConfig,
    accumulation: Accumulation,
) -> Result<Vec<(FunctionId, Optimizer)>> {
    let mut optimizers = Vec::new();
    for fid in functions {
        if graph.function(fid)?.params().is_empty() {
            continue;
        }
        let mut opt = Optimizer::from_config(config).with_accumulation(accumulation);
        opt.bind(graph, fid)?;
        optimizers.push((fid, opt));
    }
    Ok(optimizers)
}

/// Fold the activation computed by `activation` into `layer`.
///
/// Returns `false`, leaving both untouched, when `layer` cannot carry an
/// activation, `activation` is not a pure activation, or either still has
/// calls awaiting backward.
pub(crate) fn fuse_activation(
    graph: &mut Graph,
    layer: FunctionId,
    activation: FunctionId,
) -> Result<bool> {
    let act = {
        let f = graph.function(activation)?;
        match f.kernel().activation() {
            Some(act) if f.activation().is_none() => act,
            _ => return Ok(false),
        }
    };
    let target = graph.function(layer)?;
    if !target.kernel().accepts_activation() || target.activation().is_some() {
        return Ok(false);
    }
    let pending = [layer, activation]
        .iter()
        .map(|&fid| graph.function(fid).map(|f| f.pending().len()))
        .sum::<Result<usize>>()?;
    if pending > 0 {
        log::warn!(
            "not folding `{}` into `{}`: {pending} calls still await backward",
            act.name(),
            target.name()
        );
        return Ok(false);
    }
    log::debug!("folding `{}` into `{}`", act.name(), target.name());
    graph.function_mut(layer)?.set_activation(act)?;
    Ok(true)
}
