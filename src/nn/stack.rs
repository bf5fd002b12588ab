use crate::error::Result;
use crate::function::Function;
use crate::graph::{FunctionId, Graph, TensorId};
use crate::nn::optim::{Accumulation, Optimizer, OptimizerConfig};
use crate::nn::{bind_optimizers, fuse_activation};

/// A function in a stack, optionally named.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerEntry {
    pub name: Option<String>,
    pub function: FunctionId,
}

/// An ordered pipeline of single-output functions.
///
/// The stack holds ids into a [`Graph`]; the graph owns the functions and
/// every tensor flowing through them.
#[derive(Debug, Default)]
pub struct FunctionStack {
    entries: Vec<LayerEntry>,
    optimizers: Vec<(FunctionId, Optimizer)>,
}

/// Builder registering functions in a graph and collecting them into a stack.
///
/// # Examples
///
/// ```
/// use tidegrad::{FunctionStack, Graph, Linear, ReLU, Function};
///
/// let mut graph = Graph::new();
/// let stack = FunctionStack::builder()
///     .add_named("encoder", Linear::layer(4, 8, true, Some(0)).unwrap())
///     .add(Function::from(ReLU))
///     .add_named("decoder", Linear::layer(8, 2, true, Some(1)).unwrap())
///     .build(&mut graph);
/// assert_eq!(stack.len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct FunctionStackBuilder {
    entries: Vec<(Option<String>, Function)>,
}

impl FunctionStackBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn add(mut self, function: Function) -> Self {
        self.entries.push((None, function));
        self
    }

    /// Empty names are treated as unnamed.
    #[must_use]
    pub fn add_named(mut self, name: impl Into<String>, function: Function) -> Self {
        let name = name.into();
        let name = (!name.is_empty()).then_some(name);
        self.entries.push((name, function));
        self
    }

    pub fn build(self, graph: &mut Graph) -> FunctionStack {
        let entries = self
            .entries
            .into_iter()
            .map(|(name, function)| LayerEntry {
                name,
                function: graph.add_function(function),
            })
            .collect();
        FunctionStack::new(entries)
    }
}

impl FunctionStack {
    #[must_use]
    pub fn new(entries: Vec<LayerEntry>) -> Self {
        FunctionStack {
            entries,
            optimizers: Vec::new(),
        }
    }

    #[must_use]
    pub fn builder() -> FunctionStackBuilder {
        FunctionStackBuilder::new()
    }

    /// Append an already registered function.
    pub fn push(&mut self, name: Option<String>, function: FunctionId) {
        self.entries.push(LayerEntry { name, function });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[LayerEntry] {
        &self.entries
    }

    #[must_use]
    pub fn layer_names(&self) -> Vec<Option<&str>> {
        self.entries.iter().map(|e| e.name.as_deref()).collect()
    }

    pub fn functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.entries.iter().map(|e| e.function)
    }

    /// Pipe `x` through every function, recording history for backward.
    pub fn forward(&self, graph: &mut Graph, x: TensorId) -> Result<TensorId> {
        self.entries
            .iter()
            .try_fold(x, |h, e| graph.forward_one(e.function, &[h]))
    }

    /// Inference pass: bit-identical outputs, no history.
    pub fn predict(&self, graph: &mut Graph, x: TensorId) -> Result<TensorId> {
        self.entries
            .iter()
            .try_fold(x, |h, e| graph.predict_one(e.function, &[h]))
    }

    /// Backpropagate from the stack's (seeded) output.
    pub fn backward(&self, graph: &mut Graph, y: TensorId) -> Result<()> {
        graph.backward(y)
    }

    /// Replace every optimizer with one built from `config` per parameterized function.
    pub fn set_optimizer(&mut self, graph: &Graph, config: &OptimizerConfig) -> Result<()> {
        self.set_optimizer_with(graph, config, Accumulation::default())
    }

    pub fn set_optimizer_with(
        &mut self,
        graph: &Graph,
        config: &OptimizerConfig,
        accumulation: Accumulation,
    ) -> Result<()> {
        self.optimizers = bind_optimizers(graph, self.functions(), config, accumulation)?;
        log::debug!(
            "bound {} optimizers ({:?})",
            self.optimizers.len(),
            config
        );
        Ok(())
    }

    /// Attach an optimizer already bound to parameters of `function`.
    pub fn add_optimizer(&mut self, function: FunctionId, optimizer: Optimizer) {
        self.optimizers.push((function, optimizer));
    }

    /// The optimizer driving `function`, if any.
    #[must_use]
    pub fn optimizer(&self, function: FunctionId) -> Option<&Optimizer> {
        self.optimizers
            .iter()
            .find(|(fid, _)| *fid == function)
            .map(|(_, opt)| opt)
    }

    #[must_use]
    pub fn optimizer_config(&self, function: FunctionId) -> Option<OptimizerConfig> {
        self.optimizer(function).map(Optimizer::config)
    }

    pub fn optimizers(&self) -> impl Iterator<Item = &Optimizer> + '_ {
        self.optimizers.iter().map(|(_, opt)| opt)
    }

    /// Step every optimizer.
    pub fn update(&mut self, graph: &mut Graph) -> Result<()> {
        for (_, opt) in &mut self.optimizers {
            opt.update(graph)?;
        }
        log::debug!("updated {} optimizers", self.optimizers.len());
        Ok(())
    }

    /// Forget every member's pending forward calls.
    pub fn reset_state(&self, graph: &mut Graph) -> Result<()> {
        for fid in self.functions() {
            graph.reset_history(fid)?;
        }
        Ok(())
    }

    /// Fold each activation function into the layer right before it.
    ///
    /// Returns the number of folds. Folded activations leave the stack; the
    /// surviving layer keeps its name.
    pub fn compress(&mut self, graph: &mut Graph) -> Result<usize> {
        let mut kept: Vec<LayerEntry> = Vec::with_capacity(self.entries.len());
        let mut folded = 0;
        for entry in std::mem::take(&mut self.entries) {
            if let Some(prev) = kept.last()
                && fuse_activation(graph, prev.function, entry.function)?
            {
                folded += 1;
                continue;
            }
            kept.push(entry);
        }
        self.entries = kept;
        Ok(folded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::layers::{Linear, ReLU, Sigmoid, Tanh};
    use crate::nn::loss::MeanSquaredError;
    use crate::nn::optim::Sgd;

    fn mlp(graph: &mut Graph) -> FunctionStack {
        FunctionStack::builder()
            .add_named("fc1", Linear::layer(3, 4, true, Some(7)).unwrap())
            .add(Function::from(Tanh))
            .add_named("fc2", Linear::layer(4, 2, true, Some(8)).unwrap())
            .add(Function::from(Sigmoid))
            .build(graph)
    }

    #[test]
    fn test_builder_names() {
        let mut graph = Graph::new();
        let stack = FunctionStack::builder()
            .add_named("", Function::from(ReLU))
            .add_named("out", Function::from(ReLU))
            .build(&mut graph);
        assert_eq!(stack.layer_names(), vec![None, Some("out")]);
        assert_eq!(graph.function_count(), 2);
    }

    #[test]
    fn test_training_step_reduces_loss() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut graph = Graph::new();
        let mut stack = mlp(&mut graph);
        stack
            .set_optimizer(&graph, &OptimizerConfig::Sgd(Sgd::new(0.5)))
            .unwrap();
        let target = [0.0, 1.0];

        let mut losses = Vec::new();
        for _ in 0..20 {
            let x = graph.input(vec![0.5, -0.2, 0.1], &[3], 1).unwrap();
            let y = stack.forward(&mut graph, x).unwrap();
            losses.push(MeanSquaredError.evaluate(&mut graph, y, &target).unwrap());
            stack.backward(&mut graph, y).unwrap();
            stack.update(&mut graph).unwrap();
            graph.release_activations();
        }
        assert!(losses[19] < losses[0]);
    }

    #[test]
    fn test_compress_matches_uncompressed_predictions() {
        let mut graph = Graph::new();
        let mut stack = mlp(&mut graph);
        let x = graph.input(vec![0.3, 0.1, -0.4], &[3], 1).unwrap();
        let y = stack.predict(&mut graph, x).unwrap();
        let before = graph.data(y).unwrap().to_vec();

        assert_eq!(stack.compress(&mut graph).unwrap(), 2);
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.layer_names(), vec![Some("fc1"), Some("fc2")]);
        let y = stack.predict(&mut graph, x).unwrap();
        let after = graph.data(y).unwrap().to_vec();
        assert_eq!(before, after);
    }

    #[test]
    fn test_compress_skips_functions_with_pending_calls() {
        let mut graph = Graph::new();
        let mut stack = mlp(&mut graph);
        let x = graph.input(vec![0.3, 0.1, -0.4], &[3], 1).unwrap();
        stack.forward(&mut graph, x).unwrap();
        assert_eq!(stack.compress(&mut graph).unwrap(), 0);

        stack.reset_state(&mut graph).unwrap();
        assert_eq!(stack.compress(&mut graph).unwrap(), 2);
    }

    #[test]
    fn test_optimizers_only_for_parameterized_functions() {
        let mut graph = Graph::new();
        let mut stack = mlp(&mut graph);
        stack
            .set_optimizer(&graph, &OptimizerConfig::default())
            .unwrap();
        assert_eq!(stack.optimizers().count(), 2);
        let fc1 = stack.entries()[0].function;
        assert_eq!(
            stack.optimizer_config(fc1),
            Some(OptimizerConfig::default())
        );
        assert!(stack.optimizer_config(stack.entries()[1].function).is_none());
    }
}
