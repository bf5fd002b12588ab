use std::collections::BTreeMap;

use crate::error::{Result, TideError};
use crate::function::Function;
use crate::graph::{FunctionId, Graph, TensorId};
use crate::nn::optim::{Accumulation, Optimizer, OptimizerConfig};
use crate::nn::{bind_optimizers, fuse_activation};

/// Named tensors flowing through a [`FunctionDictionary`].
pub type Values = BTreeMap<String, TensorId>;

/// A named function and the names of the values it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub function: FunctionId,
    pub inputs: Vec<String>,
}

/// A graph of named blocks evaluated in declaration order.
///
/// Each block reads values by name (external inputs or earlier block
/// outputs) and publishes its output under its own name. Blocks with
/// several outputs publish `name.0`, `name.1`, ...
#[derive(Debug, Default)]
pub struct FunctionDictionary {
    blocks: Vec<Block>,
    optimizers: Vec<(FunctionId, Optimizer)>,
}

impl FunctionDictionary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` in `graph` and append it as a block.
    pub fn add_block(
        &mut self,
        graph: &mut Graph,
        name: impl Into<String>,
        function: Function,
        inputs: &[&str],
    ) -> Result<FunctionId> {
        let name = name.into();
        self.check_name(&name)?;
        let function = graph.add_function(function);
        self.blocks.push(Block {
            name,
            function,
            inputs: inputs.iter().map(|s| (*s).to_string()).collect(),
        });
        Ok(function)
    }

    /// Append a block around an already registered function.
    pub fn add(&mut self, block: Block) -> Result<()> {
        self.check_name(&block.name)?;
        self.blocks.push(block);
        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.blocks.iter().any(|b| b.name == name) {
            return Err(TideError::InvalidParameter(format!(
                "block `{name}` already exists"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.blocks.iter().map(|b| b.function)
    }

    /// Evaluate every block, recording history for backward.
    ///
    /// Returns `inputs` extended with every block output.
    pub fn forward(&self, graph: &mut Graph, inputs: &Values) -> Result<Values> {
        self.run(inputs, |block, xs| graph.forward(block.function, xs))
    }

    /// Inference pass over every block, no history.
    pub fn predict(&self, graph: &mut Graph, inputs: &Values) -> Result<Values> {
        self.run(inputs, |block, xs| graph.predict(block.function, xs))
    }

    fn run(
        &self,
        inputs: &Values,
        mut call: impl FnMut(&Block, &[TensorId]) -> Result<Vec<TensorId>>,
    ) -> Result<Values> {
        let mut values = inputs.clone();
        for block in &self.blocks {
            let xs = block
                .inputs
                .iter()
                .map(|name| {
                    values
                        .get(name)
                        .copied()
                        .ok_or_else(|| TideError::UnknownBlock(name.clone()))
                })
                .collect::<Result<Vec<_>>>()?;
            let outputs = call(block, &xs)?;
            log::trace!("block `{}` -> {} outputs", block.name, outputs.len());
            match outputs.as_slice() {
                [only] => {
                    values.insert(block.name.clone(), *only);
                }
                many => {
                    for (i, &y) in many.iter().enumerate() {
                        values.insert(format!("{}.{i}", block.name), y);
                    }
                }
            }
        }
        Ok(values)
    }

    pub fn backward(&self, graph: &mut Graph, y: TensorId) -> Result<()> {
        graph.backward(y)
    }

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
        Ok(())
    }

    pub fn add_optimizer(&mut self, function: FunctionId, optimizer: Optimizer) {
        self.optimizers.push((function, optimizer));
    }

    pub fn update(&mut self, graph: &mut Graph) -> Result<()> {
        for (_, opt) in &mut self.optimizers {
            opt.update(graph)?;
        }
        log::debug!("updated {} optimizers", self.optimizers.len());
        Ok(())
    }

    pub fn reset_state(&self, graph: &mut Graph) -> Result<()> {
        for fid in self.functions() {
            graph.reset_history(fid)?;
        }
        Ok(())
    }

    /// Fold activation blocks into the layer block they read from.
    ///
    /// A fold happens only when the layer's output feeds exactly one block and
    /// that block is an activation reading nothing else. The fused block takes
    /// the activation block's name, so its downstream readers are unaffected.
    pub fn compress(&mut self, graph: &mut Graph) -> Result<usize> {
        let mut folded = 0;
        let mut i = 0;
        while i < self.blocks.len() {
            let layer = &self.blocks[i].name;
            let readers: Vec<usize> = self
                .blocks
                .iter()
                .enumerate()
                .filter(|(_, b)| b.inputs.iter().any(|n| n == layer))
                .map(|(j, _)| j)
                .collect();
            if let [j] = readers[..]
                && j > i
                && self.blocks[j].inputs.len() == 1
                && fuse_activation(graph, self.blocks[i].function, self.blocks[j].function)?
            {
                let activation = self.blocks.remove(j);
                log::debug!("block `{}` absorbed into `{}`", activation.name, self.blocks[i].name);
                self.blocks[i].name = activation.name;
                folded += 1;
            }
            i += 1;
        }
        Ok(folded)
    }
}
