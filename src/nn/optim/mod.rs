//! Gradient-based update rules and their binding to function parameters.
//!
//! An [`Optimizer`] pairs one [`UpdateRule`] with a set of bound parameters.
//! Each binding owns the rule's per-parameter state (moments, accumulators)
//! and its own step count, so one optimizer can drive parameters that are
//! updated at different rates.

pub mod adabound;
pub mod adagrad;
pub mod adam;
pub mod radam;
pub mod rmsprop;
pub mod sgd;

pub use adabound::AdaBound;
pub use adagrad::AdaGrad;
pub use adam::{Adam, AdamW};
pub use radam::RAdam;
pub use rmsprop::RmsProp;
pub use sgd::{MomentumSgd, Sgd};

use crate::error::Result;
use crate::graph::{FunctionId, Graph, ParamRef};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Per-parameter optimizer state: `state_slots()` buffers shaped like the parameter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleState {
    slots: Vec<Vec<f32>>,
}

impl RuleState {
    #[must_use]
    pub fn new(slots: usize, len: usize) -> Self {
        RuleState {
            slots: vec![vec![0.0; len]; slots],
        }
    }

    #[must_use]
    pub fn slots(&self) -> &[Vec<f32>] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.slots
    }
}

/// A parameter update rule.
///
/// `update` must be a pure function of its arguments: the parameter values,
/// the effective gradient, the binding's state and its 1-based step count.
pub trait UpdateRule: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Number of parameter-shaped state buffers the rule keeps.
    fn state_slots(&self) -> usize;

    fn update(&self, data: &mut [f32], grad: &[f32], state: &mut RuleState, step: u64);

    fn lr(&self) -> f32;

    fn set_lr(&mut self, lr: f32);

    fn config(&self) -> OptimizerConfig;
}

/// How gradients accumulated over several backward passes become one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "snake_case")]
pub enum Accumulation {
    /// Divide by the number of contributing backward passes.
    #[default]
    Mean,
    /// Use the accumulated sum unchanged.
    Sum,
}

impl Accumulation {
    fn scale(self, pending: usize) -> f32 {
        match self {
            Accumulation::Mean => 1.0 / pending.max(1) as f32,
            Accumulation::Sum => 1.0,
        }
    }
}

/// Serializable description of an update rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Sgd(Sgd),
    MomentumSgd(MomentumSgd),
    #[serde(rename = "adagrad")]
    AdaGrad(AdaGrad),
    #[serde(rename = "rmsprop")]
    RmsProp(RmsProp),
    Adam(Adam),
    #[serde(rename = "adamw")]
    AdamW(AdamW),
    #[serde(rename = "radam")]
    RAdam(RAdam),
    #[serde(rename = "adabound")]
    AdaBound(AdaBound),
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Sgd(Sgd::default())
    }
}

impl OptimizerConfig {
    #[must_use]
    pub fn build(&self) -> Box<dyn UpdateRule> {
        match self {
            OptimizerConfig::Sgd(r) => Box::new(r.clone()),
            OptimizerConfig::MomentumSgd(r) => Box::new(r.clone()),
            OptimizerConfig::AdaGrad(r) => Box::new(r.clone()),
            OptimizerConfig::RmsProp(r) => Box::new(r.clone()),
            OptimizerConfig::Adam(r) => Box::new(r.clone()),
            OptimizerConfig::AdamW(r) => Box::new(r.clone()),
            OptimizerConfig::RAdam(r) => Box::new(r.clone()),
            OptimizerConfig::AdaBound(r) => Box::new(r.clone()),
        }
    }
}

#[derive(Debug)]
struct Binding {
    param: ParamRef,
    state: RuleState,
    steps: u64,
}

/// An update rule bound to a set of parameters.
#[derive(Debug)]
pub struct Optimizer {
    rule: Box<dyn UpdateRule>,
    accumulation: Accumulation,
    bindings: Vec<Binding>,
}

impl Optimizer {
    pub fn new(rule: impl UpdateRule + 'static) -> Self {
        Self::from_rule(Box::new(rule))
    }

    pub fn from_rule(rule: Box<dyn UpdateRule>) -> Self {
        Optimizer {
            rule,
            accumulation: Accumulation::default(),
            bindings: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::from_rule(config.build())
    }

    #[must_use]
    pub fn with_accumulation(mut self, accumulation: Accumulation) -> Self {
        self.accumulation = accumulation;
        self
    }

    /// Bind every parameter of `function`.
    pub fn bind(&mut self, graph: &Graph, function: FunctionId) -> Result<()> {
        for p in graph.params_of(function)? {
            self.bind_param(graph, p)?;
        }
        Ok(())
    }

    pub fn bind_param(&mut self, graph: &Graph, param: ParamRef) -> Result<()> {
        let len = graph.param(param)?.data.len();
        if self.bindings.iter().any(|b| b.param == param) {
            log::warn!("{param:?} is already bound to this {}", self.rule.name());
            return Ok(());
        }
        self.bindings.push(Binding {
            param,
            state: RuleState::new(self.rule.state_slots(), len),
            steps: 0,
        });
        Ok(())
    }

    /// Apply one step to every bound parameter that has a gradient, then clear
    /// all bound gradients.
    pub fn update(&mut self, graph: &mut Graph) -> Result<()> {
        for binding in &mut self.bindings {
            let param = graph.param_mut(binding.param)?;
            if let Some(grad) = param.grad.take() {
                let scale = self.accumulation.scale(param.pending_update_count());
                let effective: Vec<f32> = if scale == 1.0 {
                    grad
                } else {
                    grad.iter().map(|g| g * scale).collect()
                };
                binding.steps += 1;
                self.rule
                    .update(&mut param.data, &effective, &mut binding.state, binding.steps);
                log::trace!(
                    "{} step {} on {:?}",
                    self.rule.name(),
                    binding.steps,
                    binding.param
                );
            }
            param.clear_grad();
        }
        Ok(())
    }

    /// Visit each binding's parameter, state and step count.
    pub fn bindings(&self) -> impl Iterator<Item = (ParamRef, &RuleState, u64)> + '_ {
        self.bindings.iter().map(|b| (b.param, &b.state, b.steps))
    }

    #[must_use]
    pub fn rule(&self) -> &dyn UpdateRule {
        self.rule.as_ref()
    }

    #[must_use]
    pub fn accumulation(&self) -> Accumulation {
        self.accumulation
    }

    #[must_use]
    pub fn lr(&self) -> f32 {
        self.rule.lr()
    }

    pub fn set_lr(&mut self, lr: f32) {
        self.rule.set_lr(lr);
    }

    #[must_use]
    pub fn config(&self) -> OptimizerConfig {
        self.rule.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::layers::Linear;
    use approx::assert_relative_eq;

    fn scaled_twice(graph: &mut Graph) -> FunctionId {
        // two backward passes through w = 1 with inputs 1 and 3
        let f = graph.add_function(Linear::from_weights(vec![1.0], None, 1, 1).unwrap());
        for x in [1.0, 3.0] {
            let x = graph.input(vec![x], &[1], 1).unwrap();
            let y = graph.forward_one(f, &[x]).unwrap();
            graph.seed_ones(y).unwrap();
            graph.backward(y).unwrap();
        }
        f
    }

    #[test]
    fn test_mean_accumulation_divides_by_pending_count() {
        let mut graph = Graph::new();
        let f = scaled_twice(&mut graph);
        let mut opt = Optimizer::new(Sgd::new(0.5));
        opt.bind(&graph, f).unwrap();
        opt.update(&mut graph).unwrap();
        // grad sum 4, mean 2
        let w = &graph.function(f).unwrap().params()[0];
        assert_relative_eq!(w.data[0], 0.0);
        assert!(w.grad.is_none());
        assert_eq!(w.pending_update_count(), 0);
    }

    #[test]
    fn test_sum_accumulation_uses_raw_gradient() {
        let mut graph = Graph::new();
        let f = scaled_twice(&mut graph);
        let mut opt = Optimizer::new(Sgd::new(0.5)).with_accumulation(Accumulation::Sum);
        opt.bind(&graph, f).unwrap();
        opt.update(&mut graph).unwrap();
        assert_relative_eq!(graph.function(f).unwrap().params()[0].data[0], -1.0);
    }

    #[test]
    fn test_params_without_gradient_are_untouched() {
        let mut graph = Graph::new();
        let f = graph.add_function(Linear::from_weights(vec![1.0], Some(vec![2.0]), 1, 1).unwrap());
        let mut opt = Optimizer::from_config(&OptimizerConfig::Adam(Adam::new(0.1)));
        opt.bind(&graph, f).unwrap();
        opt.update(&mut graph).unwrap();
        assert_eq!(graph.function(f).unwrap().params()[0].data, vec![1.0]);
        assert!(opt.bindings().all(|(_, _, steps)| steps == 0));
    }

    #[test]
    fn test_binding_twice_is_ignored() {
        let mut graph = Graph::new();
        let f = graph.add_function(Linear::from_weights(vec![1.0], None, 1, 1).unwrap());
        let mut opt = Optimizer::new(Sgd::new(0.1));
        opt.bind(&graph, f).unwrap();
        opt.bind(&graph, f).unwrap();
        assert_eq!(opt.bindings().count(), 1);
    }

    #[test]
    fn test_config_json_uses_kind_tag_and_defaults() {
        let config: OptimizerConfig =
            serde_json::from_str(r#"{"kind": "adam", "lr": 0.002, "amsgrad": true}"#).unwrap();
        let OptimizerConfig::Adam(adam) = &config else {
            panic!("expected adam, got {config:?}");
        };
        assert_relative_eq!(adam.lr, 0.002);
        assert_relative_eq!(adam.beta1, 0.9);
        assert!(adam.amsgrad);
        assert_eq!(config.build().config(), config);
    }

    #[test]
    fn test_set_lr_reaches_rule() {
        let mut opt = Optimizer::from_config(&OptimizerConfig::default());
        assert_relative_eq!(opt.lr(), 0.01);
        opt.set_lr(0.2);
        assert_relative_eq!(opt.lr(), 0.2);
        assert_eq!(opt.config(), OptimizerConfig::Sgd(Sgd::new(0.2)));
    }
}
