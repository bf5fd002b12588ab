use super::{OptimizerConfig, RuleState, UpdateRule};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Stochastic Gradient Descent
///
/// Update rule: θ ← θ - lr·(∇θ + λ·θ)
///
/// `weight_decay` (λ) is an L2 penalty folded into the gradient; 0 disables it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct Sgd {
    pub lr: f32,
    pub weight_decay: f32,
}

impl Sgd {
    #[must_use]
    pub fn new(lr: f32) -> Self {
        Sgd {
            lr,
            weight_decay: 0.0,
        }
    }

    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Default for Sgd {
    fn default() -> Self {
        Sgd::new(0.01)
    }
}

impl UpdateRule for Sgd {
    fn name(&self) -> &'static str {
        "Sgd"
    }

    fn state_slots(&self) -> usize {
        0
    }

    fn update(&self, data: &mut [f32], grad: &[f32], _state: &mut RuleState, _step: u64) {
        for (theta, &g) in data.iter_mut().zip(grad) {
            *theta -= self.lr * (g + self.weight_decay * *theta);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::Sgd(self.clone())
    }
}

/// SGD with momentum
///
/// Update rule:
/// - v ← μ·v - lr·(∇θ + λ·θ)
/// - θ ← θ + v
///
/// Momentum helps accelerate convergence and dampen oscillations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct MomentumSgd {
    pub lr: f32,
    pub momentum: f32,
    pub weight_decay: f32,
}

impl MomentumSgd {
    #[must_use]
    pub fn new(lr: f32, momentum: f32) -> Self {
        MomentumSgd {
            lr,
            momentum,
            weight_decay: 0.0,
        }
    }
}

impl Default for MomentumSgd {
    fn default() -> Self {
        MomentumSgd::new(0.01, 0.9)
    }
}

impl UpdateRule for MomentumSgd {
    fn name(&self) -> &'static str {
        "MomentumSgd"
    }

    fn state_slots(&self) -> usize {
        1
    }

    fn update(&self, data: &mut [f32], grad: &[f32], state: &mut RuleState, _step: u64) {
        let [velocity] = state.slots_mut() else {
            return;
        };
        for ((theta, v), &g) in data.iter_mut().zip(velocity.iter_mut()).zip(grad) {
            let g = g + self.weight_decay * *theta;
            *v = self.momentum * *v - self.lr * g;
            *theta += *v;
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::MomentumSgd(self.clone())
    }
}
