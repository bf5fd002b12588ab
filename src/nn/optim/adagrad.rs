use super::{OptimizerConfig, RuleState, UpdateRule};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// AdaGrad
///
/// Update rule:
/// - h ← h + ∇θ²
/// - θ ← θ - lr·∇θ / (√h + ε)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct AdaGrad {
    pub lr: f32,
    pub eps: f32,
}

impl AdaGrad {
    #[must_use]
    pub fn new(lr: f32) -> Self {
        AdaGrad { lr, eps: 1e-8 }
    }
}

impl Default for AdaGrad {
    fn default() -> Self {
        AdaGrad::new(0.01)
    }
}

impl UpdateRule for AdaGrad {
    fn name(&self) -> &'static str {
        "AdaGrad"
    }

    fn state_slots(&self) -> usize {
        1
    }

    fn update(&self, data: &mut [f32], grad: &[f32], state: &mut RuleState, _step: u64) {
        let [h] = state.slots_mut() else {
            return;
        };
        for ((theta, h), &g) in data.iter_mut().zip(h.iter_mut()).zip(grad) {
            *h += g * g;
            *theta -= self.lr * g / (h.sqrt() + self.eps);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::AdaGrad(self.clone())
    }
}
