use super::{OptimizerConfig, RuleState, UpdateRule};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// RMSProp
///
/// Update rule:
/// - s ← α·s + (1 - α)·∇θ²
/// - θ ← θ - lr·∇θ / (√s + ε)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct RmsProp {
    pub lr: f32,
    pub alpha: f32,
    pub eps: f32,
}

impl RmsProp {
    #[must_use]
    pub fn new(lr: f32) -> Self {
        RmsProp {
            lr,
            alpha: 0.99,
            eps: 1e-8,
        }
    }
}

impl Default for RmsProp {
    fn default() -> Self {
        RmsProp::new(0.01)
    }
}

impl UpdateRule for RmsProp {
    fn name(&self) -> &'static str {
        "RmsProp"
    }

    fn state_slots(&self) -> usize {
        1
    }

    fn update(&self, data: &mut [f32], grad: &[f32], state: &mut RuleState, _step: u64) {
        let [ms] = state.slots_mut() else {
            return;
        };
        for ((theta, s), &g) in data.iter_mut().zip(ms.iter_mut()).zip(grad) {
            *s = self.alpha * *s + (1.0 - self.alpha) * g * g;
            *theta -= self.lr * g / (s.sqrt() + self.eps);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::RmsProp(self.clone())
    }
}
