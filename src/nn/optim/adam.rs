use super::{OptimizerConfig, RuleState, UpdateRule};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Advance biased first and second moments by one gradient.
pub(crate) fn advance_moments(m: &mut [f32], v: &mut [f32], grad: &[f32], beta1: f32, beta2: f32) {
    for ((m, v), &g) in m.iter_mut().zip(v.iter_mut()).zip(grad) {
        *m = beta1 * *m + (1.0 - beta1) * g;
        *v = beta2 * *v + (1.0 - beta2) * g * g;
    }
}

/// 1 / (1 - β^t)
pub(crate) fn bias_correction(beta: f32, step: u64) -> f32 {
    1.0 / (1.0 - beta.powi(step.min(i32::MAX as u64) as i32))
}

/// Adam
///
/// Update rule:
/// - m ← β1·m + (1 - β1)·∇θ
/// - v ← β2·v + (1 - β2)·∇θ²
/// - θ ← θ - lr·m̂ / (√v̂ + ε), with bias-corrected m̂, v̂
///
/// With `amsgrad`, v̂ uses the running maximum of v.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct Adam {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub amsgrad: bool,
}

impl Adam {
    #[must_use]
    pub fn new(lr: f32) -> Self {
        Adam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            amsgrad: false,
        }
    }

    #[must_use]
    pub fn amsgrad(mut self) -> Self {
        self.amsgrad = true;
        self
    }
}

impl Default for Adam {
    fn default() -> Self {
        Adam::new(0.001)
    }
}

/// Shared Adam step over `m`, `v` (and `v_max` for AMSGrad).
fn adam_step(rule: &Adam, data: &mut [f32], grad: &[f32], state: &mut RuleState, step: u64) {
    let slots = state.slots_mut();
    let split = 2.min(slots.len());
    let (moments, rest) = slots.split_at_mut(split);
    let [m, v] = moments else {
        return;
    };
    advance_moments(m, v, grad, rule.beta1, rule.beta2);
    let m_scale = bias_correction(rule.beta1, step);
    let v_scale = bias_correction(rule.beta2, step);

    let second = match rest.first_mut() {
        Some(v_max) if rule.amsgrad => {
            for (mx, &vi) in v_max.iter_mut().zip(v.iter()) {
                *mx = mx.max(vi);
            }
            v_max.as_slice()
        }
        _ => v.as_slice(),
    };
    for ((theta, &mi), &vi) in data.iter_mut().zip(m.iter()).zip(second) {
        *theta -= rule.lr * (mi * m_scale) / ((vi * v_scale).sqrt() + rule.eps);
    }
}

impl UpdateRule for Adam {
    fn name(&self) -> &'static str {
        "Adam"
    }

    fn state_slots(&self) -> usize {
        if self.amsgrad { 3 } else { 2 }
    }

    fn update(&self, data: &mut [f32], grad: &[f32], state: &mut RuleState, step: u64) {
        adam_step(self, data, grad, state, step);
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::Adam(self.clone())
    }
}

/// AdamW
///
/// Adam with decoupled weight decay applied to the parameters directly:
/// θ ← (1 - lr·λ)·θ, followed by the Adam step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct AdamW {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub weight_decay: f32,
}

impl AdamW {
    #[must_use]
    pub fn new(lr: f32, weight_decay: f32) -> Self {
        AdamW {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
        }
    }

    fn as_adam(&self) -> Adam {
        Adam {
            lr: self.lr,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            amsgrad: false,
        }
    }
}

impl Default for AdamW {
    fn default() -> Self {
        AdamW::new(0.001, 0.01)
    }
}

impl UpdateRule for AdamW {
    fn name(&self) -> &'static str {
        "AdamW"
    }

    fn state_slots(&self) -> usize {
        2
    }

    fn update(&self, data: &mut [f32], grad: &[f32], state: &mut RuleState, step: u64) {
        let decay = 1.0 - self.lr * self.weight_decay;
        for theta in data.iter_mut() {
            *theta *= decay;
        }
        adam_step(&self.as_adam(), data, grad, state, step);
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::AdamW(self.clone())
    }
}
