use super::adam::{advance_moments, bias_correction};
use super::{OptimizerConfig, RuleState, UpdateRule};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// AdaBound
///
/// Adam whose per-element step size is clipped into a band that tightens
/// around `final_lr` as training proceeds:
/// - lower(t) = final_lr·(1 - 1 / (γt + 1))
/// - upper(t) = final_lr·(1 + 1 / (γt))
/// - η = clip(lr·√(1 - β2^t) / (1 - β1^t) / (√v + ε), lower, upper)
/// - θ ← θ - η·m
///
/// `final_lr` is scaled by `lr / base_lr`, so learning-rate schedules move the band too.
/// With `amsbound`, v is the running maximum of the second moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct AdaBound {
    pub lr: f32,
    pub base_lr: f32,
    pub final_lr: f32,
    pub gamma: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub amsbound: bool,
}

impl AdaBound {
    #[must_use]
    pub fn new(lr: f32, final_lr: f32) -> Self {
        AdaBound {
            lr,
            base_lr: lr,
            final_lr,
            gamma: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            amsbound: false,
        }
    }

    #[must_use]
    pub fn amsbound(mut self) -> Self {
        self.amsbound = true;
        self
    }

    /// Step-size band at `step`
    #[must_use]
    pub fn bounds(&self, step: u64) -> (f32, f32) {
        let final_lr = if self.base_lr > 0.0 {
            self.final_lr * self.lr / self.base_lr
        } else {
            self.final_lr
        };
        let gt = self.gamma * step as f32;
        let lower = final_lr * (1.0 - 1.0 / (gt + 1.0));
        let upper = if gt > 0.0 {
            final_lr * (1.0 + 1.0 / gt)
        } else {
            f32::INFINITY
        };
        (lower, upper)
    }
}

impl Default for AdaBound {
    fn default() -> Self {
        AdaBound::new(0.001, 0.1)
    }
}

impl UpdateRule for AdaBound {
    fn name(&self) -> &'static str {
        "AdaBound"
    }

    fn state_slots(&self) -> usize {
        if self.amsbound { 3 } else { 2 }
    }

    fn update(&self, data: &mut [f32], grad: &[f32], state: &mut RuleState, step: u64) {
        let slots = state.slots_mut();
        let split = 2.min(slots.len());
        let (moments, rest) = slots.split_at_mut(split);
        let [m, v] = moments else {
            return;
        };
        advance_moments(m, v, grad, self.beta1, self.beta2);

        let second = match rest.first_mut() {
            Some(v_max) if self.amsbound => {
                for (mx, &vi) in v_max.iter_mut().zip(v.iter()) {
                    *mx = mx.max(vi);
                }
                v_max.as_slice()
            }
            _ => v.as_slice(),
        };

        let step_size = self.lr * bias_correction(self.beta1, step)
            / bias_correction(self.beta2, step).sqrt();
        let (lower, upper) = self.bounds(step);
        for ((theta, &mi), &vi) in data.iter_mut().zip(m.iter()).zip(second) {
            let eta = (step_size / (vi.sqrt() + self.eps)).clamp(lower, upper);
            *theta -= eta * mi;
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::AdaBound(self.clone())
    }
}
