use super::adam::{advance_moments, bias_correction};
use super::{OptimizerConfig, RuleState, UpdateRule};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Rectified Adam
///
/// ρ∞ = 2 / (1 - β2) - 1, ρt = ρ∞ - 2t·β2^t / (1 - β2^t)
///
/// While ρt ≤ 5 the adaptive term is unreliable and the step is plain momentum
/// (θ ← θ - lr·m̂). Afterwards the Adam step is scaled by
/// r = √((ρt - 4)(ρt - 2)ρ∞ / ((ρ∞ - 4)(ρ∞ - 2)ρt)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct RAdam {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
}

impl RAdam {
    #[must_use]
    pub fn new(lr: f32) -> Self {
        RAdam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    /// Variance rectification factor for `step`, `None` during warm-up.
    #[must_use]
    pub fn rectification(&self, step: u64) -> Option<f32> {
        let rho_inf = 2.0 / (1.0 - self.beta2) - 1.0;
        let beta2_t = self.beta2.powi(step.min(i32::MAX as u64) as i32);
        let t = step as f32;
        let rho_t = rho_inf - 2.0 * t * beta2_t / (1.0 - beta2_t);
        (rho_t > 5.0).then(|| {
            ((rho_t - 4.0) * (rho_t - 2.0) * rho_inf
                / ((rho_inf - 4.0) * (rho_inf - 2.0) * rho_t))
                .sqrt()
        })
    }
}

impl Default for RAdam {
    fn default() -> Self {
        RAdam::new(0.001)
    }
}

impl UpdateRule for RAdam {
    fn name(&self) -> &'static str {
        "RAdam"
    }

    fn state_slots(&self) -> usize {
        2
    }

    fn update(&self, data: &mut [f32], grad: &[f32], state: &mut RuleState, step: u64) {
        let [m, v] = state.slots_mut() else {
            return;
        };
        advance_moments(m, v, grad, self.beta1, self.beta2);
        let m_scale = bias_correction(self.beta1, step);
        match self.rectification(step) {
            Some(r) => {
                let v_scale = bias_correction(self.beta2, step);
                for ((theta, &mi), &vi) in data.iter_mut().zip(m.iter()).zip(v.iter()) {
                    *theta -= self.lr * r * (mi * m_scale) / ((vi * v_scale).sqrt() + self.eps);
                }
            }
            None => {
                for (theta, &mi) in data.iter_mut().zip(m.iter()) {
                    *theta -= self.lr * mi * m_scale;
                }
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::RAdam(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_warmup_uses_momentum_step() {
        let rule = RAdam::new(0.1);
        assert!(rule.rectification(1).is_none());
        let mut state = RuleState::new(2, 1);
        let mut data = [1.0];
        rule.update(&mut data, &[2.0], &mut state, 1);
        // m̂ = g on the first step
        assert_abs_diff_eq!(data[0], 0.8, epsilon = 1e-5);
    }

    #[test]
    fn test_rectification_kicks_in_and_approaches_one() {
        let rule = RAdam::new(0.1);
        let early = rule.rectification(10).unwrap();
        let late = rule.rectification(100_000).unwrap();
        assert!(early > 0.0 && early < late);
        assert_abs_diff_eq!(late, 1.0, epsilon = 1e-2);
    }
}
