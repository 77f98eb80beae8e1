//! AdaBound optimizer

use super::Optimizer;
use crate::Tensor;
use ndarray::Array1;

/// AdaBound optimizer (Luo et al. 2019).
///
/// Adam with per-element step sizes clipped into a band that narrows around
/// `final_lr` as training progresses, converging toward SGD behavior:
/// lower_t = final_lr * (1 - 1/(γt + 1)), upper_t = final_lr * (1 + 1/(γt)).
/// Weight decay is L2 folded into the gradient.
pub struct AdaBound {
    lr: f32,
    base_lr: f32,
    final_lr: f32,
    gamma: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    t: u64,
    m: Vec<Option<Array1<f32>>>,
    v: Vec<Option<Array1<f32>>>,
}

impl AdaBound {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lr: f32,
        final_lr: f32,
        gamma: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        weight_decay: f32,
    ) -> Self {
        Self {
            lr,
            base_lr: lr,
            final_lr,
            gamma,
            beta1,
            beta2,
            epsilon,
            weight_decay,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.1, 1e-3, 0.9, 0.999, 1e-8, 0.0)
    }

    fn ensure_moments(&mut self, n: usize) {
        if self.m.len() < n {
            self.m.resize(n, None);
            self.v.resize(n, None);
        }
    }
}

impl Optimizer for AdaBound {
    fn step(&mut self, params: &mut [Tensor]) {
        self.ensure_moments(params.len());
        self.t += 1;

        let t = self.t as f32;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        let step_size = self.lr * bc2.sqrt() / bc1;

        // bounds track the lr schedule applied by set_lr
        let final_lr = self.final_lr * self.lr / self.base_lr;
        let lower = final_lr * (1.0 - 1.0 / (self.gamma * t + 1.0));
        let upper = final_lr * (1.0 + 1.0 / (self.gamma * t));

        for (i, param) in params.iter_mut().enumerate() {
            if let Some(mut grad) = param.grad() {
                if self.weight_decay != 0.0 {
                    grad = grad + &*param.data() * self.weight_decay;
                }

                let m_t = if let Some(m) = &self.m[i] {
                    m * self.beta1 + &grad * (1.0 - self.beta1)
                } else {
                    &grad * (1.0 - self.beta1)
                };
                let grad_sq = &grad * &grad;
                let v_t = if let Some(v) = &self.v[i] {
                    v * self.beta2 + &grad_sq * (1.0 - self.beta2)
                } else {
                    &grad_sq * (1.0 - self.beta2)
                };

                let denom = v_t.mapv(f32::sqrt) + self.epsilon;
                let eta = denom.mapv(|d| (step_size / d).clamp(lower, upper));
                let update = &eta * &m_t;
                let next = &*param.data() - &update;
                *param.data_mut() = next;

                self.m[i] = Some(m_t);
                self.v[i] = Some(v_t);
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}
