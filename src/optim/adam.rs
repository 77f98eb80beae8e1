//! Adam optimizer with coupled L2 weight decay

use super::Optimizer;
use crate::Tensor;
use ndarray::Array1;

/// Adam optimizer
///
/// Weight decay here is classic L2 regularization folded into the gradient,
/// θ_t = θ_{t-1} - lr * m̂_t / (√v̂_t + ε) with g ← g + λθ.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    t: u64,
    m: Vec<Option<Array1<f32>>>,
    v: Vec<Option<Array1<f32>>>,
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32, weight_decay: f32) -> Self {
        Self { lr, beta1, beta2, epsilon, weight_decay, t: 0, m: Vec::new(), v: Vec::new() }
    }

    /// Adam with the usual betas and no weight decay
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8, 0.0)
    }

    fn ensure_moments(&mut self, n: usize) {
        if self.m.len() < n {
            self.m.resize(n, None);
            self.v.resize(n, None);
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [Tensor]) {
        self.ensure_moments(params.len());
        self.t += 1;

        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        let lr_t = self.lr * bc2.sqrt() / bc1;

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

                let update = &m_t / &(v_t.mapv(f32::sqrt) + self.epsilon) * lr_t;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adam_quadratic_convergence() {
        let mut params = vec![Tensor::from_vec(vec![5.0, -3.0, 2.0], true)];
        let mut optimizer = Adam::default_params(0.1);

        for _ in 0..200 {
            let grad = params[0].to_array().mapv(|x| 2.0 * x);
            params[0].set_grad(grad);
            optimizer.step(&mut params);
        }

        for &val in params[0].data().iter() {
            assert!(val.abs() < 0.5, "value {val} did not converge");
        }
    }

    #[test]
    fn test_adam_skips_grad_free_params() {
        let mut params = vec![Tensor::from_vec(vec![1.0, 2.0], false)];
        let mut optimizer = Adam::default_params(0.1);
        optimizer.step(&mut params);
        assert_eq!(params[0].to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_adam_weight_decay_pulls_toward_zero() {
        // zero base gradient isolates the decay term: only the L2 pull moves θ
        let mut plain = vec![Tensor::from_vec(vec![2.0], true)];
        let mut decayed = vec![Tensor::from_vec(vec![2.0], true)];
        let mut opt_plain = Adam::new(0.05, 0.9, 0.999, 1e-8, 0.0);
        let mut opt_decay = Adam::new(0.05, 0.9, 0.999, 1e-8, 1.0);

        for _ in 0..20 {
            plain[0].set_grad(ndarray::arr1(&[0.0]));
            decayed[0].set_grad(ndarray::arr1(&[0.0]));
            opt_plain.step(&mut plain);
            opt_decay.step(&mut decayed);
        }
        assert_eq!(plain[0].data()[0], 2.0);
        let d = decayed[0].data()[0];
        assert!(d > 0.0 && d < 2.0, "decayed value {d} not pulled toward zero");
    }
}
