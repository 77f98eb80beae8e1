//! Rectified Adam optimizer

use super::Optimizer;
use crate::Tensor;
use ndarray::Array1;

/// RAdam optimizer (Liu et al. 2020).
///
/// Rectifies the variance of the adaptive learning rate in early steps: while
/// the approximated SMA length ρ_t ≤ 4 the update falls back to plain
/// bias-corrected momentum, afterwards the usual adaptive step is scaled by
/// the rectification term r_t. Weight decay is L2 folded into the gradient.
pub struct RAdam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    t: u64,
    m: Vec<Option<Array1<f32>>>,
    v: Vec<Option<Array1<f32>>>,
}

impl RAdam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32, weight_decay: f32) -> Self {
        Self { lr, beta1, beta2, epsilon, weight_decay, t: 0, m: Vec::new(), v: Vec::new() }
    }

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

impl Optimizer for RAdam {
    fn step(&mut self, params: &mut [Tensor]) {
        self.ensure_moments(params.len());
        self.t += 1;

        let t = self.t as f32;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        let rho_inf = 2.0 / (1.0 - self.beta2) - 1.0;
        let rho_t = rho_inf - 2.0 * t * self.beta2.powi(self.t as i32) / bc2;

        let rect = if rho_t > 4.0 {
            let r = ((rho_t - 4.0) * (rho_t - 2.0) * rho_inf)
                / ((rho_inf - 4.0) * (rho_inf - 2.0) * rho_t);
            Some(r.sqrt())
        } else {
            None
        };

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

                let m_hat = &m_t / bc1;
                let update = match rect {
                    Some(r) => {
                        let v_hat = (&v_t / bc2).mapv(f32::sqrt) + self.epsilon;
                        &m_hat / &v_hat * (self.lr * r)
                    }
                    None => &m_hat * self.lr,
                };
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
    fn test_radam_quadratic_convergence() {
        let mut params = vec![Tensor::from_vec(vec![4.0, -2.0], true)];
        let mut optimizer = RAdam::default_params(0.1);

        for _ in 0..300 {
            let grad = params[0].to_array().mapv(|x| 2.0 * x);
            params[0].set_grad(grad);
            optimizer.step(&mut params);
        }

        for &val in params[0].data().iter() {
            assert!(val.abs() < 0.5, "value {val} did not converge");
        }
    }

    #[test]
    fn test_radam_early_steps_use_momentum_only() {
        // with beta2 = 0.999 the first few steps have rho_t <= 4
        let mut params = vec![Tensor::from_vec(vec![1.0], true)];
        let mut optimizer = RAdam::default_params(0.1);

        params[0].set_grad(ndarray::arr1(&[1.0]));
        optimizer.step(&mut params);

        // m_hat = 1.0 on the first step, so the update is exactly lr
        let val = params[0].data()[0];
        assert!((val - 0.9).abs() < 1e-5, "got {val}");
    }

    #[test]
    fn test_radam_updates_stay_finite() {
        let mut params = vec![Tensor::from_vec(vec![1e5, -1e5], true)];
        let mut optimizer = RAdam::default_params(0.01);
        for _ in 0..10 {
            let grad = params[0].to_array().mapv(|x| 2.0 * x);
            params[0].set_grad(grad);
            optimizer.step(&mut params);
        }
        for &val in params[0].data().iter() {
            assert!(val.is_finite());
        }
    }
}
