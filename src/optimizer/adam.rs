use rayon::prelude::*;

use crate::graph::edge::EdgeId;

use super::{Optimizer, ParamState};

/// Adam as in <https://arxiv.org/abs/1412.6980>, with first and second moment
/// estimates per parameter edge.
///
/// The decay powers `b1_t`/`b2_t` belong to the optimizer instance, not to
/// any buffer: after `n` calls to `update`, `b1_t == b1^n` no matter how
/// many distinct edges the instance drives.
#[derive(Debug)]
pub struct Adam {
    pub alpha: f32,
    pub b1: f32,
    pub b2: f32,
    pub eps: f32,
    b1_t: f32,
    b2_t: f32,
    momentum: ParamState,
    velocity: ParamState,
}

impl Adam {
    pub fn new(alpha: f32) -> Self {
        let b1 = 0.9;
        let b2 = 0.999;
        Self {
            alpha,
            b1,
            b2,
            eps: 1e-8,
            b1_t: 1.0,
            b2_t: 1.0,
            momentum: ParamState::new(),
            velocity: ParamState::new(),
        }
    }

    /// Current first-moment decay power, exposed for diagnostics.
    pub fn b1_t(&self) -> f32 {
        self.b1_t
    }

    pub fn b2_t(&self) -> f32 {
        self.b2_t
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl Optimizer for Adam {
    fn update(&mut self, key: EdgeId, dw: &[f32], w: &mut [f32], parallelize: bool) {
        self.b1_t *= self.b1;
        self.b2_t *= self.b2;
        let (alpha, b1, b2, eps) = (self.alpha, self.b1, self.b2, self.eps);
        let (b1_t, b2_t) = (self.b1_t, self.b2_t);
        let mt = self.momentum.get(key, w.len());
        // split borrow: momentum and velocity are distinct maps
        let vt = self.velocity.get(key, w.len());

        let step = |w: &mut f32, m: &mut f32, v: &mut f32, d: &f32| {
            *m = b1 * *m + (1.0 - b1) * d;
            *v = b2 * *v + (1.0 - b2) * d * d;
            *w -= alpha * (*m / (1.0 - b1_t)) / ((*v / (1.0 - b2_t)) + eps).sqrt();
        };
        if parallelize {
            w.par_iter_mut()
                .zip(mt.par_iter_mut())
                .zip(vt.par_iter_mut())
                .zip(dw)
                .for_each(|(((w, m), v), d)| step(w, m, v, d));
        } else {
            for (((w, m), v), d) in w.iter_mut().zip(mt.iter_mut()).zip(vt.iter_mut()).zip(dw) {
                step(w, m, v, d);
            }
        }
    }

    fn reset(&mut self) {
        self.momentum.clear();
        self.velocity.clear();
        self.b1_t = 1.0;
        self.b2_t = 1.0;
    }
}
