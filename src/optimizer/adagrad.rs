use rayon::prelude::*;

use crate::graph::edge::EdgeId;

use super::{Optimizer, ParamState};

/// Adagrad: per-element learning rates shrunk by the accumulated squared
/// gradient history.
#[derive(Debug)]
pub struct Adagrad {
    pub alpha: f32,
    pub eps: f32,
    history: ParamState,
}

impl Adagrad {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            eps: 1e-8,
            history: ParamState::new(),
        }
    }
}

impl Default for Adagrad {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl Optimizer for Adagrad {
    fn update(&mut self, key: EdgeId, dw: &[f32], w: &mut [f32], parallelize: bool) {
        let alpha = self.alpha;
        let eps = self.eps;
        let g = self.history.get(key, w.len());
        let step = |w: &mut f32, g: &mut f32, d: &f32| {
            *g += d * d;
            *w -= alpha * d / (g.sqrt() + eps);
        };
        if parallelize {
            w.par_iter_mut()
                .zip(g.par_iter_mut())
                .zip(dw)
                .for_each(|((w, g), d)| step(w, g, d));
        } else {
            for ((w, g), d) in w.iter_mut().zip(g.iter_mut()).zip(dw) {
                step(w, g, d);
            }
        }
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::tests::edge_ids;

    #[test]
    fn repeated_gradients_slow_down() {
        let ids = edge_ids(1);
        let mut opt = Adagrad::new(1.0);
        let mut w = vec![0.0; 4];
        opt.update(ids[0], &[1.0; 4], &mut w, false);
        let first_step = -w[0];
        opt.update(ids[0], &[1.0; 4], &mut w, false);
        let second_step = -w[0] - first_step;
        assert!((first_step - 1.0).abs() < 1e-4);
        assert!(second_step < first_step);
    }

    #[test]
    fn reset_forgets_history() {
        let ids = edge_ids(1);
        let mut opt = Adagrad::new(1.0);
        let mut w = vec![0.0; 4];
        opt.update(ids[0], &[1.0; 4], &mut w, false);
        opt.reset();
        let mut w2 = vec![0.0; 4];
        opt.update(ids[0], &[1.0; 4], &mut w2, false);
        assert!((w[0] - w2[0]).abs() < 1e-6);
    }
}
