use rayon::prelude::*;

use crate::graph::edge::EdgeId;

use super::Optimizer;

/// Plain gradient descent with optional L2 weight decay:
/// `w -= alpha * (dw + lambda * w)`.
#[derive(Clone, Debug)]
pub struct GradientDescent {
    /// Learning rate.
    pub alpha: f32,
    /// Weight decay coefficient.
    pub lambda: f32,
}

impl GradientDescent {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, lambda: 0.0 }
    }

    pub fn with_decay(alpha: f32, lambda: f32) -> Self {
        Self { alpha, lambda }
    }
}

impl Default for GradientDescent {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl Optimizer for GradientDescent {
    fn update(&mut self, _key: EdgeId, dw: &[f32], w: &mut [f32], parallelize: bool) {
        let alpha = self.alpha;
        let lambda = self.lambda;
        let step = |w: &mut f32, d: &f32| *w -= alpha * (d + lambda * *w);
        if parallelize {
            w.par_iter_mut().zip(dw).for_each(|(w, d)| step(w, d));
        } else {
            for (w, d) in w.iter_mut().zip(dw) {
                step(w, d);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::tests::edge_ids;

    #[test]
    fn steps_against_the_gradient() {
        let ids = edge_ids(1);
        let mut opt = GradientDescent::new(0.1);
        let mut w = vec![1.0, -1.0, 0.0, 2.0];
        opt.update(ids[0], &[1.0, 1.0, -2.0, 0.0], &mut w, false);
        assert_eq!(w, vec![0.9, -1.1, 0.2, 2.0]);
    }

    #[test]
    fn decay_shrinks_weights() {
        let ids = edge_ids(1);
        let mut opt = GradientDescent::with_decay(0.5, 0.1);
        let mut w = vec![2.0, 2.0, 2.0, 2.0];
        opt.update(ids[0], &[0.0; 4], &mut w, false);
        // w -= 0.5 * 0.1 * w
        assert!(w.iter().all(|v| (*v - 1.9).abs() < 1e-6));
    }
}
