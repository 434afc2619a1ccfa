//! Loss functions driving the backward pass.

use crate::tensor::{Tensor, Vector};

pub trait Loss {
    /// Scalar loss of one sample.
    fn f(&self, y: &[f32], t: &[f32]) -> f32;

    /// Gradient of the loss with respect to `y`.
    fn df(&self, y: &[f32], t: &[f32]) -> Vector;
}

/// Mean squared error, averaged over the output dimension.
#[derive(Clone, Debug, Default)]
pub struct Mse;

impl Loss for Mse {
    fn f(&self, y: &[f32], t: &[f32]) -> f32 {
        debug_assert_eq!(y.len(), t.len());
        let sum: f32 = y.iter().zip(t).map(|(y, t)| (y - t) * (y - t)).sum();
        sum / y.len() as f32
    }

    fn df(&self, y: &[f32], t: &[f32]) -> Vector {
        debug_assert_eq!(y.len(), t.len());
        let factor = 2.0 / t.len() as f32;
        y.iter().zip(t).map(|(y, t)| factor * (y - t)).collect()
    }
}

/// Binary cross entropy over independent output units. Outputs must lie
/// strictly inside (0, 1).
#[derive(Clone, Debug, Default)]
pub struct CrossEntropy;

impl Loss for CrossEntropy {
    fn f(&self, y: &[f32], t: &[f32]) -> f32 {
        debug_assert_eq!(y.len(), t.len());
        y.iter()
            .zip(t)
            .map(|(y, t)| -t * y.ln() - (1.0 - t) * (1.0 - y).ln())
            .sum()
    }

    fn df(&self, y: &[f32], t: &[f32]) -> Vector {
        debug_assert_eq!(y.len(), t.len());
        y.iter()
            .zip(t)
            .map(|(y, t)| (y - t) / (y * (1.0 - y)))
            .collect()
    }
}

/// Per-sample loss gradients of a whole batch.
pub fn gradient<L: Loss>(loss: &L, y: &[Vector], t: &[Vector]) -> Tensor {
    debug_assert_eq!(y.len(), t.len());
    y.iter().zip(t).map(|(y, t)| loss.df(y, t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::tests::check;

    #[test]
    fn mse_matches_hand_computation() {
        let y = [1.0, 0.0];
        let t = [0.0, 0.0];
        assert!((Mse.f(&y, &t) - 0.5).abs() < 1e-6);
        check(&[1.0, 0.0], &Mse.df(&y, &t), 1e-6, "gradient");
    }

    #[test]
    fn cross_entropy_is_zero_at_the_target() {
        let y = [0.999999, 0.000001];
        let t = [1.0, 0.0];
        assert!(CrossEntropy.f(&y, &t).abs() < 1e-4);
        // gradient points toward the target
        let g = CrossEntropy.df(&[0.3, 0.7], &[1.0, 0.0]);
        assert!(g[0] < 0.0 && g[1] > 0.0);
    }
}
