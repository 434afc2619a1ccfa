//! Weight update rules.
//!
//! Stateful optimizers key their auxiliary buffers by the [`EdgeId`] of the
//! parameter edge they update, so state survives graph moves and two edges
//! with equal contents never alias.

pub use adagrad::Adagrad;
pub mod adagrad;

pub use adam::Adam;
pub mod adam;

pub use gradient_descent::GradientDescent;
pub mod gradient_descent;

use std::collections::HashMap;

use crate::graph::edge::EdgeId;
use crate::tensor::Vector;

pub trait Optimizer {
    /// Apply the averaged batch gradient `dw` to the parameter row `w`.
    fn update(&mut self, key: EdgeId, dw: &[f32], w: &mut [f32], parallelize: bool);

    /// Drop all per-parameter state.
    fn reset(&mut self) {}
}

/// One auxiliary buffer per parameter edge, created lazily and sized to the
/// parameter on first use.
#[derive(Debug, Default)]
pub struct ParamState {
    buffers: HashMap<EdgeId, Vector>,
}

impl ParamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: EdgeId, len: usize) -> &mut Vector {
        let buffer = self.buffers.entry(key).or_insert_with(Vector::new);
        if buffer.len() != len {
            buffer.resize(len, 0.0);
        }
        buffer
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
