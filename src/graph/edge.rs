//! Edge buffers and the arena that owns them.
//!
//! Every buffer flowing between layers lives in one [`Edges`] arena and is
//! addressed by a stable [`EdgeId`]. Layers hold ids, never references, so
//! the whole graph moves freely and kernels borrow buffers only for the
//! duration of one pass.

use crate::math;
use crate::tensor::{resize_rows, Shape3, Tensor, Vector, VectorKind};

/// Stable handle of one edge in the arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EdgeId(usize);

/// Index of a layer inside its container.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LayerId(pub usize);

/// A tensor buffer situated between two layers: the producer's output data
/// plus the gradient flowing back through it.
#[derive(Debug)]
pub struct Edge {
    shape: Shape3,
    kind: VectorKind,
    data: Tensor,
    grad: Tensor,
    producer: Option<LayerId>,
    consumers: Vec<LayerId>,
}

impl Edge {
    fn new(shape: Shape3, kind: VectorKind, producer: Option<LayerId>) -> Self {
        Self {
            shape,
            kind,
            data: vec![vec![0.0; shape.size()]],
            grad: vec![vec![0.0; shape.size()]],
            producer,
            consumers: Vec::new(),
        }
    }

    pub fn shape(&self) -> Shape3 {
        self.shape
    }

    pub fn kind(&self) -> VectorKind {
        self.kind
    }

    pub fn producer(&self) -> Option<LayerId> {
        self.producer
    }

    pub fn consumers(&self) -> &[LayerId] {
        &self.consumers
    }
}

/// Arena of all edges of one graph.
#[derive(Debug, Default)]
pub struct Edges {
    edges: Vec<Edge>,
}

impl Edges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, shape: Shape3, kind: VectorKind, producer: Option<LayerId>) -> EdgeId {
        self.edges.push(Edge::new(shape, kind, producer));
        EdgeId(self.edges.len() - 1)
    }

    pub fn get(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub fn add_consumer(&mut self, id: EdgeId, consumer: LayerId) {
        self.edges[id.0].consumers.push(consumer);
    }

    pub fn data(&self, id: EdgeId) -> &Tensor {
        &self.edges[id.0].data
    }

    pub fn data_mut(&mut self, id: EdgeId) -> &mut Tensor {
        &mut self.edges[id.0].data
    }

    pub fn grad(&self, id: EdgeId) -> &Tensor {
        &self.edges[id.0].grad
    }

    pub fn grad_mut(&mut self, id: EdgeId) -> &mut Tensor {
        &mut self.edges[id.0].grad
    }

    /// Move the data tensor out of the arena so a kernel can borrow several
    /// buffers at once. Must be paired with [`Edges::put_data`].
    pub fn take_data(&mut self, id: EdgeId) -> Tensor {
        std::mem::take(&mut self.edges[id.0].data)
    }

    pub fn put_data(&mut self, id: EdgeId, data: Tensor) {
        self.edges[id.0].data = data;
    }

    pub fn take_grad(&mut self, id: EdgeId) -> Tensor {
        std::mem::take(&mut self.edges[id.0].grad)
    }

    pub fn put_grad(&mut self, id: EdgeId, grad: Tensor) {
        self.edges[id.0].grad = grad;
    }

    /// Collapse the per-sample gradient rows into `dst`: row 0 copied, the
    /// rest accumulated.
    pub fn merge_grads(&self, id: EdgeId, dst: &mut Vector) {
        let grad = &self.edges[id.0].grad;
        let head = &grad[0];
        dst.resize(head.len(), 0.0);
        dst.copy_from_slice(head);
        for row in &grad[1..] {
            math::accumulate(row, dst);
        }
    }

    pub fn clear_grads(&mut self, id: EdgeId) {
        for row in self.edges[id.0].grad.iter_mut() {
            math::fill(row, 0.0);
        }
    }

    /// Grow or shrink the batch dimension. Weight data keeps its single
    /// shared row; gradients always get one row per sample.
    pub fn set_sample_count(&mut self, id: EdgeId, samples: usize) {
        let edge = &mut self.edges[id.0];
        if !edge.kind.is_trainable_weight() {
            resize_rows(&mut edge.data, samples);
        }
        resize_rows(&mut edge.grad, samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with_edge() -> (Edges, EdgeId) {
        let mut edges = Edges::new();
        let id = edges.alloc(
            Shape3::new(3, 1, 1).unwrap(),
            VectorKind::Weight,
            Some(LayerId(0)),
        );
        (edges, id)
    }

    #[test]
    fn merge_copies_head_then_accumulates() {
        let (mut edges, id) = arena_with_edge();
        edges.set_sample_count(id, 3);
        *edges.grad_mut(id) = vec![
            vec![1.0, 2.0, 3.0],
            vec![10.0, 20.0, 30.0],
            vec![100.0, 200.0, 300.0],
        ];
        let mut dst = vec![-1.0; 3];
        edges.merge_grads(id, &mut dst);
        assert_eq!(dst, vec![111.0, 222.0, 333.0]);
    }

    #[test]
    fn sample_count_spares_weight_data() {
        let (mut edges, id) = arena_with_edge();
        edges.set_sample_count(id, 4);
        assert_eq!(edges.data(id).len(), 1);
        assert_eq!(edges.grad(id).len(), 4);
    }

    #[test]
    fn clear_zeroes_every_row() {
        let (mut edges, id) = arena_with_edge();
        edges.set_sample_count(id, 2);
        edges.grad_mut(id)[1][2] = 7.0;
        edges.clear_grads(id);
        assert!(edges.grad(id).iter().all(|r| r.iter().all(|v| *v == 0.0)));
    }
}
