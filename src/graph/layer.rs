//! Graph node wrapper around a layer kernel.
//!
//! A `Layer` starts in the declared state: it knows its port shapes but owns
//! no buffers. Wiring (`setup`, plus the container's connect step) attaches
//! [`EdgeId`]s to every port; only a wired layer can run a pass. Buffers are
//! moved out of the arena for the duration of one kernel call and moved back
//! right after, so kernels see plain tensors.

use crate::error::Error;
use crate::graph::edge::{EdgeId, Edges, LayerId};
use crate::init::InitScheme;
use crate::layers::{Backend, LayerKernel, LayerKind};
use crate::optimizer::Optimizer;
use crate::tensor::{display_shapes, Tensor, Vector, VectorKind};

/// Parameter buffers at or above this length are updated in parallel.
const PARALLELIZE_THRESHOLD: usize = 512;

#[derive(Debug)]
pub struct Layer {
    kernel: LayerKind,
    prev: Vec<Option<EdgeId>>,
    next: Vec<Option<EdgeId>>,
    initialized: bool,
    trainable: bool,
    parallelize: bool,
    backend: Backend,
    weight_init: InitScheme,
    bias_init: InitScheme,
    weights_diff: Vector,
}

impl Layer {
    pub fn new(kernel: impl Into<LayerKind>) -> Self {
        let kernel = kernel.into();
        let in_channels = kernel.in_kinds().len();
        let out_channels = kernel.out_kinds().len();
        Self {
            kernel,
            prev: vec![None; in_channels],
            next: vec![None; out_channels],
            initialized: false,
            trainable: true,
            parallelize: true,
            backend: Backend::Cpu,
            weight_init: InitScheme::xavier(),
            bias_init: InitScheme::Constant(0.0),
            weights_diff: Vector::new(),
        }
    }

    pub fn kernel(&self) -> &LayerKind {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut LayerKind {
        &mut self.kernel
    }

    pub fn layer_type(&self) -> &'static str {
        self.kernel.layer_type()
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    pub fn set_parallelize(&mut self, parallelize: bool) {
        self.parallelize = parallelize;
    }

    pub fn set_backend(&mut self, backend: Backend) -> Result<(), Error> {
        if backend != Backend::Cpu {
            return Err(Error::UnsupportedBackend(backend));
        }
        self.backend = backend;
        Ok(())
    }

    pub fn engine(&self) -> Backend {
        self.backend
    }

    pub fn set_weight_init(&mut self, scheme: InitScheme) {
        self.weight_init = scheme;
    }

    pub fn set_bias_init(&mut self, scheme: InitScheme) {
        self.bias_init = scheme;
    }

    pub fn in_channels(&self) -> usize {
        self.prev.len()
    }

    pub fn out_channels(&self) -> usize {
        self.next.len()
    }

    /// Total element count of the data input ports.
    pub fn in_data_size(&self) -> usize {
        self.kernel
            .in_shapes()
            .iter()
            .zip(self.kernel.in_kinds())
            .filter(|(_, kind)| *kind == VectorKind::Data)
            .map(|(shape, _)| shape.size())
            .sum()
    }

    pub fn out_data_size(&self) -> usize {
        self.kernel
            .out_shapes()
            .iter()
            .zip(self.kernel.out_kinds())
            .filter(|(_, kind)| *kind == VectorKind::Data)
            .map(|(shape, _)| shape.size())
            .sum()
    }

    pub fn out_value_range(&self) -> (f32, f32) {
        self.kernel.out_value_range()
    }

    pub fn in_edge(&self, port: usize) -> Option<EdgeId> {
        self.prev.get(port).copied().flatten()
    }

    pub fn out_edge(&self, port: usize) -> Option<EdgeId> {
        self.next.get(port).copied().flatten()
    }

    /// Trainable parameter rows, in port order.
    pub fn weights<'a>(&self, edges: &'a Edges) -> Vec<&'a Vector> {
        self.kernel
            .in_kinds()
            .iter()
            .enumerate()
            .filter(|(_, kind)| kind.is_trainable_weight())
            .filter_map(|(port, _)| self.prev[port])
            .map(|id| &edges.data(id)[0])
            .collect()
    }

    pub(crate) fn set_in_edge(&mut self, port: usize, id: EdgeId) {
        self.prev[port] = Some(id);
    }

    fn prev_ids(&self) -> Vec<EdgeId> {
        self.prev.iter().flatten().copied().collect()
    }

    fn next_ids(&self) -> Vec<EdgeId> {
        self.next.iter().flatten().copied().collect()
    }

    fn connection_mismatch(&self) -> Error {
        Error::ConnectionMismatch {
            from_type: self.layer_type(),
            from_shapes: display_shapes(&self.kernel.in_shapes()),
            from_size: self.in_data_size(),
            to_type: self.layer_type(),
            to_shapes: display_shapes(&self.kernel.out_shapes()),
            to_size: self.out_data_size(),
        }
    }

    /// Move to the wired state: verify the port declaration, allocate every
    /// edge not already shared with a neighbour and initialize weights.
    pub fn setup(&mut self, id: LayerId, edges: &mut Edges, reset_weight: bool) -> Result<(), Error> {
        let in_shapes = self.kernel.in_shapes();
        let out_shapes = self.kernel.out_shapes();
        if in_shapes.len() != self.prev.len() || out_shapes.len() != self.next.len() {
            return Err(self.connection_mismatch());
        }

        let out_kinds = self.kernel.out_kinds();
        for (port, slot) in self.next.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(edges.alloc(out_shapes[port], out_kinds[port], Some(id)));
            }
        }
        let in_kinds = self.kernel.in_kinds();
        for (port, slot) in self.prev.iter_mut().enumerate() {
            if slot.is_none() {
                let edge = edges.alloc(in_shapes[port], in_kinds[port], None);
                edges.add_consumer(edge, id);
                *slot = Some(edge);
            }
        }

        if reset_weight || !self.initialized {
            self.init_weight(edges);
        }
        Ok(())
    }

    pub fn init_weight(&mut self, edges: &mut Edges) {
        if !self.trainable {
            self.initialized = true;
            return;
        }
        let fan_in = self.kernel.fan_in_size();
        let fan_out = self.kernel.fan_out_size();
        for (port, kind) in self.kernel.in_kinds().iter().enumerate() {
            let id = match self.prev[port] {
                Some(id) => id,
                None => continue,
            };
            match kind {
                VectorKind::Weight => {
                    self.weight_init.fill(&mut edges.data_mut(id)[0], fan_in, fan_out)
                }
                VectorKind::Bias => {
                    self.bias_init.fill(&mut edges.data_mut(id)[0], fan_in, fan_out)
                }
                _ => {}
            }
        }
        self.initialized = true;
    }

    /// Resize every attached non-weight buffer to the batch size.
    pub fn set_sample_count(&mut self, edges: &mut Edges, samples: usize) {
        for id in self.prev_ids().into_iter().chain(self.next_ids()) {
            edges.set_sample_count(id, samples);
        }
        self.kernel.set_sample_count(samples);
    }

    /// Copy a batch into the first data input port.
    pub fn set_in_data(&mut self, edges: &mut Edges, batch: &[Vector]) -> Result<(), Error> {
        let kinds = self.kernel.in_kinds();
        let shapes = self.kernel.in_shapes();
        for (port, kind) in kinds.iter().enumerate() {
            if *kind != VectorKind::Data {
                continue;
            }
            let id = match self.prev[port] {
                Some(id) => id,
                None => continue,
            };
            let expected = shapes[port].size();
            for row in batch {
                if row.len() != expected {
                    return Err(Error::DataMismatch {
                        layer_type: self.layer_type(),
                        expected,
                        received: row.len(),
                    });
                }
            }
            let data = edges.data_mut(id);
            data.clear();
            data.extend(batch.iter().cloned());
        }
        Ok(())
    }

    /// Seed the output gradient of the data output port, row per sample.
    pub fn set_out_grads(&mut self, edges: &mut Edges, grads: &[Vector]) -> Result<(), Error> {
        let kinds = self.kernel.out_kinds();
        let shapes = self.kernel.out_shapes();
        for (port, kind) in kinds.iter().enumerate() {
            if *kind != VectorKind::Data {
                continue;
            }
            let id = match self.next[port] {
                Some(id) => id,
                None => continue,
            };
            let expected = shapes[port].size();
            for row in grads {
                if row.len() != expected {
                    return Err(Error::DataMismatch {
                        layer_type: self.layer_type(),
                        expected,
                        received: row.len(),
                    });
                }
            }
            let grad = edges.grad_mut(id);
            grad.clear();
            grad.extend(grads.iter().cloned());
        }
        Ok(())
    }

    /// The data output of the last forward pass.
    pub fn output<'a>(&self, edges: &'a Edges) -> Option<&'a Tensor> {
        self.kernel
            .out_kinds()
            .iter()
            .position(|kind| *kind == VectorKind::Data)
            .and_then(|port| self.next[port])
            .map(|id| edges.data(id))
    }

    pub fn forward(&mut self, edges: &mut Edges) {
        let prev = self.prev_ids();
        let next = self.next_ids();

        if let Some(&first) = prev.first() {
            let samples = edges.data(first).len();
            self.set_sample_count(edges, samples);
        }
        for &id in &next {
            edges.clear_grads(id);
        }

        let in_data: Vec<Tensor> = prev.iter().map(|&id| edges.take_data(id)).collect();
        let mut out_data: Vec<Tensor> = next.iter().map(|&id| edges.take_data(id)).collect();
        {
            let in_refs: Vec<&Tensor> = in_data.iter().collect();
            self.kernel
                .forward_propagation(&in_refs, &mut out_data, self.parallelize);
        }
        for (&id, tensor) in prev.iter().zip(in_data) {
            edges.put_data(id, tensor);
        }
        for (&id, tensor) in next.iter().zip(out_data) {
            edges.put_data(id, tensor);
        }
    }

    pub fn backward(&mut self, edges: &mut Edges) {
        let prev = self.prev_ids();
        let next = self.next_ids();

        let in_data: Vec<Tensor> = prev.iter().map(|&id| edges.take_data(id)).collect();
        let out_data: Vec<Tensor> = next.iter().map(|&id| edges.take_data(id)).collect();
        let mut out_grad: Vec<Tensor> = next.iter().map(|&id| edges.take_grad(id)).collect();
        let mut in_grad: Vec<Tensor> = prev.iter().map(|&id| edges.take_grad(id)).collect();
        {
            let in_refs: Vec<&Tensor> = in_data.iter().collect();
            let out_refs: Vec<&Tensor> = out_data.iter().collect();
            self.kernel.back_propagation(
                &in_refs,
                &out_refs,
                &mut out_grad,
                &mut in_grad,
                self.parallelize,
            );
        }
        for (&id, tensor) in prev.iter().zip(in_data) {
            edges.put_data(id, tensor);
        }
        for (&id, tensor) in next.iter().zip(out_data) {
            edges.put_data(id, tensor);
        }
        for (&id, tensor) in next.iter().zip(out_grad) {
            edges.put_grad(id, tensor);
        }
        for (&id, tensor) in prev.iter().zip(in_grad) {
            edges.put_grad(id, tensor);
        }
    }

    /// Merge per-sample gradients, average over the batch, hand the result to
    /// the optimizer, then clear gradients for the next batch.
    pub fn update_weight<O: Optimizer>(&mut self, edges: &mut Edges, optimizer: &mut O) {
        for (port, kind) in self.kernel.in_kinds().iter().enumerate() {
            if !(self.trainable && kind.is_trainable_weight()) {
                continue;
            }
            let id = match self.prev[port] {
                Some(id) => id,
                None => continue,
            };
            edges.merge_grads(id, &mut self.weights_diff);
            let batch = edges.grad(id).len().max(1);
            let rcp_batch_size = 1.0 / batch as f32;
            for d in self.weights_diff.iter_mut() {
                *d *= rcp_batch_size;
            }
            let mut target = edges.take_data(id);
            let parallelize = target[0].len() >= PARALLELIZE_THRESHOLD;
            optimizer.update(id, &self.weights_diff, &mut target[0], parallelize);
            edges.put_data(id, target);
        }
        self.clear_grads(edges);
        self.kernel.post_update();
    }

    pub fn clear_grads(&mut self, edges: &mut Edges) {
        for id in self.prev_ids() {
            edges.clear_grads(id);
        }
    }

    /// Element-wise weight comparison, used to confirm that training moved
    /// (or froze) the parameters.
    pub fn has_same_weights(&self, edges: &Edges, rhs: &Layer, rhs_edges: &Edges, eps: f32) -> bool {
        let mine = self.weights(edges);
        let theirs = rhs.weights(rhs_edges);
        mine.len() == theirs.len()
            && mine.iter().zip(&theirs).all(|(a, b)| {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= eps)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::FullyConnected;
    use crate::tensor::Shape3;

    fn wired_fc() -> (Layer, Edges) {
        let mut layer = Layer::new(FullyConnected::new(2, 2));
        let mut edges = Edges::new();
        layer.setup(LayerId(0), &mut edges, false).unwrap();
        (layer, edges)
    }

    #[test]
    fn setup_allocates_every_port() {
        let (layer, edges) = wired_fc();
        for port in 0..3 {
            let id = layer.in_edge(port).unwrap();
            assert!(!edges.data(id)[0].is_empty() || edges.get(id).shape().size() == 0);
        }
        let out = layer.out_edge(0).unwrap();
        assert_eq!(edges.get(out).shape(), Shape3::new(2, 1, 1).unwrap());
        assert_eq!(edges.get(out).producer(), Some(LayerId(0)));
    }

    #[test]
    fn forward_runs_with_known_weights() {
        let (mut layer, mut edges) = wired_fc();
        let weight_edge = layer.in_edge(1).unwrap();
        edges.data_mut(weight_edge)[0].copy_from_slice(&[1.0, 0.0, 0.0, 1.0]);
        let bias_edge = layer.in_edge(2).unwrap();
        edges.data_mut(bias_edge)[0].copy_from_slice(&[0.0, 0.0]);

        layer
            .set_in_data(&mut edges, &vec![vec![3.0, 4.0]])
            .unwrap();
        layer.forward(&mut edges);
        // identity weights pass the input through
        assert_eq!(layer.output(&edges).unwrap()[0], vec![3.0, 4.0]);
    }

    #[test]
    fn data_length_is_checked() {
        let (mut layer, mut edges) = wired_fc();
        let err = layer.set_in_data(&mut edges, &vec![vec![1.0, 2.0, 3.0]]);
        assert!(matches!(err, Err(Error::DataMismatch { expected: 2, received: 3, .. })));
    }

    #[test]
    fn weight_comparison_tracks_updates() {
        let (mut a, mut ea) = wired_fc();
        let (b, mut eb) = wired_fc();
        for (layer, edges) in [(&a, &mut ea), (&b, &mut eb)] {
            edges.data_mut(layer.in_edge(1).unwrap())[0]
                .copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
            edges.data_mut(layer.in_edge(2).unwrap())[0].copy_from_slice(&[0.5, -0.5]);
        }
        assert!(a.has_same_weights(&ea, &b, &eb, 1e-9));

        ea.grad_mut(a.in_edge(1).unwrap())[0].copy_from_slice(&[1.0; 4]);
        let mut opt = crate::optimizer::GradientDescent::new(0.1);
        a.update_weight(&mut ea, &mut opt);
        assert!(!a.has_same_weights(&ea, &b, &eb, 1e-9));
    }

    #[test]
    fn frozen_layers_keep_their_weights() {
        let (mut layer, mut edges) = wired_fc();
        let weight_edge = layer.in_edge(1).unwrap();
        edges.data_mut(weight_edge)[0].copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        layer.set_trainable(false);

        edges.grad_mut(weight_edge)[0].copy_from_slice(&[5.0, 5.0, 5.0, 5.0]);
        let mut opt = crate::optimizer::GradientDescent::new(0.5);
        layer.update_weight(&mut edges, &mut opt);
        assert_eq!(edges.data(weight_edge)[0], vec![1.0, 2.0, 3.0, 4.0]);
    }
}
