//! Chain container: layers in a line, each one's data output wired to the
//! next one's data input. The container performs all wiring; layers never
//! reach for a neighbour themselves.

use crate::error::Error;
use crate::graph::edge::{Edges, LayerId};
use crate::graph::layer::Layer;
use crate::layers::{LayerKernel, LayerKind};
use crate::optimizer::Optimizer;
use crate::tensor::{display_shapes, Label, Tensor, Vector};

#[derive(Debug, Default)]
pub struct Sequential {
    layers: Vec<Layer>,
    edges: Edges,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, index: usize) -> &Layer {
        &self.layers[index]
    }

    pub fn layer_mut(&mut self, index: usize) -> &mut Layer {
        &mut self.layers[index]
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn edges(&self) -> &Edges {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> &mut Edges {
        &mut self.edges
    }

    /// Append a layer kernel and wire it to the current tail.
    pub fn add(&mut self, kernel: impl Into<LayerKind>) -> Result<(), Error> {
        self.add_layer(Layer::new(kernel))
    }

    /// Append a pre-configured layer (custom init schemes, frozen weights).
    pub fn add_layer(&mut self, layer: Layer) -> Result<(), Error> {
        self.layers.push(layer);
        if self.layers.len() > 1 {
            let tail = self.layers.len() - 1;
            self.connect(tail - 1, tail)?;
        }
        self.check_connectivity()
    }

    /// Share the head's data output edge with the tail's data input,
    /// inferring the tail's shape when it has none.
    fn connect(&mut self, head: usize, tail: usize) -> Result<(), Error> {
        let (left, right) = self.layers.split_at_mut(tail);
        let head_layer = &mut left[head];
        let tail_layer = &mut right[0];

        head_layer.setup(LayerId(head), &mut self.edges, false)?;

        let out_shape = head_layer.kernel().out_shapes()[0];
        let mut in_shape = tail_layer.kernel().in_shapes()[0];
        if in_shape.size() == 0 {
            tail_layer.kernel_mut().set_in_shape(out_shape)?;
            in_shape = out_shape;
        }
        if out_shape.size() != in_shape.size() {
            return Err(Error::ConnectionMismatch {
                from_type: head_layer.layer_type(),
                from_shapes: display_shapes(&head_layer.kernel().out_shapes()),
                from_size: head_layer.out_data_size(),
                to_type: tail_layer.layer_type(),
                to_shapes: display_shapes(&tail_layer.kernel().in_shapes()),
                to_size: tail_layer.in_data_size(),
            });
        }

        let edge = match head_layer.out_edge(0) {
            Some(edge) => edge,
            None => return Err(Error::BrokenConnectivity { index: head }),
        };
        tail_layer.set_in_edge(0, edge);
        self.edges.add_consumer(edge, LayerId(tail));
        Ok(())
    }

    /// Adjacent layers must share their data edge.
    pub fn check_connectivity(&self) -> Result<(), Error> {
        for index in 0..self.layers.len().saturating_sub(1) {
            let out = self.layers[index].out_edge(0);
            let next_in = self.layers[index + 1].in_edge(0);
            if out.is_none() || out != next_in {
                return Err(Error::BrokenConnectivity { index });
            }
        }
        Ok(())
    }

    /// Wire every layer and (re-)initialize weights.
    pub fn setup(&mut self, reset_weight: bool) -> Result<(), Error> {
        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer.setup(LayerId(index), &mut self.edges, reset_weight)?;
        }
        Ok(())
    }

    pub fn update_weights<O: Optimizer>(&mut self, optimizer: &mut O) {
        for layer in self.layers.iter_mut() {
            layer.update_weight(&mut self.edges, optimizer);
        }
    }

    pub fn clear_grads(&mut self) {
        for layer in self.layers.iter_mut() {
            layer.clear_grads(&mut self.edges);
        }
    }

    /// Push one batch through the chain; returns one output row per sample.
    pub fn forward(&mut self, first: &[Vector]) -> Result<Tensor, Error> {
        self.setup(false)?;
        if let Some(layer) = self.layers.first_mut() {
            layer.set_in_data(&mut self.edges, first)?;
        }
        for layer in self.layers.iter_mut() {
            layer.forward(&mut self.edges);
        }
        Ok(self
            .layers
            .last()
            .and_then(|layer| layer.output(&self.edges))
            .cloned()
            .unwrap_or_default())
    }

    /// Seed the chain's output gradient and run every layer backwards.
    pub fn backward(&mut self, out_grads: &[Vector]) -> Result<(), Error> {
        if let Some(layer) = self.layers.last_mut() {
            layer.set_out_grads(&mut self.edges, out_grads)?;
        }
        for layer in self.layers.iter_mut().rev() {
            layer.backward(&mut self.edges);
        }
        Ok(())
    }

    pub fn in_data_size(&self) -> usize {
        self.layers.first().map_or(0, Layer::in_data_size)
    }

    pub fn out_data_size(&self) -> usize {
        self.layers.last().map_or(0, Layer::out_data_size)
    }

    /// The value range class targets are drawn from: the last layer's output
    /// range.
    pub fn target_value_range(&self) -> (f32, f32) {
        self.layers
            .last()
            .map_or((0.0, 1.0), Layer::out_value_range)
    }

    /// One-hot encode labels against the last layer's output range.
    pub fn label2vec(&self, labels: &[Label]) -> Tensor {
        let outdim = self.out_data_size();
        let (min, max) = self.target_value_range();
        labels
            .iter()
            .map(|&label| {
                debug_assert!(label < outdim);
                let mut row = vec![min; outdim];
                row[label] = max;
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{FullyConnected, Sigmoid, TanH};
    use crate::tensor::Shape3;

    #[test]
    fn auto_wiring_shares_one_edge() {
        let mut net = Sequential::new();
        net.add(FullyConnected::new(4, 3)).unwrap();
        net.add(TanH::new()).unwrap();
        net.add(FullyConnected::new(3, 2)).unwrap();
        net.check_connectivity().unwrap();

        assert_eq!(net.layer(0).out_edge(0), net.layer(1).in_edge(0));
        assert_eq!(net.in_data_size(), 4);
        assert_eq!(net.out_data_size(), 2);
    }

    #[test]
    fn activation_adopts_upstream_shape() {
        let mut net = Sequential::new();
        net.add(FullyConnected::new(4, 3)).unwrap();
        net.add(Sigmoid::new()).unwrap();
        assert_eq!(
            net.layer(1).kernel().in_shapes()[0],
            Shape3::new(3, 1, 1).unwrap()
        );
    }

    #[test]
    fn size_mismatch_is_rejected_at_add() {
        let mut net = Sequential::new();
        net.add(FullyConnected::new(4, 3)).unwrap();
        let err = net.add(FullyConnected::new(5, 2));
        assert!(matches!(err, Err(Error::ConnectionMismatch { .. })));
    }

    #[test]
    fn forward_propagates_through_the_chain() {
        let mut net = Sequential::new();
        net.add(FullyConnected::new(2, 2)).unwrap();
        net.add(FullyConnected::new(2, 1)).unwrap();
        net.setup(false).unwrap();

        // identity first layer, summing second layer
        let w0 = net.layer(0).in_edge(1).unwrap();
        let b0 = net.layer(0).in_edge(2).unwrap();
        let w1 = net.layer(1).in_edge(1).unwrap();
        let b1 = net.layer(1).in_edge(2).unwrap();
        {
            let edges = &mut net.edges;
            edges.data_mut(w0)[0].copy_from_slice(&[1.0, 0.0, 0.0, 1.0]);
            edges.data_mut(b0)[0].copy_from_slice(&[0.0, 0.0]);
            edges.data_mut(w1)[0].copy_from_slice(&[1.0, 1.0]);
            edges.data_mut(b1)[0].copy_from_slice(&[0.5]);
        }

        let out = net.forward(&vec![vec![2.0, 3.0], vec![-1.0, 1.0]]).unwrap();
        assert_eq!(out, vec![vec![5.5], vec![0.5]]);
    }

    #[test]
    fn label_encoding_uses_last_layer_range() {
        let mut net = Sequential::new();
        net.add(FullyConnected::new(2, 3)).unwrap();
        net.add(TanH::new()).unwrap();
        let vecs = net.label2vec(&[2, 0]);
        assert_eq!(vecs[0], vec![-0.8, -0.8, 0.8]);
        assert_eq!(vecs[1], vec![0.8, -0.8, -0.8]);
    }

    #[test]
    fn backward_with_zero_grads_leaves_zero_weight_grads() {
        let mut net = Sequential::new();
        net.add(FullyConnected::new(3, 2)).unwrap();
        net.setup(false).unwrap();
        net.forward(&vec![vec![1.0, 2.0, 3.0]]).unwrap();
        net.backward(&vec![vec![0.0, 0.0]]).unwrap();

        let w = net.layer(0).in_edge(1).unwrap();
        let grads = net.edges().grad(w);
        assert!(grads.iter().all(|row| row.iter().all(|v| *v == 0.0)));
    }
}
