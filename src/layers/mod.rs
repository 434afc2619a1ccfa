pub mod activation;
pub mod average_pooling;
pub mod convolutional;
pub mod fully_connected;
pub mod partial_connected;

pub use activation::{Relu, Sigmoid, Softmax, TanH};
pub use average_pooling::AveragePooling;
pub use convolutional::{ConnectionTable, Convolution, Padding};
pub use fully_connected::FullyConnected;
pub use partial_connected::PartialConnected;

use enum_dispatch::enum_dispatch;

use crate::error::Error;
use crate::tensor::{Shape3, Tensor, VectorKind};

/// Compute backend tag carried by every layer. Only the CPU kernels exist;
/// requesting anything else fails at layer construction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Backend {
    Cpu,
    Gpu,
}

/// The compute contract every layer kind fulfills. The graph plumbing in
/// [`crate::graph`] gathers the port buffers and hands them over in declared
/// port order; kernels never touch edges directly.
///
/// Data port rows are indexed `[sample][element]`; weight and bias ports
/// carry a single shared row, except weight gradients which keep one row per
/// sample so backward passes never contend.
#[enum_dispatch]
pub trait LayerKernel {
    fn layer_type(&self) -> &'static str;

    /// Shape of every input port, in declared order.
    fn in_shapes(&self) -> Vec<Shape3>;
    /// Shape of every output port, in declared order.
    fn out_shapes(&self) -> Vec<Shape3>;
    fn in_kinds(&self) -> Vec<VectorKind>;
    fn out_kinds(&self) -> Vec<VectorKind>;

    /// Number of incoming connections feeding one output unit. Drives weight
    /// initialization.
    fn fan_in_size(&self) -> usize;

    /// Number of outgoing connections leaving one input unit.
    fn fan_out_size(&self) -> usize;

    /// Adopt the upstream layer's output shape. Only shape-preserving layers
    /// (activations) support inference; everything else refuses.
    fn set_in_shape(&mut self, _in_shape: Shape3) -> Result<(), Error> {
        Err(Error::ShapeInference {
            layer_type: self.layer_type(),
        })
    }

    /// Batch-size change notification, for kernels holding per-sample
    /// scratch buffers.
    fn set_sample_count(&mut self, _samples: usize) {}

    /// The numeric range this layer's outputs live in; drives the one-hot
    /// encoding of class labels when this is the last layer.
    fn out_value_range(&self) -> (f32, f32) {
        (0.0, 1.0)
    }

    fn forward_propagation(
        &mut self,
        in_data: &[&Tensor],
        out_data: &mut [Tensor],
        parallelize: bool,
    );

    /// Fill `in_grad` from `out_grad`. Gradient ports line up with the data
    /// ports of the same direction, so `in_grad[1]` is the weight gradient
    /// and `in_grad[2]` the bias gradient where those ports exist.
    fn back_propagation(
        &mut self,
        in_data: &[&Tensor],
        out_data: &[&Tensor],
        out_grad: &mut [Tensor],
        in_grad: &mut [Tensor],
        parallelize: bool,
    );

    /// Hook invoked after the optimizer has applied a weight update.
    fn post_update(&mut self) {}
}

/// The closed set of layer kinds. Dispatch goes through this enum instead of
/// trait objects so the graph can own layers by value and match on kind.
#[enum_dispatch(LayerKernel)]
#[derive(Debug)]
pub enum LayerKind {
    FullyConnected,
    Convolution,
    AveragePooling,
    Relu,
    Sigmoid,
    TanH,
    Softmax,
}
