//! Average subsampling over non-overlapping (or strided) windows, with one
//! trainable gain and bias per channel.

use crate::error::Error;
use crate::layers::partial_connected::PartialConnected;
use crate::layers::LayerKernel;
use crate::tensor::{std_input_order, Shape3, Tensor, VectorKind};

#[derive(Debug)]
pub struct AveragePooling {
    base: PartialConnected,
    stride_x: usize,
    stride_y: usize,
    pool_size_x: usize,
    pool_size_y: usize,
}

impl AveragePooling {
    /// Square pooling with stride equal to the window, the common case.
    /// The window must tile the input exactly.
    pub fn new(
        in_width: usize,
        in_height: usize,
        in_depth: usize,
        pool_size: usize,
    ) -> Result<Self, Error> {
        Self::with_stride(in_width, in_height, in_depth, pool_size, pool_size, pool_size, pool_size)
    }

    pub fn with_stride(
        in_width: usize,
        in_height: usize,
        in_depth: usize,
        pool_size_x: usize,
        pool_size_y: usize,
        stride_x: usize,
        stride_y: usize,
    ) -> Result<Self, Error> {
        if pool_size_x == 0
            || pool_size_y == 0
            || stride_x == 0
            || stride_y == 0
            || in_width < pool_size_x
            || in_height < pool_size_y
            || (in_width - pool_size_x) % stride_x != 0
            || (in_height - pool_size_y) % stride_y != 0
        {
            return Err(Error::PoolingSizeMismatch {
                in_width,
                in_height,
                pool_size_x,
                pool_size_y,
            });
        }
        let out_width = (in_width - pool_size_x) / stride_x + 1;
        let out_height = (in_height - pool_size_y) / stride_y + 1;

        let in_shape = Shape3::new(in_width, in_height, in_depth)?;
        let out_shape = Shape3::new(out_width, out_height, in_depth)?;
        let scale = 1.0 / (pool_size_x * pool_size_y) as f32;
        let mut pool = Self {
            base: PartialConnected::new(in_shape, out_shape, in_depth, in_depth, scale),
            stride_x,
            stride_y,
            pool_size_x,
            pool_size_y,
        };
        pool.init_connection();
        Ok(pool)
    }

    fn init_connection(&mut self) {
        let in_shape = self.base.in_shape();
        let out_shape = self.base.out_shape();
        for c in 0..in_shape.depth {
            for oy in 0..out_shape.height {
                for ox in 0..out_shape.width {
                    self.connect_kernel(ox, oy, c);
                }
            }
            for oy in 0..out_shape.height {
                for ox in 0..out_shape.width {
                    self.base.connect_bias(c, out_shape.get_index(ox, oy, c));
                }
            }
        }
    }

    /// Wire every input pixel of one window to its output pixel, all through
    /// the channel's single shared weight.
    fn connect_kernel(&mut self, ox: usize, oy: usize, channel: usize) {
        let in_shape = self.base.in_shape();
        let out_shape = self.base.out_shape();
        let x0 = ox * self.stride_x;
        let y0 = oy * self.stride_y;
        let out_index = out_shape.get_index(ox, oy, channel);
        for dy in 0..self.pool_size_y {
            for dx in 0..self.pool_size_x {
                let in_index = in_shape.get_index(x0 + dx, y0 + dy, channel);
                self.base.connect_weight(in_index, out_index, channel);
            }
        }
    }
}

impl LayerKernel for AveragePooling {
    fn layer_type(&self) -> &'static str {
        "ave-pool"
    }

    fn in_shapes(&self) -> Vec<Shape3> {
        vec![
            self.base.in_shape(),
            Shape3 {
                width: self.base.weight_dim(),
                height: 1,
                depth: 1,
            },
            Shape3 {
                width: self.base.bias_dim(),
                height: 1,
                depth: 1,
            },
        ]
    }

    fn out_shapes(&self) -> Vec<Shape3> {
        vec![self.base.out_shape()]
    }

    fn in_kinds(&self) -> Vec<VectorKind> {
        std_input_order(true)
    }

    fn out_kinds(&self) -> Vec<VectorKind> {
        vec![VectorKind::Data]
    }

    fn fan_in_size(&self) -> usize {
        self.base.fan_in_size()
    }

    fn fan_out_size(&self) -> usize {
        self.base.fan_out_size()
    }

    fn forward_propagation(
        &mut self,
        in_data: &[&Tensor],
        out_data: &mut [Tensor],
        parallelize: bool,
    ) {
        self.base.forward(
            in_data[0],
            &in_data[1][0],
            &in_data[2][0],
            &mut out_data[0],
            parallelize,
        );
    }

    fn back_propagation(
        &mut self,
        in_data: &[&Tensor],
        _out_data: &[&Tensor],
        out_grad: &mut [Tensor],
        in_grad: &mut [Tensor],
        parallelize: bool,
    ) {
        let (prev_delta, dw, db) = match in_grad {
            [prev_delta, dw, db] => (prev_delta, dw, db),
            _ => return,
        };
        self.base.backward(
            in_data[0],
            &in_data[1][0],
            &out_grad[0],
            prev_delta,
            dw,
            db,
            parallelize,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::tests::check;

    #[test]
    fn rejects_windows_that_do_not_tile() {
        let err = AveragePooling::new(5, 4, 1, 2);
        assert!(matches!(err, Err(Error::PoolingSizeMismatch { .. })));
    }

    #[test]
    fn forward_averages_each_window() {
        let mut pool = AveragePooling::new(4, 4, 1, 2).unwrap();
        assert_eq!(pool.out_shapes()[0], Shape3::new(2, 2, 1).unwrap());

        #[rustfmt::skip]
        let image = vec![
            0.0, 1.0, 2.0, 3.0,
            4.0, 5.0, 6.0, 7.0,
            0.0, 0.0, 4.0, 4.0,
            0.0, 0.0, 4.0, 4.0,
        ];
        let in_data = vec![image];
        let weight = vec![vec![1.0]];
        let bias = vec![vec![0.0]];
        let inputs = [&in_data, &weight, &bias];
        let mut out = vec![vec![vec![0.0; 4]]];
        pool.forward_propagation(&inputs, &mut out, false);
        check(&[2.5, 4.5, 0.0, 4.0], &out[0][0], 1e-6, "pooled output");
    }

    #[test]
    fn backward_spreads_delta_evenly() {
        let mut pool = AveragePooling::new(2, 2, 1, 2).unwrap();
        let in_data_t = vec![vec![1.0, 2.0, 3.0, 4.0]];
        let weight = vec![vec![2.0]];
        let bias = vec![vec![0.0]];
        let inputs = [&in_data_t, &weight, &bias];
        let out_data_t = vec![vec![5.0]];
        let outputs = [&out_data_t];
        let mut out_grad = vec![vec![vec![1.0]]];
        let mut in_grad = vec![
            vec![vec![0.0; 4]],
            vec![vec![0.0]],
            vec![vec![0.0]],
        ];
        pool.back_propagation(&inputs, &outputs, &mut out_grad, &mut in_grad, false);
        // each input saw weight * delta / 4
        check(&[0.5, 0.5, 0.5, 0.5], &in_grad[0][0], 1e-6, "input delta");
        // dw = sum(input) * delta / 4
        check(&[2.5], &in_grad[1][0], 1e-6, "weight gradient");
        check(&[1.0], &in_grad[2][0], 1e-6, "bias gradient");
    }

    #[test]
    fn fan_sizes_match_window() {
        let pool = AveragePooling::new(4, 4, 2, 2).unwrap();
        assert_eq!(pool.fan_in_size(), 4);
        assert_eq!(pool.fan_out_size(), 1);
    }
}
