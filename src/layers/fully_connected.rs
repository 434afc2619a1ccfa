//! Dense layer: every input unit feeds every output unit.
//!
//! The weight row is laid out input-major, `W[c * out_size + i]`, so the
//! backward pass reads one contiguous slice per input unit.

use crate::math;
use crate::parallel;
use crate::tensor::{std_input_order, Shape3, Tensor, VectorKind};

use super::LayerKernel;

#[derive(Debug)]
pub struct FullyConnected {
    in_size: usize,
    out_size: usize,
    has_bias: bool,
}

impl FullyConnected {
    pub fn new(in_size: usize, out_size: usize) -> Self {
        Self {
            in_size,
            out_size,
            has_bias: true,
        }
    }

    pub fn without_bias(in_size: usize, out_size: usize) -> Self {
        Self {
            in_size,
            out_size,
            has_bias: false,
        }
    }
}

impl LayerKernel for FullyConnected {
    fn layer_type(&self) -> &'static str {
        "fully-connected"
    }

    fn in_shapes(&self) -> Vec<Shape3> {
        let mut shapes = vec![
            Shape3 {
                width: self.in_size,
                height: 1,
                depth: 1,
            },
            Shape3 {
                width: self.in_size * self.out_size,
                height: 1,
                depth: 1,
            },
        ];
        if self.has_bias {
            shapes.push(Shape3 {
                width: self.out_size,
                height: 1,
                depth: 1,
            });
        }
        shapes
    }

    fn out_shapes(&self) -> Vec<Shape3> {
        vec![Shape3 {
            width: self.out_size,
            height: 1,
            depth: 1,
        }]
    }

    fn in_kinds(&self) -> Vec<VectorKind> {
        std_input_order(self.has_bias)
    }

    fn out_kinds(&self) -> Vec<VectorKind> {
        vec![VectorKind::Data]
    }

    fn fan_in_size(&self) -> usize {
        self.in_size
    }

    fn fan_out_size(&self) -> usize {
        self.out_size
    }

    fn forward_propagation(
        &mut self,
        in_data: &[&Tensor],
        out_data: &mut [Tensor],
        parallelize: bool,
    ) {
        let weight = &in_data[1][0];
        let bias = if self.has_bias {
            Some(&in_data[2][0])
        } else {
            None
        };
        let prev_out = in_data[0];
        let out_size = self.out_size;
        parallel::for_each_row(parallelize, &mut out_data[0], |sample, row| {
            let input = &prev_out[sample];
            for i in 0..out_size {
                let mut sum = 0.0;
                for (c, in_value) in input.iter().enumerate() {
                    sum += weight[c * out_size + i] * in_value;
                }
                row[i] = sum;
            }
            if let Some(bias) = bias {
                math::accumulate(bias, row);
            }
        });
    }

    fn back_propagation(
        &mut self,
        in_data: &[&Tensor],
        _out_data: &[&Tensor],
        out_grad: &mut [Tensor],
        in_grad: &mut [Tensor],
        parallelize: bool,
    ) {
        let prev_out = in_data[0];
        let weight = &in_data[1][0];
        let curr_delta = &out_grad[0];
        let out_size = self.out_size;

        // bias port may be absent; give the row loop an aligned dummy then
        let mut dummy: Tensor;
        let (prev_delta, dw, db) = match in_grad {
            [prev_delta, dw, db] => (prev_delta, dw, Some(db)),
            [prev_delta, dw] => (prev_delta, dw, None),
            _ => return,
        };
        let db = match db {
            Some(db) => db,
            None => {
                dummy = vec![Vec::new(); prev_delta.len()];
                &mut dummy
            }
        };

        parallel::for_each_row3(
            parallelize,
            prev_delta,
            dw,
            db,
            |sample, prev_delta_row, dw_row, db_row| {
                let delta = &curr_delta[sample];
                let input = &prev_out[sample];
                for (c, pd) in prev_delta_row.iter_mut().enumerate() {
                    *pd = math::dot(delta, &weight[c * out_size..(c + 1) * out_size]);
                }
                for (c, in_value) in input.iter().enumerate() {
                    math::muladd(delta, *in_value, &mut dw_row[c * out_size..(c + 1) * out_size]);
                }
                if !db_row.is_empty() {
                    math::accumulate(delta, db_row);
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::tests::check;

    #[test]
    fn forward_matches_hand_computation() {
        let mut fc = FullyConnected::new(3, 2);
        let in_data_t = vec![vec![1.0, 2.0, 3.0]];
        // W[c*2 + i]: unit 0 sees (0.5, 1.0, -1.0), unit 1 sees (0.0, 2.0, 1.0)
        let weight = vec![vec![0.5, 0.0, 1.0, 2.0, -1.0, 1.0]];
        let bias = vec![vec![0.25, -0.25]];
        let inputs = [&in_data_t, &weight, &bias];
        let mut out = vec![vec![vec![0.0; 2]]];
        fc.forward_propagation(&inputs, &mut out, false);
        check(&[-0.25, 6.75], &out[0][0], 1e-6, "output");
    }

    #[test]
    fn backward_matches_hand_computation() {
        let mut fc = FullyConnected::new(2, 2);
        let in_data_t = vec![vec![3.0, -1.0]];
        let weight = vec![vec![1.0, 2.0, 3.0, 4.0]];
        let bias = vec![vec![0.0, 0.0]];
        let inputs = [&in_data_t, &weight, &bias];
        let out_data_t = vec![vec![0.0, 0.0]];
        let outputs = [&out_data_t];
        let mut out_grad = vec![vec![vec![0.5, -0.5]]];
        let mut in_grad = vec![
            vec![vec![0.0; 2]],
            vec![vec![0.0; 4]],
            vec![vec![0.0; 2]],
        ];
        fc.back_propagation(&inputs, &outputs, &mut out_grad, &mut in_grad, false);
        // prev_delta[c] = dot(delta, W[c*2..c*2+2])
        check(&[-0.5, -0.5], &in_grad[0][0], 1e-6, "input delta");
        // dW[c*2+i] = delta[i] * in[c]
        check(&[1.5, -1.5, -0.5, 0.5], &in_grad[1][0], 1e-6, "weight gradient");
        check(&[0.5, -0.5], &in_grad[2][0], 1e-6, "bias gradient");
    }

    #[test]
    fn bias_port_is_optional() {
        let fc = FullyConnected::without_bias(4, 2);
        assert_eq!(fc.in_kinds().len(), 2);
        assert_eq!(fc.in_shapes().len(), 2);
        assert_eq!(fc.fan_in_size(), 4);
        assert_eq!(fc.fan_out_size(), 2);
    }
}
