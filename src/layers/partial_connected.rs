//! Sparse-connection base used by the pooling layer.
//!
//! Connectivity is declared once, index by index, and stored in lookup
//! tables oriented for each pass: `out2wi` drives the forward pass, `in2wo`
//! the input delta and `weight2io` the weight gradient. A shared
//! `scale_factor` lets subsampling layers average instead of sum.

use crate::parallel;
use crate::tensor::{Shape3, Tensor, Vector};

/// One connection as seen from a weight: (input index, output index).
type IoPair = (usize, usize);
/// One connection as seen from an output: (weight index, input index).
type WiPair = (usize, usize);
/// One connection as seen from an input: (weight index, output index).
type WoPair = (usize, usize);

#[derive(Debug)]
pub struct PartialConnected {
    in_shape: Shape3,
    out_shape: Shape3,
    scale_factor: f32,
    weight2io: Vec<Vec<IoPair>>,
    out2wi: Vec<Vec<WiPair>>,
    in2wo: Vec<Vec<WoPair>>,
    bias2out: Vec<Vec<usize>>,
    out2bias: Vec<usize>,
}

impl PartialConnected {
    pub fn new(
        in_shape: Shape3,
        out_shape: Shape3,
        weight_dim: usize,
        bias_dim: usize,
        scale_factor: f32,
    ) -> Self {
        Self {
            in_shape,
            out_shape,
            scale_factor,
            weight2io: vec![Vec::new(); weight_dim],
            out2wi: vec![Vec::new(); out_shape.size()],
            in2wo: vec![Vec::new(); in_shape.size()],
            bias2out: vec![Vec::new(); bias_dim],
            out2bias: vec![0; out_shape.size()],
        }
    }

    pub fn in_shape(&self) -> Shape3 {
        self.in_shape
    }

    pub fn out_shape(&self) -> Shape3 {
        self.out_shape
    }

    pub fn weight_dim(&self) -> usize {
        self.weight2io.len()
    }

    pub fn bias_dim(&self) -> usize {
        self.bias2out.len()
    }

    /// Declare one weighted connection. A weight index may appear in many
    /// connections; that is what makes the sharing.
    pub fn connect_weight(&mut self, in_index: usize, out_index: usize, weight_index: usize) {
        self.weight2io[weight_index].push((in_index, out_index));
        self.out2wi[out_index].push((weight_index, in_index));
        self.in2wo[in_index].push((weight_index, out_index));
    }

    /// Declare that `out_index` is offset by bias element `bias_index`.
    pub fn connect_bias(&mut self, bias_index: usize, out_index: usize) {
        self.out2bias[out_index] = bias_index;
        self.bias2out[bias_index].push(out_index);
    }

    /// Most connections feeding a single output unit.
    pub fn fan_in_size(&self) -> usize {
        self.out2wi.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Most connections leaving a single input unit.
    pub fn fan_out_size(&self) -> usize {
        self.in2wo.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// `out[i] = scale * sum(W[wi] * in[ii]) + b[out2bias[i]]` per sample.
    pub fn forward(
        &self,
        prev_out: &Tensor,
        weight: &Vector,
        bias: &Vector,
        out: &mut Tensor,
        parallelize: bool,
    ) {
        let scale = self.scale_factor;
        let out2wi = &self.out2wi;
        let out2bias = &self.out2bias;
        let has_bias = !bias.is_empty();
        parallel::for_each_row(parallelize, out, |sample, row| {
            let input = &prev_out[sample];
            for (i, connections) in out2wi.iter().enumerate() {
                let mut sum = 0.0;
                for &(wi, ii) in connections {
                    sum += weight[wi] * input[ii];
                }
                row[i] = scale * sum;
                if has_bias {
                    row[i] += bias[out2bias[i]];
                }
            }
        });
    }

    /// Scatter `curr_delta` back through the connection tables. `prev_delta`
    /// rows are overwritten; `dw` and `db` rows are accumulated into, one row
    /// per sample so the batch can run in parallel.
    pub fn backward(
        &self,
        prev_out: &Tensor,
        weight: &Vector,
        curr_delta: &Tensor,
        prev_delta: &mut Tensor,
        dw: &mut Tensor,
        db: &mut Tensor,
        parallelize: bool,
    ) {
        let scale = self.scale_factor;
        let in2wo = &self.in2wo;
        let weight2io = &self.weight2io;
        let bias2out = &self.bias2out;
        parallel::for_each_row3(
            parallelize,
            prev_delta,
            dw,
            db,
            |sample, prev_delta_row, dw_row, db_row| {
                let delta = &curr_delta[sample];
                let input = &prev_out[sample];
                for (i, connections) in in2wo.iter().enumerate() {
                    let mut sum = 0.0;
                    for &(wi, oi) in connections {
                        sum += weight[wi] * delta[oi];
                    }
                    prev_delta_row[i] = scale * sum;
                }
                for (wi, connections) in weight2io.iter().enumerate() {
                    let mut diff = 0.0;
                    for &(ii, oi) in connections {
                        diff += input[ii] * delta[oi];
                    }
                    dw_row[wi] += scale * diff;
                }
                for (bi, outs) in bias2out.iter().enumerate() {
                    let mut diff = 0.0;
                    for &oi in outs {
                        diff += delta[oi];
                    }
                    db_row[bi] += diff;
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::tests::check;

    /// Two inputs sharing one weight into a single output, plus a bias.
    fn tiny() -> PartialConnected {
        let in_shape = Shape3::new(2, 1, 1).unwrap();
        let out_shape = Shape3::new(1, 1, 1).unwrap();
        let mut pc = PartialConnected::new(in_shape, out_shape, 1, 1, 0.5);
        pc.connect_weight(0, 0, 0);
        pc.connect_weight(1, 0, 0);
        pc.connect_bias(0, 0);
        pc
    }

    #[test]
    fn forward_averages_shared_weight() {
        let pc = tiny();
        let prev_out = vec![vec![2.0, 4.0]];
        let weight = vec![3.0];
        let bias = vec![1.0];
        let mut out = vec![vec![0.0]];
        pc.forward(&prev_out, &weight, &bias, &mut out, false);
        // 0.5 * 3 * (2 + 4) + 1
        check(&[10.0], &out[0], 1e-6, "output");
    }

    #[test]
    fn backward_scatters_through_tables() {
        let pc = tiny();
        let prev_out = vec![vec![2.0, 4.0]];
        let weight = vec![3.0];
        let curr_delta = vec![vec![1.0]];
        let mut prev_delta = vec![vec![9.0, 9.0]];
        let mut dw = vec![vec![0.0]];
        let mut db = vec![vec![0.0]];
        pc.backward(
            &prev_out,
            &weight,
            &curr_delta,
            &mut prev_delta,
            &mut dw,
            &mut db,
            false,
        );
        // prev_delta overwritten: 0.5 * 3 * 1 per input
        check(&[1.5, 1.5], &prev_delta[0], 1e-6, "input delta");
        // dw accumulated: 0.5 * (2*1 + 4*1)
        check(&[3.0], &dw[0], 1e-6, "weight gradient");
        check(&[1.0], &db[0], 1e-6, "bias gradient");
    }

    #[test]
    fn fan_sizes_track_densest_unit() {
        let pc = tiny();
        assert_eq!(pc.fan_in_size(), 2);
        assert_eq!(pc.fan_out_size(), 1);
    }
}
