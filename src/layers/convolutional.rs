//! 2D convolution with stride, dilation, VALID/SAME padding and an optional
//! channel connection mask.
//!
//! Weight layout is channel-major: the kernel for output channel `o` reading
//! input channel `inc` starts at `weight.get_index(0, 0, in_depth * o + inc)`.
//! Masked-out channel pairs still reserve their weight slots so indexing
//! stays dense.

use crate::error::Error;
use crate::layers::LayerKernel;
use crate::math;
use crate::parallel;
use crate::tensor::{fill_tensor, std_input_order, Shape3, Tensor, Vector, VectorKind};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Padding {
    /// Output shrinks by the window; no fabricated zeros.
    Valid,
    /// Input is zero-padded so the output keeps the input's spatial size.
    Same,
}

/// Which (output-channel, input-channel) pairs participate. The empty table
/// connects everything.
#[derive(Clone, Debug, Default)]
pub struct ConnectionTable {
    connected: Vec<bool>,
    rows: usize,
    cols: usize,
}

impl ConnectionTable {
    pub fn new(connected: &[bool], rows: usize, cols: usize) -> Self {
        debug_assert_eq!(connected.len(), rows * cols);
        Self {
            connected: connected.to_vec(),
            rows,
            cols,
        }
    }

    /// Block-diagonal table: group `g` of the input channels only feeds
    /// group `g` of the output channels.
    pub fn grouped(ngroups: usize, rows: usize, cols: usize) -> Result<Self, Error> {
        if ngroups == 0 || rows % ngroups != 0 || cols % ngroups != 0 {
            return Err(Error::InvalidGroupSize {
                ngroups,
                rows,
                cols,
            });
        }
        let row_group = rows / ngroups;
        let col_group = cols / ngroups;
        let mut connected = vec![false; rows * cols];
        for g in 0..ngroups {
            for r in 0..row_group {
                for c in 0..col_group {
                    connected[(r + g * row_group) * cols + c + g * col_group] = true;
                }
            }
        }
        Ok(Self {
            connected,
            rows,
            cols,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 && self.cols == 0
    }

    pub fn is_connected(&self, out_channel: usize, in_channel: usize) -> bool {
        self.is_empty() || self.connected[in_channel * self.cols + out_channel]
    }
}

#[derive(Debug)]
struct ConvParams {
    in_shape: Shape3,
    in_padded: Shape3,
    out: Shape3,
    weight: Shape3,
    has_bias: bool,
    pad_type: Padding,
    w_stride: usize,
    h_stride: usize,
    w_dilation: usize,
    h_dilation: usize,
    tbl: ConnectionTable,
}

fn conv_out_length(
    in_length: usize,
    window_size: usize,
    stride: usize,
    dilation: usize,
    pad_type: Padding,
) -> usize {
    let length = match pad_type {
        Padding::Same => in_length,
        Padding::Valid => in_length - dilation * (window_size - 1),
    };
    (length + stride - 1) / stride
}

fn in_length(in_length: usize, window_size: usize, pad_type: Padding) -> usize {
    match pad_type {
        Padding::Same => in_length + window_size - 1,
        Padding::Valid => in_length,
    }
}

#[derive(Debug)]
pub struct Convolution {
    params: ConvParams,
    /// Padded copy of the last forward input, reused by backward.
    prev_out_padded: Tensor,
    prev_delta_padded: Tensor,
}

impl Convolution {
    /// Square window, unit stride and dilation, every channel pair connected.
    pub fn new(
        in_width: usize,
        in_height: usize,
        window_size: usize,
        in_channels: usize,
        out_channels: usize,
        pad_type: Padding,
        has_bias: bool,
    ) -> Result<Self, Error> {
        Self::custom(
            in_width,
            in_height,
            window_size,
            window_size,
            in_channels,
            out_channels,
            ConnectionTable::default(),
            pad_type,
            has_bias,
            1,
            1,
            1,
            1,
        )
    }

    /// Fully parameterized constructor. The (dilated) window must fit the
    /// input; SAME padding supports unit dilation only.
    #[allow(clippy::too_many_arguments)]
    pub fn custom(
        in_width: usize,
        in_height: usize,
        window_width: usize,
        window_height: usize,
        in_channels: usize,
        out_channels: usize,
        tbl: ConnectionTable,
        pad_type: Padding,
        has_bias: bool,
        w_stride: usize,
        h_stride: usize,
        w_dilation: usize,
        h_dilation: usize,
    ) -> Result<Self, Error> {
        if window_width == 0
            || window_height == 0
            || w_stride == 0
            || h_stride == 0
            || w_dilation == 0
            || h_dilation == 0
            || (pad_type == Padding::Valid
                && (w_dilation * (window_width - 1) + 1 > in_width
                    || h_dilation * (window_height - 1) + 1 > in_height))
        {
            return Err(Error::ConvolutionSizeMismatch {
                in_width,
                in_height,
                window_width,
                window_height,
            });
        }
        // the SAME border is window/2 wide; dilated windows would read past it
        if pad_type == Padding::Same && (w_dilation > 1 || h_dilation > 1) {
            return Err(Error::UnsupportedPadding);
        }

        let in_shape = Shape3::new(in_width, in_height, in_channels)?;
        let in_padded = Shape3::new(
            in_length(in_width, window_width, pad_type),
            in_length(in_height, window_height, pad_type),
            in_channels,
        )?;
        let out = Shape3::new(
            conv_out_length(in_width, window_width, w_stride, w_dilation, pad_type),
            conv_out_length(in_height, window_height, h_stride, h_dilation, pad_type),
            out_channels,
        )?;
        let weight = Shape3::new(window_width, window_height, in_channels * out_channels)?;

        let params = ConvParams {
            in_shape,
            in_padded,
            out,
            weight,
            has_bias,
            pad_type,
            w_stride,
            h_stride,
            w_dilation,
            h_dilation,
            tbl,
        };
        let prev_delta_padded = if pad_type == Padding::Same {
            vec![vec![0.0; params.in_padded.size()]]
        } else {
            Vec::new()
        };
        Ok(Self {
            params,
            prev_out_padded: Vec::new(),
            prev_delta_padded,
        })
    }
}

/// Copy `in_data` into a zero-bordered buffer, offset by half the window.
/// No-op under VALID padding.
fn copy_and_pad_input(params: &ConvParams, in_data: &Tensor, padded: &mut Tensor) {
    if params.pad_type == Padding::Valid {
        return;
    }
    padded.clear();
    padded.resize(in_data.len(), vec![0.0; params.in_padded.size()]);
    let x0 = params.weight.width / 2;
    let y0 = params.weight.height / 2;
    for (dst, src) in padded.iter_mut().zip(in_data) {
        for c in 0..params.in_shape.depth {
            for y in 0..params.in_shape.height {
                let src_base = params.in_shape.get_index(0, y, c);
                let dst_base = params.in_padded.get_index(x0, y0 + y, c);
                dst[dst_base..dst_base + params.in_shape.width]
                    .copy_from_slice(&src[src_base..src_base + params.in_shape.width]);
            }
        }
    }
}

/// Inverse of the padding copy for the input delta.
fn copy_and_unpad_delta(params: &ConvParams, padded: &Tensor, delta: &mut Tensor) {
    if params.pad_type == Padding::Valid {
        return;
    }
    let x0 = params.weight.width / 2;
    let y0 = params.weight.height / 2;
    for (dst, src) in delta.iter_mut().zip(padded) {
        for c in 0..params.in_shape.depth {
            for y in 0..params.in_shape.height {
                let src_base = params.in_padded.get_index(x0, y0 + y, c);
                let dst_base = params.in_shape.get_index(0, y, c);
                dst[dst_base..dst_base + params.in_shape.width]
                    .copy_from_slice(&src[src_base..src_base + params.in_shape.width]);
            }
        }
    }
}

/// Accumulating forward kernel. `out_data` rows must be zeroed beforehand.
fn conv2d_forward(
    params: &ConvParams,
    in_data: &Tensor,
    weight: &Vector,
    bias: Option<&Vector>,
    out_data: &mut Tensor,
    parallelize: bool,
) {
    let out_area = params.out.area();
    let iw = params.in_padded.width;
    let id = params.in_shape.depth;
    let ow = params.out.width;
    let oh = params.out.height;
    let od = params.out.depth;
    let kw = params.weight.width;
    let kh = params.weight.height;

    parallel::for_each_row(parallelize, out_data, |sample, a| {
        let input = &in_data[sample];
        for o in 0..od {
            let out_base = params.out.get_index(0, 0, o);
            for inc in 0..id {
                if !params.tbl.is_connected(o, inc) {
                    continue;
                }
                let w_base = params.weight.get_index(0, 0, id * o + inc);
                let in_base = params.in_padded.get_index(0, 0, inc);
                for y in 0..oh {
                    for x in 0..ow {
                        let mut sum = 0.0;
                        let window = in_base
                            + y * params.h_stride * iw
                            + x * params.w_stride;
                        for wy in 0..kh {
                            let w_row = w_base + wy * kw;
                            let in_row = window + wy * params.h_dilation * iw;
                            for wx in 0..kw {
                                sum += weight[w_row + wx] * input[in_row + wx * params.w_dilation];
                            }
                        }
                        a[out_base + y * ow + x] += sum;
                    }
                }
            }
            if let Some(bias) = bias {
                math::add_scalar(bias[o], &mut a[out_base..out_base + out_area]);
            }
        }
    });
}

/// Backward kernel: scatters `curr_delta` into `prev_delta` (pre-zeroed),
/// accumulates `dw` and `db` one row per sample.
fn conv2d_backward(
    params: &ConvParams,
    prev_out: &Tensor,
    weight: &Vector,
    curr_delta: &Tensor,
    prev_delta: &mut Tensor,
    dw: &mut Tensor,
    db: &mut Tensor,
    parallelize: bool,
) {
    let iw = params.in_padded.width;
    let id = params.in_shape.depth;
    let ow = params.out.width;
    let oh = params.out.height;
    let od = params.out.depth;
    let kw = params.weight.width;
    let kh = params.weight.height;

    parallel::for_each_row3(
        parallelize,
        prev_delta,
        dw,
        db,
        |sample, prev_delta_row, dw_row, db_row| {
            let delta = &curr_delta[sample];
            let input = &prev_out[sample];

            for inc in 0..id {
                for outc in 0..od {
                    if !params.tbl.is_connected(outc, inc) {
                        continue;
                    }
                    let w_base = params.weight.get_index(0, 0, id * outc + inc);
                    let delta_base = params.out.get_index(0, 0, outc);
                    let dst_base = params.in_padded.get_index(0, 0, inc);
                    for y in 0..oh {
                        for x in 0..ow {
                            let d = delta[delta_base + y * ow + x];
                            let dst = dst_base + y * params.h_stride * iw + x * params.w_stride;
                            for wy in 0..kh {
                                for wx in 0..kw {
                                    prev_delta_row[dst + wy * iw + wx] +=
                                        weight[w_base + wy * kw + wx] * d;
                                }
                            }
                        }
                    }
                }
            }

            for inc in 0..id {
                for outc in 0..od {
                    if !params.tbl.is_connected(outc, inc) {
                        continue;
                    }
                    let delta_base = params.out.get_index(0, 0, outc);
                    for wy in 0..kh {
                        for wx in 0..kw {
                            let mut dst = 0.0;
                            let prevo_base = params.in_padded.get_index(wx, wy, inc);
                            for y in 0..oh {
                                let prevo_row = prevo_base + y * params.h_stride * iw;
                                let delta_row = delta_base + y * ow;
                                for x in 0..ow {
                                    dst += input[prevo_row + x * params.w_stride]
                                        * delta[delta_row + x];
                                }
                            }
                            let w_index = params.weight.get_index(wx, wy, id * outc + inc);
                            dw_row[w_index] += dst;
                        }
                    }
                }
            }

            if params.has_bias {
                for outc in 0..od {
                    let base = params.out.get_index(0, 0, outc);
                    db_row[outc] += delta[base..base + ow * oh].iter().sum::<f32>();
                }
            }
        },
    );
}

impl LayerKernel for Convolution {
    fn layer_type(&self) -> &'static str {
        "conv"
    }

    fn in_shapes(&self) -> Vec<Shape3> {
        if self.params.has_bias {
            vec![
                self.params.in_shape,
                self.params.weight,
                Shape3 {
                    width: 1,
                    height: 1,
                    depth: self.params.out.depth,
                },
            ]
        } else {
            vec![self.params.in_shape, self.params.weight]
        }
    }

    fn out_shapes(&self) -> Vec<Shape3> {
        vec![self.params.out]
    }

    fn in_kinds(&self) -> Vec<VectorKind> {
        std_input_order(self.params.has_bias)
    }

    fn out_kinds(&self) -> Vec<VectorKind> {
        vec![VectorKind::Data]
    }

    fn fan_in_size(&self) -> usize {
        self.params.weight.width * self.params.weight.height * self.params.in_shape.depth
    }

    fn fan_out_size(&self) -> usize {
        (self.params.weight.width / self.params.w_stride)
            * (self.params.weight.height / self.params.h_stride)
            * self.params.out.depth
    }

    fn set_sample_count(&mut self, samples: usize) {
        self.prev_delta_padded
            .resize(samples, vec![0.0; self.params.in_padded.size()]);
    }

    fn forward_propagation(
        &mut self,
        in_data: &[&Tensor],
        out_data: &mut [Tensor],
        parallelize: bool,
    ) {
        let params = &self.params;
        copy_and_pad_input(params, in_data[0], &mut self.prev_out_padded);
        let input = match params.pad_type {
            Padding::Valid => in_data[0],
            Padding::Same => &self.prev_out_padded,
        };
        let weight = &in_data[1][0];
        let bias = if params.has_bias {
            Some(&in_data[2][0])
        } else {
            None
        };
        fill_tensor(&mut out_data[0], 0.0);
        conv2d_forward(params, input, weight, bias, &mut out_data[0], parallelize);
    }

    fn back_propagation(
        &mut self,
        in_data: &[&Tensor],
        _out_data: &[&Tensor],
        out_grad: &mut [Tensor],
        in_grad: &mut [Tensor],
        parallelize: bool,
    ) {
        let params = &self.params;
        // the forward pass left the padded input in place
        let input = match params.pad_type {
            Padding::Valid => in_data[0],
            Padding::Same => &self.prev_out_padded,
        };
        let weight = &in_data[1][0];
        let curr_delta = &out_grad[0];

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

        match params.pad_type {
            Padding::Valid => {
                fill_tensor(prev_delta, 0.0);
                conv2d_backward(
                    params,
                    input,
                    weight,
                    curr_delta,
                    prev_delta,
                    dw,
                    db,
                    parallelize,
                );
            }
            Padding::Same => {
                self.prev_delta_padded
                    .resize(prev_delta.len(), vec![0.0; params.in_padded.size()]);
                fill_tensor(&mut self.prev_delta_padded, 0.0);
                conv2d_backward(
                    params,
                    input,
                    weight,
                    curr_delta,
                    &mut self.prev_delta_padded,
                    dw,
                    db,
                    parallelize,
                );
                copy_and_unpad_delta(params, &self.prev_delta_padded, prev_delta);
            }
        }
    }
}
