//! Element-wise activation layers. All of them are shape-preserving and adopt
//! the upstream layer's output shape when wired without an explicit one.

use crate::error::Error;
use crate::math;
use crate::parallel;
use crate::tensor::{Shape3, Tensor, VectorKind};

use super::LayerKernel;

macro_rules! scalar_activation {
    ($name:ident, $type_str:expr, $range:expr, $f:expr, $df:expr) => {
        #[derive(Debug)]
        pub struct $name {
            in_shape: Shape3,
        }

        impl $name {
            /// Shape is inferred from the upstream layer at wiring time.
            pub fn new() -> Self {
                Self {
                    in_shape: Shape3::null(),
                }
            }

            pub fn with_shape(in_shape: Shape3) -> Self {
                Self { in_shape }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl LayerKernel for $name {
            fn layer_type(&self) -> &'static str {
                $type_str
            }

            fn in_shapes(&self) -> Vec<Shape3> {
                vec![self.in_shape]
            }

            fn out_shapes(&self) -> Vec<Shape3> {
                vec![self.in_shape]
            }

            fn in_kinds(&self) -> Vec<VectorKind> {
                vec![VectorKind::Data]
            }

            fn out_kinds(&self) -> Vec<VectorKind> {
                vec![VectorKind::Data]
            }

            fn fan_in_size(&self) -> usize {
                self.in_shape.width
            }

            fn fan_out_size(&self) -> usize {
                self.in_shape.width
            }

            fn set_in_shape(&mut self, in_shape: Shape3) -> Result<(), Error> {
                self.in_shape = in_shape;
                Ok(())
            }

            fn out_value_range(&self) -> (f32, f32) {
                $range
            }

            fn forward_propagation(
                &mut self,
                in_data: &[&Tensor],
                out_data: &mut [Tensor],
                parallelize: bool,
            ) {
                let x = in_data[0];
                parallel::for_each_row(parallelize, &mut out_data[0], |sample, y| {
                    for (y, x) in y.iter_mut().zip(&x[sample]) {
                        *y = $f(*x);
                    }
                });
            }

            fn back_propagation(
                &mut self,
                _in_data: &[&Tensor],
                out_data: &[&Tensor],
                out_grad: &mut [Tensor],
                in_grad: &mut [Tensor],
                parallelize: bool,
            ) {
                let y = out_data[0];
                let dy = &out_grad[0];
                parallel::for_each_row(parallelize, &mut in_grad[0], |sample, dx| {
                    for (j, dx) in dx.iter_mut().enumerate() {
                        *dx = dy[sample][j] * $df(y[sample][j]);
                    }
                });
            }
        }
    };
}

scalar_activation!(
    Relu,
    "relu-activation",
    (0.1, 0.9),
    |x: f32| x.max(0.0),
    |y: f32| if y > 0.0 { 1.0 } else { 0.0 }
);

scalar_activation!(
    Sigmoid,
    "sigmoid-activation",
    (0.1, 0.9),
    |x: f32| 1.0 / (1.0 + (-x).exp()),
    |y: f32| y * (1.0 - y)
);

scalar_activation!(
    TanH,
    "tanh-activation",
    (-0.8, 0.8),
    |x: f32| x.tanh(),
    |y: f32| 1.0 - y * y
);

/// Softmax is the odd one out: its derivative couples every pair of units,
/// so the backward pass applies the full Jacobian row by row.
#[derive(Debug)]
pub struct Softmax {
    in_shape: Shape3,
}

impl Softmax {
    pub fn new() -> Self {
        Self {
            in_shape: Shape3::null(),
        }
    }

    pub fn with_shape(in_shape: Shape3) -> Self {
        Self { in_shape }
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerKernel for Softmax {
    fn layer_type(&self) -> &'static str {
        "softmax-activation"
    }

    fn in_shapes(&self) -> Vec<Shape3> {
        vec![self.in_shape]
    }

    fn out_shapes(&self) -> Vec<Shape3> {
        vec![self.in_shape]
    }

    fn in_kinds(&self) -> Vec<VectorKind> {
        vec![VectorKind::Data]
    }

    fn out_kinds(&self) -> Vec<VectorKind> {
        vec![VectorKind::Data]
    }

    fn fan_in_size(&self) -> usize {
        self.in_shape.width
    }

    fn fan_out_size(&self) -> usize {
        self.in_shape.width
    }

    fn set_in_shape(&mut self, in_shape: Shape3) -> Result<(), Error> {
        self.in_shape = in_shape;
        Ok(())
    }

    fn forward_propagation(
        &mut self,
        in_data: &[&Tensor],
        out_data: &mut [Tensor],
        parallelize: bool,
    ) {
        let x = in_data[0];
        parallel::for_each_row(parallelize, &mut out_data[0], |sample, y| {
            let x = &x[sample];
            // shift by the max so exp never overflows
            let alpha = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let mut denominator = 0.0;
            for (y, x) in y.iter_mut().zip(x) {
                *y = (x - alpha).exp();
                denominator += *y;
            }
            for y in y.iter_mut() {
                *y /= denominator;
            }
        });
    }

    fn back_propagation(
        &mut self,
        _in_data: &[&Tensor],
        out_data: &[&Tensor],
        out_grad: &mut [Tensor],
        in_grad: &mut [Tensor],
        parallelize: bool,
    ) {
        let y = out_data[0];
        let dy = &out_grad[0];
        parallel::for_each_row(parallelize, &mut in_grad[0], |sample, dx| {
            let y = &y[sample];
            let dy = &dy[sample];
            let mut df = vec![0.0; y.len()];
            for j in 0..y.len() {
                for k in 0..y.len() {
                    df[k] = if k == j {
                        y[j] * (1.0 - y[j])
                    } else {
                        -y[k] * y[j]
                    };
                }
                dx[j] = math::dot(dy, &df);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::tests::check;

    #[test]
    fn sigmoid_forward_and_backward() {
        let mut act = Sigmoid::with_shape(Shape3::new(3, 1, 1).unwrap());
        let x = vec![vec![0.0, 2.0, -2.0]];
        let inputs = [&x];
        let mut out = vec![vec![vec![0.0; 3]]];
        act.forward_propagation(&inputs, &mut out, false);
        check(&[0.5, 0.880797, 0.119203], &out[0][0], 1e-5, "output");

        let y = out[0].clone();
        let outputs = [&y];
        let mut out_grad = vec![vec![vec![1.0, 1.0, 1.0]]];
        let mut in_grad = vec![vec![vec![0.0; 3]]];
        act.back_propagation(&inputs, &outputs, &mut out_grad, &mut in_grad, false);
        // dy * y * (1 - y)
        check(&[0.25, 0.104994, 0.104994], &in_grad[0][0], 1e-5, "input delta");
    }

    #[test]
    fn relu_clamps_and_gates() {
        let mut act = Relu::with_shape(Shape3::new(4, 1, 1).unwrap());
        let x = vec![vec![-1.0, 0.0, 0.5, 3.0]];
        let inputs = [&x];
        let mut out = vec![vec![vec![0.0; 4]]];
        act.forward_propagation(&inputs, &mut out, false);
        check(&[0.0, 0.0, 0.5, 3.0], &out[0][0], 1e-6, "output");

        let y = out[0].clone();
        let outputs = [&y];
        let mut out_grad = vec![vec![vec![2.0; 4]]];
        let mut in_grad = vec![vec![vec![0.0; 4]]];
        act.back_propagation(&inputs, &outputs, &mut out_grad, &mut in_grad, false);
        check(&[0.0, 0.0, 2.0, 2.0], &in_grad[0][0], 1e-6, "input delta");
    }

    #[test]
    fn softmax_sums_to_one_and_is_shift_invariant() {
        let mut act = Softmax::with_shape(Shape3::new(3, 1, 1).unwrap());
        let x = vec![vec![1.0, 2.0, 3.0]];
        let shifted = vec![vec![101.0, 102.0, 103.0]];
        let inputs = [&x];
        let shifted_inputs = [&shifted];
        let mut out = vec![vec![vec![0.0; 3]]];
        let mut out_shifted = vec![vec![vec![0.0; 3]]];
        act.forward_propagation(&inputs, &mut out, false);
        act.forward_propagation(&shifted_inputs, &mut out_shifted, false);

        let total: f32 = out[0][0].iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        check(&out[0][0], &out_shifted[0][0], 1e-6, "shifted output");
    }

    #[test]
    fn softmax_jacobian_rows_sum_to_zero() {
        // pushing a uniform gradient through softmax yields zero input delta
        let mut act = Softmax::with_shape(Shape3::new(3, 1, 1).unwrap());
        let x = vec![vec![0.2, -0.4, 1.1]];
        let inputs = [&x];
        let mut out = vec![vec![vec![0.0; 3]]];
        act.forward_propagation(&inputs, &mut out, false);
        let y = out[0].clone();
        let outputs = [&y];
        let mut out_grad = vec![vec![vec![1.0; 3]]];
        let mut in_grad = vec![vec![vec![9.0; 3]]];
        act.back_propagation(&inputs, &outputs, &mut out_grad, &mut in_grad, false);
        check(&[0.0, 0.0, 0.0], &in_grad[0][0], 1e-5, "input delta");
    }

    #[test]
    fn activations_infer_their_shape() {
        let mut act = TanH::new();
        assert!(act.in_shapes()[0].is_null());
        act.set_in_shape(Shape3::new(5, 5, 2).unwrap()).unwrap();
        assert_eq!(act.out_shapes()[0].size(), 50);
        assert_eq!(act.out_value_range(), (-0.8, 0.8));
    }
}
