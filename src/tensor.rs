use std::fmt;

use crate::error::Error;

/// One sample's flattened activation/gradient/weight buffer.
pub type Vector = Vec<f32>;

/// A batch of [`Vector`]s, one row per sample. Weight buffers keep a single
/// row which is shared by every sample of the batch.
pub type Tensor = Vec<Vector>;

/// Class label as produced by a dataset reader.
pub type Label = usize;

/// Width x height x depth descriptor with linear indexing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Shape3 {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Shape3 {
    /// Construct a shape, rejecting element counts that overflow `usize`.
    pub fn new(width: usize, height: usize, depth: usize) -> Result<Self, Error> {
        width
            .checked_mul(height)
            .and_then(|a| a.checked_mul(depth))
            .ok_or(Error::ShapeTooLarge {
                width,
                height,
                depth,
            })?;
        Ok(Self {
            width,
            height,
            depth,
        })
    }

    /// The all-zero shape, used by layers whose input shape is inferred
    /// from the upstream layer at connect time.
    pub fn null() -> Self {
        Self {
            width: 0,
            height: 0,
            depth: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.size() == 0
    }

    pub fn size(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn get_index(&self, x: usize, y: usize, channel: usize) -> usize {
        debug_assert!(x < self.width);
        debug_assert!(y < self.height);
        debug_assert!(channel < self.depth);
        (self.height * channel + y) * self.width + x
    }
}

impl fmt::Display for Shape3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// What a layer port carries. `Data` ports are resized per batch; `Weight`
/// and `Bias` ports hold one shared trainable row.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VectorKind {
    Data,
    Weight,
    Bias,
    Label,
    Aux,
}

impl VectorKind {
    pub fn is_trainable_weight(self) -> bool {
        matches!(self, VectorKind::Weight | VectorKind::Bias)
    }
}

/// The standard input port order shared by the parameterized layers.
pub fn std_input_order(has_bias: bool) -> Vec<VectorKind> {
    if has_bias {
        vec![VectorKind::Data, VectorKind::Weight, VectorKind::Bias]
    } else {
        vec![VectorKind::Data, VectorKind::Weight]
    }
}

/// Resize a batch tensor to `samples` rows, keeping the per-row length.
/// New rows start zeroed.
pub fn resize_rows(tensor: &mut Tensor, samples: usize) {
    let row_len = tensor.first().map_or(0, Vec::len);
    tensor.resize(samples, vec![0.0; row_len]);
}

pub fn fill_tensor(tensor: &mut Tensor, value: f32) {
    for row in tensor.iter_mut() {
        for v in row.iter_mut() {
            *v = value;
        }
    }
}

pub fn display_shapes(shapes: &[Shape3]) -> String {
    let mut s = String::from("[");
    for (i, shape) in shapes.iter().enumerate() {
        if i != 0 {
            s.push(',');
        }
        s.push_str(&format!("[{}]", shape));
    }
    s.push(']');
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_linear_indexing() {
        let s = Shape3::new(4, 3, 2).unwrap();
        assert_eq!(s.size(), 24);
        assert_eq!(s.area(), 12);
        assert_eq!(s.get_index(0, 0, 0), 0);
        assert_eq!(s.get_index(3, 2, 0), 11);
        assert_eq!(s.get_index(0, 0, 1), 12);
        assert_eq!(s.get_index(1, 2, 1), 21);
    }

    #[test]
    fn shape_overflow_is_rejected() {
        let err = Shape3::new(usize::MAX, 2, 2);
        assert!(matches!(err, Err(Error::ShapeTooLarge { .. })));
    }

    #[test]
    fn resize_keeps_row_length() {
        let mut t = vec![vec![1.0, 2.0, 3.0]];
        resize_rows(&mut t, 3);
        assert_eq!(t.len(), 3);
        assert_eq!(t[1], vec![0.0, 0.0, 0.0]);
        assert_eq!(t[0], vec![1.0, 2.0, 3.0]);
    }
}
