use std::error;
use std::fmt;

use crate::layers::Backend;

/// Everything that can go wrong while assembling or driving the layer graph.
/// All variants are fatal: they are raised at the point of detection and
/// never caught inside the crate.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A declared shape's element count overflows the index type.
    ShapeTooLarge {
        width: usize,
        height: usize,
        depth: usize,
    },
    /// Adjacent layers disagree about the element count flowing between them.
    ConnectionMismatch {
        from_type: &'static str,
        from_shapes: String,
        from_size: usize,
        to_type: &'static str,
        to_shapes: String,
        to_size: usize,
    },
    /// Caller-supplied input length differs from the first layer's input size.
    DataMismatch {
        layer_type: &'static str,
        expected: usize,
        received: usize,
    },
    /// Pooling window does not evenly divide the input spatial dimensions.
    PoolingSizeMismatch {
        in_width: usize,
        in_height: usize,
        pool_size_x: usize,
        pool_size_y: usize,
    },
    /// A padding configuration outside the supported set was requested.
    UnsupportedPadding,
    /// Convolution window, stride, or dilation that cannot produce an output
    /// from the given input extent.
    ConvolutionSizeMismatch {
        in_width: usize,
        in_height: usize,
        window_width: usize,
        window_height: usize,
    },
    /// Grouped connection table whose group count does not divide the
    /// channel counts.
    InvalidGroupSize {
        ngroups: usize,
        rows: usize,
        cols: usize,
    },
    /// A compute backend outside the supported set was requested.
    UnsupportedBackend(Backend),
    /// A layer cannot infer its input shape from the upstream layer.
    ShapeInference { layer_type: &'static str },
    /// Adjacent layers do not share an edge after auto-wiring.
    BrokenConnectivity { index: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ShapeTooLarge {
                width,
                height,
                depth,
            } => write!(
                f,
                "layer size too large: {}x{}x{} overflows the index type",
                width, height, depth
            ),
            Error::ConnectionMismatch {
                from_type,
                from_shapes,
                from_size,
                to_type,
                to_shapes,
                to_size,
            } => write!(
                f,
                "layer dimension mismatch: output of '{}' {} ({} elements) \
                 must equal input of '{}' {} ({} elements)",
                from_type, from_shapes, from_size, to_type, to_shapes, to_size
            ),
            Error::DataMismatch {
                layer_type,
                expected,
                received,
            } => write!(
                f,
                "input dimension mismatch: '{}' expects {} elements, received {}",
                layer_type, expected, received
            ),
            Error::PoolingSizeMismatch {
                in_width,
                in_height,
                pool_size_x,
                pool_size_y,
            } => write!(
                f,
                "width/height not multiple of pooling size: input {}x{}, pool {}x{}",
                in_width, in_height, pool_size_x, pool_size_y
            ),
            Error::UnsupportedPadding => f.write_str("unsupported padding configuration"),
            Error::ConvolutionSizeMismatch {
                in_width,
                in_height,
                window_width,
                window_height,
            } => write!(
                f,
                "convolution window does not fit: input {}x{}, window {}x{} after dilation",
                in_width, in_height, window_width, window_height
            ),
            Error::InvalidGroupSize {
                ngroups,
                rows,
                cols,
            } => write!(
                f,
                "invalid group size: {} groups over a {}x{} connection table",
                ngroups, rows, cols
            ),
            Error::UnsupportedBackend(backend) => {
                write!(f, "not a supported engine: {:?}", backend)
            }
            Error::ShapeInference { layer_type } => write!(
                f,
                "'{}' cannot infer its input shape from the previous layer",
                layer_type
            ),
            Error::BrokenConnectivity { index } => write!(
                f,
                "layers {} and {} do not share an edge after wiring",
                index,
                index + 1
            ),
        }
    }
}

impl error::Error for Error {}
