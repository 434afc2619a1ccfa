pub mod edge;
pub mod layer;
pub mod sequential;

pub use edge::{Edge, EdgeId, Edges, LayerId};
pub use layer::Layer;
pub use sequential::Sequential;
