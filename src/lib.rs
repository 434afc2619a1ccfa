//! A small feed-forward neural network engine: layers wired into a chain
//! over an edge arena, trained by minibatch gradient descent.
//!
//! ```no_run
//! use layernet::layers::{FullyConnected, TanH};
//! use layernet::loss::Mse;
//! use layernet::network::Network;
//! use layernet::optimizer::GradientDescent;
//!
//! # fn main() -> Result<(), layernet::error::Error> {
//! let mut net = Network::new("xor");
//! net.add(FullyConnected::new(2, 4))?;
//! net.add(TanH::new())?;
//! net.add(FullyConnected::new(4, 1))?;
//!
//! let inputs = vec![vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]];
//! let targets = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];
//! let mut sgd = GradientDescent::new(0.1);
//! net.fit(&Mse, &mut sgd, &inputs, &targets, 4, 100)?;
//! let out = net.predict(&[1.0, 0.0])?;
//! # let _ = out;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod graph;
pub mod init;
pub mod layers;
pub mod loss;
pub mod math;
pub mod network;
pub mod optimizer;
pub mod parallel;
pub mod tensor;

pub use error::Error;
pub use graph::{Layer, Sequential};
pub use network::{Network, TestResult, TrainControl};
pub use tensor::{Label, Shape3, Tensor, Vector};
