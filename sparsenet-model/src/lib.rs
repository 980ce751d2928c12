//! Sparse coding with a learned dictionary.
//!
//! - [`SparseNet`] ties the pieces together and is what an outer training loop drives.
//! - [`IstaSolver`] infers sparse codes for a batch of patches.
//! - [`Dictionary`] and [`Expander`] are the two linear stages of the reconstruction.

pub mod config;
pub mod dictionary;
pub mod error;
pub mod expander;
pub mod ista;
pub mod model;
pub mod reconstruction;
pub mod shrink;

pub use config::{SparseNetConfig, CONVERGENCE_TOLERANCE};
pub use dictionary::Dictionary;
pub use error::{Result, SparseNetError};
pub use expander::Expander;
pub use ista::{relative_change, IstaReport, IstaSolver};
pub use model::SparseNet;
pub use reconstruction::{squared_error, squared_error_grad, ParameterGrads, Reconstruction};
pub use shrink::{shrink_inplace, soft_threshold};
