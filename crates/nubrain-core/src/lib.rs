//! NuBrain Core
//!
//! Types shared across NuBrain components.
//!
//! This crate provides:
//! - The error taxonomy for artifact loading, image decoding and inference
//! - `LabelSpace`, the ordered class names a classifier's output indexes into

pub mod error;
pub mod labels;

pub use error::{Error, Result};
pub use labels::LabelSpace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::labels::LabelSpace;
}
