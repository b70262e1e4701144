//! Columnar tree storage.
//!
//! A dataset is a named collection of objects. Trees are the only queryable
//! objects: each tree holds a fixed number of entries spread over typed
//! branches (columns), and can be scanned row by row over any subset of its
//! branches.
pub mod datatype;
pub mod dataset;
pub mod errors;
pub mod json;
pub mod memory;
pub mod scalar;

pub use dataset::{Branch, Dataset, DatasetObject, DatasetOpener, Tree, TreeScan};
pub use datatype::DataType;
pub use scalar::ScalarValue;
